//! Durable state: the ledger of filled forms, the attachment blobs and the
//! locks that serialize writers per form key.

pub mod attachments;
pub mod key_locks;
pub mod ledger_store;
