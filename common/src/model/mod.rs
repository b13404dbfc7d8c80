pub mod attachment;
pub mod display;
pub mod field_value;
pub mod form_instance;
pub mod form_spec;
pub mod ledger;
pub mod version;
