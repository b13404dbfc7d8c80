//! HTTP routes of the service.

pub mod forms;
