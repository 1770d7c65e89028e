pub mod actions;
pub mod attachments;
pub mod error;
pub mod routes;
pub mod sanitize;
pub mod state;
