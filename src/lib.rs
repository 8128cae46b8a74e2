pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod query;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod store;
pub mod types;
pub mod view;
