pub mod accounts;
pub mod aggregate;
pub mod channel_resolver;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod insights;
pub mod logging;
pub mod memory_store;
pub mod models;
pub mod normalize;
pub mod providers;
pub mod session;
pub mod store;
pub mod tier;
