pub mod audit;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod reasoning;
pub mod server;
pub mod store;
