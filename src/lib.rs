pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod org;
pub mod retry;
pub mod store;
pub mod wal;
