pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod report;
pub mod scheduler;
pub mod school;
pub mod store;
pub mod wal;
