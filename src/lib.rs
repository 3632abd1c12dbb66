pub mod catalog;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod journal;
pub mod limits;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod service;
pub mod wal;
