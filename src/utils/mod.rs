pub mod config;
pub mod data_logger;
pub mod error;
pub mod export;
pub mod metrics;
