pub mod account;
pub mod config;
pub mod error;
pub mod feed;
pub mod interval;
pub mod scheduler;
pub mod storage;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use interval::parse_interval;
