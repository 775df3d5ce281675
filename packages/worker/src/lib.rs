pub mod config;
pub mod error;

pub use config::WorkerAppConfig;
pub use error::{Result, WorkerError};
