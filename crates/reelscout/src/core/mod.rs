//! Core utilities, configuration, and common types

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod retry;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
