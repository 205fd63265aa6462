//! Common infrastructure: errors, logging

pub mod logger;

pub use logger::{cleanup_old_logs, init_logger, init_logger_with_file};
pub use shared::error::{AppError, AppResult, ErrorCode};
