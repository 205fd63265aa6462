//! Unified error system for the Gambero framework
//!
//! This module provides:
//! - [`ErrorCode`]: standardized error codes shared by server and clients
//! - [`AppError`]: rich error type with codes, messages, and details
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 4xxx: Order / out-of-stock errors
//! - 9xxx: System / delivery errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode};
//!
//! // Create a simple error
//! let err = AppError::new(ErrorCode::NotFound);
//!
//! // Create an error with custom message and details
//! let err = AppError::validation("Missing required field")
//!     .with_detail("field", "station");
//! ```

mod codes;
mod http;
mod types;

pub use codes::ErrorCode;
pub use types::AppError;

/// Result alias used across the workspace
pub type AppResult<T> = Result<T, AppError>;
