//! Unified error codes for the Gambero framework
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 4xxx: Order / out-of-stock errors
//! - 9xxx: System / delivery errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,
    /// Token is missing entirely (connect attempted without credential)
    TokenMissing = 1008,

    // ==================== 4xxx: Order / Out-of-stock ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order has already been voided
    OrderAlreadyVoided = 4002,
    /// Out-of-stock record not found
    EsauritoNotFound = 4401,
    /// Out-of-stock record is claimed by another operator
    ClaimConflict = 4402,
    /// Out-of-stock record already reached a terminal state
    RecordTerminal = 4403,

    // ==================== 9xxx: System / Delivery ====================
    /// Internal server error
    InternalError = 9001,
    /// Network error
    NetworkError = 9002,
    /// Operation timed out
    TimeoutError = 9003,
    /// Configuration error
    ConfigError = 9004,
    /// Subscriber queue backed up, subscription dropped
    SubscriberLagged = 9101,
    /// Replay cursor fell outside the retention window
    ReplayExpired = 9102,
    /// Client not connected
    ClientDisconnected = 9103,
    /// Protocol version mismatch at handshake
    ProtocolMismatch = 9104,
}

impl ErrorCode {
    /// Default human-readable message for this code
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Unknown => "Unknown error",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::InvalidRequest => "Invalid request",

            Self::NotAuthenticated => "Not authenticated",
            Self::TokenExpired => "Token has expired",
            Self::TokenInvalid => "Token is invalid",
            Self::TokenMissing => "No token available",

            Self::OrderNotFound => "Order not found",
            Self::OrderAlreadyVoided => "Order has already been voided",
            Self::EsauritoNotFound => "Out-of-stock record not found",
            Self::ClaimConflict => "Record is being handled by another operator",
            Self::RecordTerminal => "Record already reached a terminal state",

            Self::InternalError => "Internal server error",
            Self::NetworkError => "Network error",
            Self::TimeoutError => "Operation timed out",
            Self::ConfigError => "Configuration error",
            Self::SubscriberLagged => "Subscriber queue backed up",
            Self::ReplayExpired => "Replay cursor outside retention window",
            Self::ClientDisconnected => "Client not connected",
            Self::ProtocolMismatch => "Protocol version mismatch",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), *self as u16)
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::Unknown),
            2 => Ok(Self::ValidationFailed),
            3 => Ok(Self::NotFound),
            4 => Ok(Self::AlreadyExists),
            5 => Ok(Self::InvalidRequest),
            1001 => Ok(Self::NotAuthenticated),
            1003 => Ok(Self::TokenExpired),
            1004 => Ok(Self::TokenInvalid),
            1008 => Ok(Self::TokenMissing),
            4001 => Ok(Self::OrderNotFound),
            4002 => Ok(Self::OrderAlreadyVoided),
            4401 => Ok(Self::EsauritoNotFound),
            4402 => Ok(Self::ClaimConflict),
            4403 => Ok(Self::RecordTerminal),
            9001 => Ok(Self::InternalError),
            9002 => Ok(Self::NetworkError),
            9003 => Ok(Self::TimeoutError),
            9004 => Ok(Self::ConfigError),
            9101 => Ok(Self::SubscriberLagged),
            9102 => Ok(Self::ReplayExpired),
            9103 => Ok(Self::ClientDisconnected),
            9104 => Ok(Self::ProtocolMismatch),
            _ => Err(format!("Unknown error code: {}", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_u16() {
        let codes = [
            ErrorCode::Success,
            ErrorCode::TokenMissing,
            ErrorCode::ClaimConflict,
            ErrorCode::ReplayExpired,
        ];
        for code in codes {
            let raw: u16 = code.into();
            assert_eq!(ErrorCode::try_from(raw).unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert!(ErrorCode::try_from(65535).is_err());
    }
}
