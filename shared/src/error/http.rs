//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound | Self::OrderNotFound | Self::EsauritoNotFound => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            Self::AlreadyExists
            | Self::OrderAlreadyVoided
            | Self::ClaimConflict
            | Self::RecordTerminal => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::TokenMissing => StatusCode::UNAUTHORIZED,

            // 410 Gone (replay cursor fell out of the window; full resync required)
            Self::ReplayExpired => StatusCode::GONE,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::NetworkError | Self::TimeoutError | Self::SubscriberLagged => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            Self::InternalError | Self::ConfigError | Self::ClientDisconnected => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 400 Bad Request (default for validation/protocol errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
