//! Error types for message-exchange operations.

use thiserror::Error;

/// Comprehensive error type for all exchange operations
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Connection to '{endpoint}' failed: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("Authentication failed on '{endpoint}' for user '{user}'")]
    AuthenticationFailed { endpoint: String, user: String },

    #[error("Cannot open '{destination}': {reason}")]
    OpenFailed {
        destination: String,
        reason: OpenFailureReason,
    },

    #[error("Send to '{destination}' failed: {message}")]
    SendFailed {
        destination: String,
        message: String,
    },

    #[error("Receive from '{destination}' failed: {message}")]
    ReceiveFailed {
        destination: String,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    TransactionFailed { operation: String, message: String },

    #[error("Reply routing failed: {0}")]
    Routing(#[from] RoutingError),

    #[error("Payload decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Payload encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Redirect of message {message_id} to backout queue failed after {attempts} attempt(s): {message}")]
    RedirectFailed {
        message_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Handle {handle} does not belong to this session or is already closed")]
    InvalidHandle { handle: u64 },

    #[error("No endpoint could be used ({attempted} attempted)")]
    EndpointsExhausted { attempted: usize },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl ExchangeError {
    /// Check if the error rules out the current endpoint, so the next one
    /// in the resolver sequence should be tried
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::AuthenticationFailed { .. } | Self::OpenFailed { .. }
        )
    }

    /// Check if the error happened while processing a single message and
    /// should be resolved by backing out the unit of work
    pub fn is_processing_failure(&self) -> bool {
        matches!(
            self,
            Self::SendFailed { .. } | Self::Routing(_) | Self::Decode(_) | Self::Encode(_)
        )
    }
}

/// Why a destination could not be opened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenFailureReason {
    #[error("object not found")]
    NotFound,

    #[error("object is open exclusively by another application")]
    InUse,

    #[error("not authorized")]
    NotAuthorized,

    #[error("unknown remote queue manager '{0}'")]
    UnknownQueueManager(String),

    #[error("{0}")]
    Other(String),
}

/// Payload decoding failures
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message body is not valid UTF-8 (invalid sequence at byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Reply routing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("Request {message_id} carries no reply-to queue")]
    MissingReplyTo { message_id: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
