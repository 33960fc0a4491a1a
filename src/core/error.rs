//! Error types for the interop router.

use crate::core::types::InstanceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing interop messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Channel errors
    #[error("Channel creation failed: {0}")]
    ChannelCreationFailed(String),

    #[error("No channel found: {0}")]
    NoChannelFound(String),

    #[error("Access denied to channel {0}")]
    AccessDenied(String),

    // Resolution errors
    #[error("No apps found to resolve the request")]
    NoAppsFound,

    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("App {0} did not register the required listener in time")]
    AppTimeout(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("User cancelled resolution")]
    UserCancelled,

    #[error("Intent handler rejected: {0}")]
    IntentHandlerRejected(String),

    // Instance errors
    #[error("Instance {0} is gone")]
    InstanceGone(InstanceId),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("App launch failed: {0}")]
    LaunchFailed(String),

    // Transport errors
    #[error("Delivery to {0} failed")]
    DeliveryFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the protocol-level kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ChannelCreationFailed(_) => ErrorKind::ChannelCreationFailed,
            Error::NoChannelFound(_) => ErrorKind::NoChannelFound,
            Error::AccessDenied(_) => ErrorKind::AccessDenied,
            Error::NoAppsFound => ErrorKind::NoAppsFound,
            Error::AppNotFound(_) => ErrorKind::AppNotFound,
            Error::AppTimeout(_) => ErrorKind::AppTimeout,
            Error::Timeout => ErrorKind::Timeout,
            Error::UserCancelled => ErrorKind::UserCancelled,
            Error::IntentHandlerRejected(_) => ErrorKind::IntentHandlerRejected,
            Error::InstanceGone(_) => ErrorKind::InstanceGone,
            Error::ViewNotFound(_) => ErrorKind::ViewNotFound,
            Error::LaunchFailed(_) => ErrorKind::LaunchFailed,
            Error::DeliveryFailed(_) => ErrorKind::DeliveryFailed,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for an invalid request error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidRequest(reason.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidRequest(err.to_string())
    }
}

/// Protocol-visible error kind.
///
/// Dialects render each kind as their own error-code string, see
/// [`Dialect::error_code`](crate::protocol::Dialect::error_code).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ChannelCreationFailed,
    NoChannelFound,
    AccessDenied,
    NoAppsFound,
    AppNotFound,
    AppTimeout,
    Timeout,
    UserCancelled,
    IntentHandlerRejected,
    InstanceGone,
    ViewNotFound,
    LaunchFailed,
    DeliveryFailed,
    InvalidRequest,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
