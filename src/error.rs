//! Typed errors for the gateway, client-side validation and the drag engine.

use thiserror::Error;

/// Failure talking to the backend: a non-2xx response, a transport failure,
/// or a body that did not decode.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method} {path} returned HTTP {status} ({code}): {message}")]
    Http {
        method: &'static str,
        path: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("{method} {path} failed: {source}")]
    Network {
        method: &'static str,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {method} {path}: {message}")]
    Decode {
        method: &'static str,
        path: String,
        message: String,
    },
}

impl ApiError {
    pub fn http(
        method: &'static str,
        path: impl Into<String>,
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Http {
            method,
            path: path.into(),
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Machine-readable code for logs and the CLI error envelope.
    pub fn code(&self) -> &str {
        match self {
            ApiError::Http { code, .. } => code,
            ApiError::Network { .. } => "NETWORK_ERROR",
            ApiError::Decode { .. } => "DECODE_ERROR",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server errors and transport failures may succeed on a later attempt;
    /// client errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::Network { .. } => true,
            ApiError::Decode { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Message suitable for showing to a person, without request details.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { status: 400 | 422, message, .. } if !message.is_empty() => {
                format!("The server rejected the request: {message}")
            }
            ApiError::Http { status: 404, .. } => {
                "The item no longer exists. Reload to see the latest state.".to_string()
            }
            ApiError::Http { status: 409, .. } => {
                "The item was changed by someone else. Reload and try again.".to_string()
            }
            ApiError::Http { status, .. } if *status >= 500 => {
                "The server had a problem handling the request. Try again shortly.".to_string()
            }
            ApiError::Http { .. } => "The server rejected the request.".to_string(),
            ApiError::Network { .. } => {
                "Could not reach the server. Check the connection and API URL.".to_string()
            }
            ApiError::Decode { .. } => "The server sent a response that could not be read.".to_string(),
        }
    }
}

/// Input rejected before any request is sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} must be at most {max} characters (got {len})")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
}

/// Misuse of the drag engine's gesture protocol or references to entities the
/// local state does not know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("a drag is already in progress")]
    AlreadyDragging,

    #[error("no drag is in progress")]
    NotDragging,

    #[error("the previous drop is still being saved")]
    CommitInFlight,

    #[error("no commit is pending")]
    NoPendingCommit,

    #[error("drag events refer to '{expected}' but got '{actual}'")]
    SourceMismatch { expected: String, actual: String },

    #[error("task {0} is not in the current view")]
    UnknownTask(String),

    #[error("category {0} is not in the current view")]
    UnknownCategory(String),

    #[error("categories cannot be reordered in the board view")]
    CategoriesUnavailable,

    #[error("column {0} cannot be dragged")]
    NotDraggable(String),
}
