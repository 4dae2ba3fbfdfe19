//! Error types for the slice store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error types that can occur in the slice store
///
/// Errors are `Clone` because the fetch coordinator hands one failure to
/// every caller that was waiting on the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object part has invalid size {size} (limit {limit})")]
    InvalidPartSize { size: u64, limit: u64 },

    #[error("IO error: {message}{}", cleanup_suffix(.cleanup))]
    Io {
        message: String,
        cleanup: Vec<String>,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Origin server returned 4xx error: {status} - {message}")]
    OriginClientError { status: u16, message: String },

    #[error("Origin server returned 5xx error: {status} - {message}")]
    OriginServerError { status: u16, message: String },

    #[error("Invalid byte range: {0}")]
    InvalidRange(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Object part is already cached: {0}")]
    AlreadyCached(String),

    #[error("Fetch coordinator is closed")]
    Closed,

    #[error("Internal error: {0}")]
    InternalError(String),
}

fn cleanup_suffix(cleanup: &[String]) -> String {
    if cleanup.is_empty() {
        String::new()
    } else {
        format!(" (cleanup failed: {})", cleanup.join("; "))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(err.to_string())
        } else {
            StoreError::io(err)
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl StoreError {
    /// Create an `Io` error with no cleanup failures attached
    pub fn io(err: impl std::fmt::Display) -> Self {
        StoreError::Io {
            message: err.to_string(),
            cleanup: Vec::new(),
        }
    }

    /// Attach the results of cleanup attempts to an error.
    ///
    /// Successful cleanups are dropped; failed ones are kept so a write whose
    /// rollback also failed reports both problems. Non-IO errors are turned
    /// into `Io` only when some cleanup failed.
    pub fn with_cleanup<I>(self, results: I) -> Self
    where
        I: IntoIterator<Item = std::io::Result<()>>,
    {
        let failed: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if failed.is_empty() {
            return self;
        }

        match self {
            StoreError::Io {
                message,
                mut cleanup,
            } => {
                cleanup.extend(failed);
                StoreError::Io { message, cleanup }
            }
            other => StoreError::Io {
                message: other.to_string(),
                cleanup: failed,
            },
        }
    }

    /// Whether this error means the object, part or metadata does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether the requested bytes lie past the end of the object
    pub fn is_range_not_satisfiable(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidRange(_) | StoreError::OriginClientError { status: 416, .. }
        )
    }

    /// Convert error to HTTP status code
    ///
    /// 4xx errors from origin pass through, other upstream failures become
    /// 502, timeouts 504, range errors 416 and everything else 500.
    pub fn to_http_status(&self) -> u16 {
        match self {
            StoreError::OriginClientError { status, .. } => *status,
            StoreError::OriginServerError { .. } => 502,
            StoreError::Upstream(_) => 502,
            StoreError::InvalidRange(_) => 416,
            StoreError::NotFound(_) => 404,
            StoreError::ParseError(_) => 502,
            StoreError::ConfigError(_)
            | StoreError::InvalidPartSize { .. }
            | StoreError::Io { .. }
            | StoreError::Serialization(_)
            | StoreError::AlreadyCached(_)
            | StoreError::Closed
            | StoreError::InternalError(_) => 500,
        }
    }

    /// Determine if the caller should fall back to an uncached direct fetch
    ///
    /// Storage and coordination failures do not say anything about the
    /// origin, so the request can still be served without the cache.
    /// Origin errors and invalid ranges must be returned to the client.
    pub fn fallback_to_direct_fetch(&self) -> bool {
        match self {
            StoreError::Io { .. }
            | StoreError::InvalidPartSize { .. }
            | StoreError::Serialization(_)
            | StoreError::Closed
            | StoreError::InternalError(_) => true,
            StoreError::NotFound(_) => true,
            _ => false,
        }
    }

    /// Create an OriginClientError from a status code and message
    pub fn origin_client_error(status: u16, message: impl Into<String>) -> Self {
        StoreError::OriginClientError {
            status,
            message: message.into(),
        }
    }

    /// Create an OriginServerError from a status code and message
    pub fn origin_server_error(status: u16, message: impl Into<String>) -> Self {
        StoreError::OriginServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an error from an HTTP status code
    ///
    /// Automatically categorizes as 4xx or 5xx error
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            StoreError::origin_client_error(status, message)
        } else if (500..600).contains(&status) {
            StoreError::origin_server_error(status, message)
        } else {
            StoreError::Upstream(format!("HTTP {}: {}", status, message))
        }
    }
}
