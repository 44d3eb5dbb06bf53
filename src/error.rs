use std::path::PathBuf;
use thiserror::Error;

/// Failure of a catalog search. Aborts the group that issued the query.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("malformed catalog response: {0}")]
    Malformed(String),
}

impl CatalogError {
    /// Timeouts, connection failures and 5xx answers are worth asking again for.
    /// The client never retries on its own, this is left to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed(_) => false,
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

#[derive(Error, Debug)]
#[error("unable to create directory {}: {source}", path.display())]
pub struct FilesystemError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Failure of a single file transfer. Never leaves the task it belongs to.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("transfer failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered HTTP {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("redirect failed: {0}")]
    Redirect(String),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::Status(status) => *status >= 500 || *status == 429,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            // A short body is usually a dropped connection
            Self::SizeMismatch { expected, actual } => actual < expected,
            Self::Redirect(_) | Self::Cancelled => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryable() {
        let err = CatalogError::Status {
            status: 503,
            url: "https://example.com".to_string(),
        };
        assert!(err.is_retryable());

        let err = CatalogError::Status {
            status: 401,
            url: "https://example.com".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!CatalogError::Malformed("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_transfer_retryable() {
        assert!(TransferError::Status(502).is_retryable());
        assert!(!TransferError::Status(404).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::Redirect("loop".to_string()).is_retryable());
        assert!(TransferError::SizeMismatch {
            expected: 10,
            actual: 4
        }
        .is_retryable());
        assert!(!TransferError::SizeMismatch {
            expected: 10,
            actual: 12
        }
        .is_retryable());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(TransferError::Io(io).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!TransferError::Io(io).is_retryable());
    }

    #[test]
    fn test_filesystem_error_message() {
        let err = FilesystemError {
            path: PathBuf::from("/root/products"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/root/products"));
    }
}
