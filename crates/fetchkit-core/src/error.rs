//! The `FetchError` sum type and its retryability classification.

use std::time::Duration;
use thiserror::Error;

/// Kind of low-level network failure, kept coarse on purpose: the retry
/// controller only needs to know the failure is transport-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// Connection refused by the remote.
    Refused,
    /// Connection reset or aborted mid-flight.
    Reset,
    /// Connection closed before a complete response.
    Closed,
    /// Protocol-level error (malformed response, bad frame).
    Protocol,
    /// Anything else the transport reported.
    Other,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkErrorKind::Refused => "refused",
            NetworkErrorKind::Reset => "reset",
            NetworkErrorKind::Closed => "closed",
            NetworkErrorKind::Protocol => "protocol",
            NetworkErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Every way a fetch can fail.
///
/// The type is `Clone` so the deduplicator can broadcast one failure to
/// every waiter, and each variant carries just enough context to explain
/// itself. Use [`FetchError::category`] and [`FetchError::is_retryable`]
/// rather than matching variants when deciding control flow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Non-retryable 4xx response (other than the dedicated variants).
    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    /// 5xx response.
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// HTTP 429, optionally with the server-suggested wait.
    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 401/403, or FTP 530.
    #[error("authentication failed: status {status}")]
    Auth { status: u16 },

    /// HTTP 404 / FTP 550.
    #[error("resource not found: {url}")]
    NotFound { url: String },

    /// Any of the three timeouts (connect, read, total) elapsed.
    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Transport-level failure below HTTP/FTP semantics.
    #[error("network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Hostname resolution failed.
    #[error("DNS resolution failed for {host}")]
    Dns { host: String },

    /// TLS handshake or certificate failure.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// Content could not be parsed or transformed. Never retried.
    #[error("content error: {message}")]
    Content { message: String },

    /// Post-download integrity check failed. Never retried; the partial
    /// file is left on disk so a later attempt can resume.
    #[error("verification failed: expected {expected}, actual {actual}")]
    Verification { expected: String, actual: String },

    /// The per-host circuit breaker is open. Returned without consuming
    /// a retry attempt.
    #[error("circuit breaker open for host {host}")]
    CircuitOpen { host: String },

    /// The task was cancelled. Not a failure for breaker accounting.
    #[error("request cancelled")]
    Cancelled,

    /// The URL failed validation or normalization.
    #[error("invalid URL: {reason}")]
    InvalidUrl { reason: String },

    /// Local filesystem failure during a download or cache operation.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// FTP control- or data-channel failure not covered above.
    #[error("FTP error: {message}")]
    Ftp { message: String },

    /// Catch-all; carries whatever the lower layer reported.
    #[error("{message}")]
    Unknown { message: String },
}

/// Coarse error classification used by the retry controller and the
/// metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ClientError,
    Auth,
    RateLimit,
    ServerError,
    Timeout,
    Network,
    Dns,
    Tls,
    Content,
    Verification,
    CircuitOpen,
    Cancelled,
    Validation,
    Io,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Dns => "dns",
            ErrorCategory::Tls => "tls",
            ErrorCategory::Content => "content",
            ErrorCategory::Verification => "verification",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Io => "io",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FetchError {
    /// Builds the right variant for a non-2xx HTTP status.
    pub fn from_status(status: u16, url: &str, retry_after: Option<Duration>) -> FetchError {
        match status {
            401 | 403 => FetchError::Auth { status },
            404 => FetchError::NotFound {
                url: url.to_string(),
            },
            408 => FetchError::Timeout {
                elapsed: Duration::ZERO,
            },
            429 => FetchError::RateLimited { retry_after },
            s if (400..500).contains(&s) => FetchError::Client { status },
            s if s >= 500 => FetchError::Server { status },
            s => FetchError::Unknown {
                message: format!("unexpected status {s}"),
            },
        }
    }

    /// The HTTP-ish status this error maps to, when it has one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Client { status } | FetchError::Server { status } => Some(*status),
            FetchError::Auth { status } => Some(*status),
            FetchError::RateLimited { .. } => Some(429),
            FetchError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Client { .. } => ErrorCategory::ClientError,
            FetchError::Server { .. } => ErrorCategory::ServerError,
            FetchError::RateLimited { .. } => ErrorCategory::RateLimit,
            FetchError::Auth { .. } => ErrorCategory::Auth,
            FetchError::NotFound { .. } => ErrorCategory::ClientError,
            FetchError::Timeout { .. } => ErrorCategory::Timeout,
            FetchError::Network { .. } => ErrorCategory::Network,
            FetchError::Dns { .. } => ErrorCategory::Dns,
            FetchError::Tls { .. } => ErrorCategory::Tls,
            FetchError::Content { .. } => ErrorCategory::Content,
            FetchError::Verification { .. } => ErrorCategory::Verification,
            FetchError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            FetchError::Cancelled => ErrorCategory::Cancelled,
            FetchError::InvalidUrl { .. } => ErrorCategory::Validation,
            FetchError::Io { .. } => ErrorCategory::Io,
            FetchError::Ftp { .. } => ErrorCategory::Network,
            FetchError::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether the retry controller may re-attempt after this error.
    ///
    /// 407 (proxy auth) is deliberately retryable: proxies recover, and
    /// the credential provider may refresh between attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Client { status } => *status == 407,
            FetchError::Server { .. }
            | FetchError::RateLimited { .. }
            | FetchError::Timeout { .. }
            | FetchError::Network { .. }
            | FetchError::Dns { .. } => true,
            FetchError::Ftp { .. } => true,
            _ => false,
        }
    }

    /// The server-suggested wait, when one was attached (429 handling).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io {
            message: err.to_string(),
        }
    }
}
