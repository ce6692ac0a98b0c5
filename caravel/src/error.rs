use std::fmt;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a gateway handed back instead of the requested bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// 200 OK with an HTML error page in the body.
    HtmlBody,
    /// Empty body.
    EmptyBody,
    /// Non-success status.
    Status(u16),
    /// Body larger than the caller's size limit.
    TooLarge(usize),
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayErrorKind::HtmlBody => write!(f, "html error page"),
            GatewayErrorKind::EmptyBody => write!(f, "empty body"),
            GatewayErrorKind::Status(status) => write!(f, "status {}", status),
            GatewayErrorKind::TooLarge(size) => write!(f, "{} bytes exceeds the size limit", size),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid cid: {0}")]
    InvalidCid(String),

    #[error("invalid backup metadata: {0}")]
    InvalidMetadata(String),

    #[error(transparent)]
    Car(#[from] caravel_car::Error),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("upload of {name} failed: {reason}")]
    UploadFailed {
        name: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("listing the space failed: {reason}")]
    ListFailed {
        reason: String,
        status: Option<u16>,
    },

    #[error("download of {cid} failed: {reason}")]
    DownloadFailed {
        cid: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("gateway {gateway} returned an error: {kind}")]
    Gateway {
        gateway: String,
        kind: GatewayErrorKind,
    },

    #[error("no backup found in space {space:?}")]
    NoBackupFound { space: String },

    #[error("all {failed} log heads failed to join")]
    AllHeadsFailed { failed: usize },

    #[error("restore recovered {actual} of {expected} entries")]
    VerificationFailed { expected: usize, actual: usize },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("network fetch failed and gateway fallback is disabled: {reason}")]
    GatewayFallbackDisabled { reason: String },

    #[error("engine: {0}")]
    Engine(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status attached to a remote fault, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::UploadFailed { status, .. }
            | Error::ListFailed { status, .. }
            | Error::DownloadFailed { status, .. } => *status,
            Error::Gateway {
                kind: GatewayErrorKind::Status(status),
                ..
            } => Some(*status),
            Error::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the fault is worth retrying.
    ///
    /// Classification is structural: timeouts and 429/503/504 retry, other
    /// 4xx and every data-integrity fault is terminal. Free-text matching is
    /// left to [`crate::retry::RetryConfig::retry_on`] and only ever applies
    /// to wrapped transport errors, so a CID that happens to contain "429"
    /// cannot trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::UploadFailed { status, .. }
            | Error::ListFailed { status, .. }
            | Error::DownloadFailed { status, .. } => match status {
                Some(status) => matches!(status, 429 | 503 | 504),
                // no status means the transport gave out below HTTP
                None => true,
            },
            Error::Gateway { kind, .. } => {
                matches!(kind, GatewayErrorKind::Status(429 | 503 | 504))
            }
            Error::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}
