use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error kind used for user-facing handling and retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeErrorKind {
    /// Transport-level failure before any HTTP response arrived.
    NetworkError,
    /// No response within the configured request timeout.
    Timeout,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403 without the session-locked protocol code.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 429. Never retried automatically.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// Any other HTTP 4xx.
    ClientError,
    /// A 2xx response whose body was not valid JSON.
    ParseError,
}

/// Classified error surfaced by bridge calls.
///
/// Carries enough structure (kind, HTTP status, retry hint, correlation id)
/// for callers to render specific messaging without string-parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct BridgeError {
    /// High-level error kind.
    pub kind: BridgeErrorKind,
    /// HTTP status when the bridge answered at all.
    pub http_status: Option<u16>,
    /// Whether the request engine may retry this failure.
    pub retryable: bool,
    /// Human-readable message.
    pub message: String,
    /// Correlation id of the logical request, stable across retry attempts.
    pub correlation_id: Option<String>,
    /// Cooldown hint in seconds; only meaningful for `RateLimited`.
    pub retry_after_secs: Option<u64>,
}

impl BridgeError {
    /// Construct a non-retryable error of the given kind.
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            retryable: false,
            message: message.into(),
            correlation_id: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_retry_after_secs(mut self, retry_after_secs: u64) -> Self {
        self.retry_after_secs = Some(retry_after_secs);
        self
    }
}

/// Protocol signal raised for HTTP 403 with body code `session_locked`.
///
/// Deliberately a distinct type rather than a [`BridgeError`] kind: it is
/// terminal for the attempt, never retried, and never constructed from a
/// plain 403.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("session locked: {message}")]
pub struct SessionLocked {
    /// Always [`SessionLocked::CODE`].
    pub code: String,
    /// Always 403.
    pub http_status: u16,
    /// Human-readable message from the bridge.
    pub message: String,
    /// Correlation id of the logical request that hit the lock.
    pub correlation_id: Option<String>,
}

impl SessionLocked {
    /// Body code the bridge pairs with HTTP 403 to signal a locked session.
    pub const CODE: &'static str = "session_locked";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: Self::CODE.to_owned(),
            http_status: 403,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Failure union returned by client operations.
///
/// Callers are expected to branch on the variants: `SessionLocked` redirects
/// to the unlock flow, `RateLimited` inside `Bridge` drives a countdown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeCallError {
    /// Classified request failure.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// The identity session is locked; run the unlock flow before retrying.
    #[error(transparent)]
    SessionLocked(#[from] SessionLocked),
}

impl BridgeCallError {
    /// The classified error, unless this is the session-locked signal.
    pub fn as_bridge(&self) -> Option<&BridgeError> {
        match self {
            Self::Bridge(error) => Some(error),
            Self::SessionLocked(_) => None,
        }
    }
}

/// Wire shape of a bridge error body: `{error?, message?, code?, retryAfter?}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub code: Option<String>,
    pub retry_after: Option<f64>,
}

impl ErrorBody {
    /// Best-effort human message, falling back to `HTTP <status>`.
    pub fn display_message(&self, status: u16) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| format!("HTTP {status}"))
    }

    /// Numeric `retryAfter` as whole seconds, when present and sane.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value.round() as u64)
    }
}

/// Map a non-success HTTP status to an error kind and retryability verdict.
///
/// 429 maps to `RateLimited` with `retryable == false`: automatic retries
/// would prolong the lockout.
pub fn classify_http_status(status: u16) -> (BridgeErrorKind, bool) {
    match status {
        401 => (BridgeErrorKind::Unauthorized, false),
        403 => (BridgeErrorKind::Forbidden, false),
        404 => (BridgeErrorKind::NotFound, false),
        429 => (BridgeErrorKind::RateLimited, false),
        500..=599 => (BridgeErrorKind::ServerError, true),
        _ => (BridgeErrorKind::ClientError, false),
    }
}
