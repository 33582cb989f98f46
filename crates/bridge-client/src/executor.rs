//! Request execution: headers, timeout, classification, bounded retries.

use std::sync::Arc;
use std::time::Duration;

use bridge_core::{
    BridgeCallError, BridgeError, BridgeErrorKind, BridgeUiStatus, ErrorBody, RetryPolicy,
    SessionLocked, StatusResponse, classify_http_status,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{BridgeClientConfig, TokenProvider, UserIdProvider};

const HEADER_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const HEADER_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
const HEADER_API_KEY: HeaderName = HeaderName::from_static("apikey");
const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

const MISSING_TOKEN_CODE: &str = "missing_token";
const PARSE_PREVIEW_CHARS: usize = 120;

pub(crate) const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Statuses that may be retried even for non-idempotent requests.
///
/// 429 is listed for parity with the upstream contract, but `RateLimited`
/// is classified non-retryable, so it never passes the retryable gate.
fn status_allows_retry(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// One logical request.
///
/// Immutable for the lifetime of one call; retried attempts reuse the same
/// correlation id.
#[derive(Debug, Clone)]
pub(crate) struct BridgeRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    correlation_id: String,
}

impl BridgeRequest {
    pub(crate) fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None)
    }

    pub(crate) fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path, Some(body))
    }

    pub(crate) fn post_empty(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path, None)
    }

    fn new(method: Method, path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// GET/HEAD/OPTIONS are safe to repeat without duplicating side effects.
    fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

/// Serialize one of our own wire structs into a request body value.
///
/// These structs contain only strings, numbers and renamed enums, so
/// serialization cannot fail in practice.
pub(crate) fn json_body<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Closed set of transport-level failures.
///
/// Every error the HTTP layer can produce is translated into one of these
/// before the retry logic sees it.
#[derive(Debug)]
enum TransportFailure {
    Timeout,
    Cancelled,
    Network(String),
}

fn translate_transport_error(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout
    } else {
        TransportFailure::Network(err.to_string())
    }
}

/// Response snapshot with the headers the classifier cares about.
struct RawResponse {
    status: StatusCode,
    retry_after: Option<String>,
    rate_limit_reset: Option<String>,
    body: String,
}

/// Drives one logical request through header construction, timeout,
/// classification and bounded retries.
pub(crate) struct RequestExecutor {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    timeout: Duration,
    token_provider: Arc<dyn TokenProvider>,
    user_id_provider: Option<Arc<dyn UserIdProvider>>,
    api_key: Option<String>,
    cancel: CancellationToken,
}

impl RequestExecutor {
    pub(crate) fn new(config: BridgeClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            retry: config.retry,
            timeout: config.timeout,
            token_provider: config.token_provider,
            user_id_provider: config.user_id_provider,
            api_key: config.api_key,
            cancel: config.cancel,
        }
    }

    /// Run one logical request to completion: a parsed response, a classified
    /// error, or the session-locked signal.
    pub(crate) async fn execute<T: DeserializeOwned>(
        &self,
        request: BridgeRequest,
    ) -> Result<T, BridgeCallError> {
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let outcome = self.attempt_once(&request).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(raw) if raw.status.is_success() => {
                    tracing::debug!(
                        correlation_id = %request.correlation_id,
                        path = %request.path,
                        status = raw.status.as_u16(),
                        latency_ms,
                        attempt,
                        "bridge request ok"
                    );
                    return parse_success_body(&raw.body, &request).map_err(BridgeCallError::from);
                }
                Ok(raw) => classify_error_response(&request, &raw)?,
                Err(failure) => classify_transport_failure(&request, failure),
            };

            let retry = error.retryable
                && (request.is_idempotent() || error.http_status.is_some_and(status_allows_retry))
                && attempt < self.retry.max_retries();

            tracing::debug!(
                correlation_id = %request.correlation_id,
                path = %request.path,
                kind = ?error.kind,
                status = error.http_status,
                latency_ms,
                attempt,
                retry,
                "bridge request failed"
            );

            if !retry {
                return Err(BridgeCallError::Bridge(error));
            }

            sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    /// One raw `/status` attempt classified for the status cache; no retries.
    ///
    /// The status cache applies its own policy (freshness, cooldown,
    /// single-flight) instead of the executor's retry loop.
    pub(crate) async fn status_probe(&self) -> BridgeUiStatus {
        let request = BridgeRequest::get(crate::STATUS_PATH);
        let started = Instant::now();
        let outcome = self.attempt_once(&request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(raw) => {
                tracing::debug!(
                    correlation_id = %request.correlation_id,
                    status = raw.status.as_u16(),
                    latency_ms,
                    "status probe"
                );
                classify_status_probe(&raw)
            }
            Err(failure) => {
                tracing::debug!(
                    correlation_id = %request.correlation_id,
                    failure = ?failure,
                    latency_ms,
                    "status probe failed"
                );
                let message = match failure {
                    TransportFailure::Timeout => "request timed out".to_owned(),
                    TransportFailure::Cancelled => "request cancelled".to_owned(),
                    TransportFailure::Network(message) => message,
                };
                BridgeUiStatus::Error {
                    http_status: None,
                    message: Some(message),
                }
            }
        }
    }

    /// One network attempt under the per-request timeout, raced against the
    /// client cancellation token. Token and user id are fetched fresh here so
    /// a stale token is never retried blindly.
    async fn attempt_once(&self, request: &BridgeRequest) -> Result<RawResponse, TransportFailure> {
        let token = self.token_provider.access_token().await;
        let user_id = match &self.user_id_provider {
            Some(provider) => provider.user_id().await,
            None => None,
        };
        let headers = build_headers(
            &request.correlation_id,
            token.as_deref(),
            user_id.as_deref(),
            self.api_key.as_deref(),
        );

        let url = endpoint_url(&self.base_url, &request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportFailure::Cancelled),
            sent = builder.send() => sent.map_err(translate_transport_error)?,
        };

        let status = response.status();
        let retry_after = header_string(response.headers(), RETRY_AFTER.as_str());
        let rate_limit_reset = header_string(response.headers(), HEADER_RATE_LIMIT_RESET);
        let body = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportFailure::Cancelled),
            text = response.text() => text.map_err(translate_transport_error)?,
        };

        Ok(RawResponse {
            status,
            retry_after,
            rate_limit_reset,
            body,
        })
    }
}

/// Deterministic merge of the standard request headers.
///
/// Values that cannot be represented as header values are skipped with a
/// warning rather than failing the request.
fn build_headers(
    correlation_id: &str,
    token: Option<&str>,
    user_id: Option<&str>,
    api_key: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    insert_header(&mut headers, HEADER_REQUEST_ID, correlation_id);
    if let Some(token) = token {
        insert_header(&mut headers, AUTHORIZATION, &format!("Bearer {token}"));
    }
    if let Some(user_id) = user_id {
        insert_header(&mut headers, HEADER_USER_ID, user_id);
    }
    if let Some(api_key) = api_key {
        insert_header(&mut headers, HEADER_API_KEY, api_key);
    }

    headers
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            tracing::warn!(header = %name, "skipping header with invalid value");
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn parse_success_body<T: DeserializeOwned>(
    body: &str,
    request: &BridgeRequest,
) -> Result<T, BridgeError> {
    serde_json::from_str(body).map_err(|err| {
        let preview: String = body.chars().take(PARSE_PREVIEW_CHARS).collect();
        BridgeError::new(
            BridgeErrorKind::ParseError,
            format!(
                "invalid JSON in {}-byte response: {err}; body starts with {preview:?}",
                body.len()
            ),
        )
        .with_correlation_id(&request.correlation_id)
    })
}

/// Classify a non-success response, raising the session-locked signal before
/// the generic table is consulted.
fn classify_error_response(
    request: &BridgeRequest,
    raw: &RawResponse,
) -> Result<BridgeError, SessionLocked> {
    let status = raw.status.as_u16();
    let body: ErrorBody = serde_json::from_str(&raw.body).unwrap_or_default();
    let message = body.display_message(status);

    if status == 403 && body.code.as_deref() == Some(SessionLocked::CODE) {
        return Err(SessionLocked::new(message).with_correlation_id(&request.correlation_id));
    }

    let (kind, retryable) = classify_http_status(status);
    let mut error = BridgeError::new(kind, message)
        .with_status(status)
        .retryable(retryable)
        .with_correlation_id(&request.correlation_id);

    if kind == BridgeErrorKind::RateLimited {
        let secs = extract_retry_after_secs(
            body.retry_after_secs(),
            raw.retry_after.as_deref(),
            raw.rate_limit_reset.as_deref(),
        )
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        error = error.with_retry_after_secs(secs);
    }

    Ok(error)
}

fn classify_transport_failure(request: &BridgeRequest, failure: TransportFailure) -> BridgeError {
    let retryable = request.is_idempotent();
    let error = match failure {
        TransportFailure::Timeout => BridgeError::new(
            BridgeErrorKind::Timeout,
            format!("no response within timeout for {}", request.path),
        )
        .retryable(retryable),
        // External cancellation is terminal; it must not re-enter the retry loop.
        TransportFailure::Cancelled => {
            BridgeError::new(BridgeErrorKind::NetworkError, "request cancelled by caller")
        }
        TransportFailure::Network(message) => {
            BridgeError::new(BridgeErrorKind::NetworkError, message).retryable(retryable)
        }
    };
    error.with_correlation_id(&request.correlation_id)
}

/// Classify a raw `/status` response for the status cache.
fn classify_status_probe(raw: &RawResponse) -> BridgeUiStatus {
    let status = raw.status.as_u16();

    if raw.status.is_success() {
        return match serde_json::from_str::<StatusResponse>(&raw.body) {
            Ok(parsed) => BridgeUiStatus::Ok {
                state: parsed.state,
            },
            Err(err) => BridgeUiStatus::Error {
                http_status: Some(status),
                message: Some(format!("invalid status body: {err}")),
            },
        };
    }

    let body: ErrorBody = serde_json::from_str(&raw.body).unwrap_or_default();
    match status {
        401 => {
            if body.code.as_deref() == Some(MISSING_TOKEN_CODE) {
                BridgeUiStatus::LoginRequired
            } else {
                BridgeUiStatus::TokenInvalid
            }
        }
        429 => {
            let retry_after_secs = extract_retry_after_secs(
                body.retry_after_secs(),
                raw.retry_after.as_deref(),
                raw.rate_limit_reset.as_deref(),
            )
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            BridgeUiStatus::RateLimited {
                retry_after_secs,
                retry_until_ms: epoch_ms_now().saturating_add(retry_after_secs * 1_000),
            }
        }
        _ => BridgeUiStatus::Error {
            http_status: Some(status),
            message: Some(body.display_message(status)),
        },
    }
}

/// Resolve a rate-limit cooldown in seconds.
///
/// Precedence: numeric body field, `Retry-After` as integer seconds,
/// `Retry-After` as an HTTP date, `X-RateLimit-Reset` as epoch seconds.
pub(crate) fn extract_retry_after_secs(
    body_retry_after: Option<u64>,
    retry_after_header: Option<&str>,
    rate_limit_reset: Option<&str>,
) -> Option<u64> {
    if let Some(secs) = body_retry_after {
        return Some(secs);
    }

    if let Some(value) = retry_after_header {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(secs);
        }
        if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
            let remaining = date.signed_duration_since(chrono::Utc::now()).num_seconds();
            return Some(remaining.max(0) as u64);
        }
    }

    if let Some(value) = rate_limit_reset {
        if let Ok(epoch_secs) = value.trim().parse::<i64>() {
            let remaining = epoch_secs - chrono::Utc::now().timestamp();
            return Some(remaining.max(0) as u64);
        }
    }

    None
}

fn epoch_ms_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
