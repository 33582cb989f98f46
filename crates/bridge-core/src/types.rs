use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection state reported by the bridge `/status` endpoint.
///
/// The state machine is owned by the server; clients report it verbatim and
/// never enforce transitions locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No private connection is active.
    Idle,
    /// A connect intent is being negotiated.
    Connecting,
    /// The private connection is established.
    Secure,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub time: String,
}

/// `GET /status` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: ConnectionState,
    #[serde(default)]
    pub connected_at: Option<String>,
}

/// Versioned client-to-bridge connect envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectIntent {
    pub v: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub target_url: String,
}

impl ConnectIntent {
    pub const KIND: &'static str = "connect_intent";
    pub const SCHEMA_VERSION: u32 = 1;

    pub fn new(request_id: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            v: Self::SCHEMA_VERSION,
            kind: Self::KIND.to_owned(),
            request_id: request_id.into(),
            target_url: target_url.into(),
        }
    }
}

/// Reasons a connect acknowledgement fails validation against its intent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectAckError {
    #[error("unexpected ack message type '{0}'")]
    WrongKind(String),
    #[error("ack request id '{got}' does not match intent '{want}'")]
    RequestIdMismatch { want: String, got: String },
    #[error("bridge rejected connect intent: {0}")]
    Rejected(String),
}

/// Bridge-to-client acknowledgement for a connect intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAck {
    #[serde(default)]
    pub v: u32,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub request_id: String,
    pub ack: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub server_time: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl ConnectAck {
    pub const KIND: &'static str = "connect_ack";

    /// Check that this acknowledgement confirms the given intent.
    pub fn confirms(&self, intent: &ConnectIntent) -> Result<(), ConnectAckError> {
        if self.kind != Self::KIND {
            return Err(ConnectAckError::WrongKind(self.kind.clone()));
        }
        if self.request_id != intent.request_id {
            return Err(ConnectAckError::RequestIdMismatch {
                want: intent.request_id.clone(),
                got: self.request_id.clone(),
            });
        }
        if !self.ack {
            let reason = self
                .error_code
                .clone()
                .unwrap_or_else(|| "connection rejected".to_owned());
            return Err(ConnectAckError::Rejected(reason));
        }
        Ok(())
    }
}

/// `POST /disconnect` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
    pub state: ConnectionState,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /unlock/status` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnlockStatusResponse {
    pub locked: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// `POST /unlock` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub password: String,
}

/// `POST /unlock` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub success: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// `POST /lock` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    pub locked: bool,
}

/// Scope a messaging session is issued for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPurpose {
    /// Inbox, thread and ack operations.
    MessageReceive,
    /// Send operations.
    MessageSend,
}

/// `POST /session/issue` request body.
///
/// A `None` conversation id serializes as an explicit `null`, which the
/// bridge reads as queue-wide scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueSessionRequest {
    pub purpose: SessionPurpose,
    pub conversation_id: Option<String>,
}

/// `POST /session/issue` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    pub session_id: String,
    #[serde(default)]
    pub server_time: Option<String>,
}

/// Delivery state of a message envelope.
///
/// "Consumed" is delivery bookkeeping, not a read receipt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Available,
    Consumed,
}

/// Canonical message envelope returned by inbox and thread queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    pub conversation_id: String,
    /// Opaque base64 payload; this layer never decrypts it.
    pub payload_ciphertext_b64: String,
    pub envelope_fingerprint: String,
    pub created_at_unix: i64,
    pub expires_at_unix: i64,
    pub state: MessageState,
}

/// `POST /message/inbox` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboxRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// `POST /message/inbox` response: available-only items, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboxResponse {
    /// `null` on an empty queue.
    #[serde(default)]
    pub items: Option<Vec<MessageItem>>,
    #[serde(default)]
    pub server_time: Option<String>,
}

impl InboxResponse {
    /// Items in bridge order (newest first), with `null` normalized away.
    pub fn into_items(self) -> Vec<MessageItem> {
        self.items.unwrap_or_default()
    }
}

/// `POST /message/thread` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRequest {
    pub session_id: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Defaults to `true` on the bridge when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_consumed: Option<bool>,
}

/// `POST /message/thread` response: full history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    /// `null` on an empty thread.
    #[serde(default)]
    pub items: Option<Vec<MessageItem>>,
    #[serde(default)]
    pub server_time: Option<String>,
}

impl ThreadResponse {
    /// Items in bridge order (newest first), with `null` normalized away.
    pub fn into_items(self) -> Vec<MessageItem> {
        self.items.unwrap_or_default()
    }
}

/// `POST /message/send` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub session_id: String,
    /// Bridge-assigned; never derived client-side.
    pub conversation_id: String,
    pub plaintext_b64: String,
}

/// `POST /message/send` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub status: String,
    #[serde(default)]
    pub server_time: Option<String>,
}

/// `POST /message/ack` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub session_id: String,
    pub conversation_id: String,
    pub envelope_fingerprints: Vec<String>,
}

/// `POST /message/ack` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    /// Number of fingerprints transitioned to consumed.
    pub acked: u64,
    #[serde(default)]
    pub server_time: Option<String>,
}

/// Classified `/status` outcome shared across independent status callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeUiStatus {
    /// The bridge answered 200 with a connection state.
    Ok { state: ConnectionState },
    /// 401 with body code `missing_token`: no bearer token was presented.
    LoginRequired,
    /// 401 with any other code: the presented token was rejected.
    TokenInvalid,
    /// 429: hold off until `retry_until_ms` (epoch milliseconds).
    #[serde(rename_all = "camelCase")]
    RateLimited {
        retry_after_secs: u64,
        retry_until_ms: u64,
    },
    /// Any other failure, HTTP or transport.
    #[serde(rename_all = "camelCase")]
    Error {
        http_status: Option<u16>,
        message: Option<String>,
    },
}
