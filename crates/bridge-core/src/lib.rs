//! Core bridge contract shared between the request engine and its consumers.
//!
//! This crate defines the wire payload types, the error taxonomy with HTTP
//! classification, and the retry/backoff policy.

/// Stable error types, the session-locked signal, and HTTP classification.
pub mod error;
/// Backoff policy used by the request retry loop.
pub mod retry;
/// Wire payload types (requests, responses, status classification).
pub mod types;

pub use error::{
    BridgeCallError, BridgeError, BridgeErrorKind, ErrorBody, SessionLocked, classify_http_status,
};
pub use retry::RetryPolicy;
pub use types::{
    AckRequest, AckResponse, BridgeUiStatus, ConnectAck, ConnectAckError, ConnectIntent,
    ConnectionState, DisconnectResponse, HealthResponse, InboxRequest, InboxResponse,
    IssueSessionRequest, IssuedSession, LockResponse, MessageItem, MessageState, SendMessageRequest,
    SendMessageResponse, SessionPurpose, StatusResponse, ThreadRequest, ThreadResponse,
    UnlockRequest, UnlockResponse, UnlockStatusResponse,
};
