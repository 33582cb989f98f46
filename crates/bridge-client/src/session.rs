//! Scope-bound session issuance for messaging operations.

use bridge_core::{BridgeCallError, IssueSessionRequest, IssuedSession, SessionPurpose};

use crate::executor::{BridgeRequest, RequestExecutor, json_body};

/// Requests a fresh, scope-bound session from the bridge.
///
/// Every messaging operation issues its own session immediately before the
/// underlying call; sessions are never cached or shared between two logical
/// operations.
pub(crate) struct SessionIssuer<'a> {
    executor: &'a RequestExecutor,
}

impl<'a> SessionIssuer<'a> {
    pub(crate) fn new(executor: &'a RequestExecutor) -> Self {
        Self { executor }
    }

    /// `POST /session/issue` through the request engine, inheriting its
    /// retry and timeout behavior.
    pub(crate) async fn issue(
        &self,
        purpose: SessionPurpose,
        conversation_id: Option<&str>,
    ) -> Result<IssuedSession, BridgeCallError> {
        let body = IssueSessionRequest {
            purpose,
            conversation_id: conversation_id.map(ToOwned::to_owned),
        };
        self.executor
            .execute(BridgeRequest::post(
                crate::SESSION_ISSUE_PATH,
                json_body(&body),
            ))
            .await
    }
}
