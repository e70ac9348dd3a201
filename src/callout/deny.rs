use nats_claims::UserClaims;
use serde::Deserialize;

use super::CalloutError;
use crate::context::AppContext;
use crate::request::AuthorizationRequest;

/// Message returned when a deny handler has none configured.
pub const DEFAULT_DENY_MESSAGE: &str = "access denied";

/// Refuses every request it receives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenyCallout {
    /// Message shown to the client.
    #[serde(default)]
    pub message: Option<String>,
}

impl DenyCallout {
    /// A deny handler with a custom message.
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub(super) fn provision(&mut self, _ctx: &AppContext, _account: &str) -> crate::Result<()> {
        Ok(())
    }

    pub(super) fn handle(&self, request: &mut AuthorizationRequest) -> Result<UserClaims, CalloutError> {
        let message = self
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_DENY_MESSAGE);
        let info = &request.claims().nats.client_info;
        tracing::info!(host = %info.host, user = %info.user, reason = message, "denying access");
        Err(CalloutError::Denied(message.to_string()))
    }
}
