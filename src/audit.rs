//! Audit logging for authorization decisions and pinned-token lifecycle.
//!
//! Every event is emitted via `tracing::info!` with structured fields, making
//! the audit trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `auth.allowed` | A policy handler granted a credential |
//! | `auth.denied` | A handler refused, or no handler was found |
//! | `auth.pinned` | A request was answered from a pinned token |
//! | `auth.dropped` | A request was not answered (decode or signing failure) |
//! | `token.pinned` | A pinned token was minted for an account |
//! | `token.revoked` | A pinned token was removed |

use nats_claims::AuthorizationRequestClaims;
use serde::Serialize;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"auth.allowed"`).
    pub event: &'static str,
    /// Client key the credential is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_nkey: Option<String>,
    /// Target account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Client host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_host: Option<String>,
    /// Username from the connect options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Server that forwarded the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Denial or failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            user_nkey: None,
            account: None,
            client_host: None,
            username: None,
            server: None,
            reason: None,
        }
    }

    fn for_request(event: &'static str, request: &AuthorizationRequestClaims) -> Self {
        let req = &request.nats;
        Self {
            user_nkey: non_empty(&req.user_nkey),
            client_host: non_empty(&req.client_info.host),
            username: non_empty(&req.connect_opts.username),
            server: non_empty(&req.server_id.id),
            ..Self::new(event)
        }
    }

    /// Construct an `auth.allowed` event.
    #[must_use]
    pub fn allowed(request: &AuthorizationRequestClaims, account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..Self::for_request("auth.allowed", request)
        }
    }

    /// Construct an `auth.denied` event.
    #[must_use]
    pub fn denied(request: &AuthorizationRequestClaims, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::for_request("auth.denied", request)
        }
    }

    /// Construct an `auth.pinned` event.
    #[must_use]
    pub fn pinned(request: &AuthorizationRequestClaims, account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..Self::for_request("auth.pinned", request)
        }
    }

    /// Construct an `auth.dropped` event. The request may not have decoded.
    #[must_use]
    pub fn dropped(request: Option<&AuthorizationRequestClaims>, reason: impl Into<String>) -> Self {
        let base = match request {
            Some(request) => Self::for_request("auth.dropped", request),
            None => Self::new("auth.dropped"),
        };
        Self {
            reason: Some(reason.into()),
            ..base
        }
    }

    /// Construct a `token.pinned` event.
    #[must_use]
    pub fn token_pinned(account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..Self::new("token.pinned")
        }
    }

    /// Construct a `token.revoked` event.
    #[must_use]
    pub fn token_revoked(account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..Self::new("token.revoked")
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO nats_callout::audit audit={"event":"auth.allowed","user_nkey":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "callout audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::request_claims;

    #[test]
    fn allowed_event_carries_request_fields() {
        // GIVEN: a request from alice on 10.0.0.5
        let claims = request_claims("alice", "10.0.0.5");

        // WHEN
        let event = AuditEvent::allowed(&claims, "APP");

        // THEN
        assert_eq!(event.event, "auth.allowed");
        assert_eq!(event.account.as_deref(), Some("APP"));
        assert_eq!(event.username.as_deref(), Some("alice"));
        assert_eq!(event.client_host.as_deref(), Some("10.0.0.5"));
        assert!(event.reason.is_none());
    }

    #[test]
    fn empty_fields_are_omitted() {
        let claims = request_claims("", "");
        let json = serde_json::to_value(AuditEvent::denied(&claims, "no handler")).unwrap();

        assert_eq!(json["event"], "auth.denied");
        assert_eq!(json["reason"], "no handler");
        assert!(json.get("client_host").is_none());
        assert!(json.get("username").is_none());
    }

    #[test]
    fn dropped_event_without_request() {
        let event = AuditEvent::dropped(None, "invalid token format");

        assert_eq!(event.event, "auth.dropped");
        assert!(event.user_nkey.is_none());
        assert_eq!(event.reason.as_deref(), Some("invalid token format"));
    }

    #[test]
    fn token_events_name_the_account() {
        assert_eq!(AuditEvent::token_pinned("ACC1").account.as_deref(), Some("ACC1"));
        assert_eq!(AuditEvent::token_revoked("ACC1").event, "token.revoked");
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::pinned(&request_claims("alice", ""), "ACC1"));
    }
}
