//! Callout handlers.
//!
//! A callout handler turns a matched [`AuthorizationRequest`] into either user
//! claims or a denial. Handlers are configured as a tagged map:
//!
//! ```yaml
//! handler:
//!   type: allow
//!   account: APP
//!   template:
//!     allow_pub: ["app.>"]
//! ```
//!
//! | `type` | Handler |
//! |--------|---------|
//! | `allow` | [`AllowCallout`] |
//! | `deny` | [`DenyCallout`] |
//! | `oauth2` | [`IdentityCallout`] |
//!
//! Every handler is provisioned once with the [`AppContext`] and the target
//! account of the policy that owns it, then shared read-only across requests.

mod allow;
mod deny;
mod identity;
pub mod session;

pub use allow::AllowCallout;
pub use deny::{DEFAULT_DENY_MESSAGE, DenyCallout};
pub use identity::{IdentityCallout, SESSION_PREFIX};

use nats_claims::UserClaims;
use serde::Deserialize;
use thiserror::Error;

use crate::context::AppContext;
use crate::request::AuthorizationRequest;

/// Target account used when neither the policy nor the handler names one.
pub const DEFAULT_ACCOUNT: &str = "{connect_opts.username}";

/// An authorization denial.
///
/// The `Display` text is sent back to the broker and shown to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalloutError {
    /// The broker did not forward a client key.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The target account resolved to an empty string.
    #[error("no target account specified")]
    NoTargetAccount,

    /// The connect token is not a valid session.
    #[error("unable to decode session state")]
    InvalidSession,

    /// Explicit denial.
    #[error("{0}")]
    Denied(String),

    /// The handler was used before being provisioned.
    #[error("handler not provisioned")]
    NotProvisioned,
}

/// A configured callout handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Callout {
    /// Grant access with optional template.
    Allow(AllowCallout),
    /// Refuse access.
    Deny(DenyCallout),
    /// Grant access from an identity-provider session.
    Oauth2(IdentityCallout),
}

impl Callout {
    /// Handler type name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Allow(_) => "allow",
            Self::Deny(_) => "deny",
            Self::Oauth2(_) => "oauth2",
        }
    }

    /// Resolve collaborators and bind the target account.
    pub fn provision(&mut self, ctx: &AppContext, account: &str) -> crate::Result<()> {
        match self {
            Self::Allow(c) => c.provision(ctx, account),
            Self::Deny(c) => c.provision(ctx, account),
            Self::Oauth2(c) => c.provision(ctx, account),
        }
    }

    /// Decide on a request.
    pub fn handle(&self, request: &mut AuthorizationRequest) -> Result<UserClaims, CalloutError> {
        match self {
            Self::Allow(c) => c.handle(request),
            Self::Deny(c) => c.handle(request),
            Self::Oauth2(c) => c.handle(request),
        }
    }
}

/// Resolve the target account of a handler and reject an empty result.
fn resolve_account(target: &str, request: &AuthorizationRequest) -> Result<String, CalloutError> {
    let account = request.replacer().replace_all(target, "");
    if account.is_empty() {
        return Err(CalloutError::NoTargetAccount);
    }
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::request_claims;

    #[test]
    fn parses_tagged_handlers() {
        // GIVEN: one handler of each type
        let allow: Callout = serde_yaml::from_str("type: allow\naccount: APP").unwrap();
        let deny: Callout = serde_yaml::from_str("type: deny").unwrap();
        let oauth: Callout = serde_yaml::from_str("type: oauth2\nendpoint: corp").unwrap();

        // THEN: the discriminant selects the variant
        assert_eq!(allow.kind(), "allow");
        assert_eq!(deny.kind(), "deny");
        assert_eq!(oauth.kind(), "oauth2");
    }

    #[test]
    fn rejects_unknown_handler_type() {
        let result: Result<Callout, _> = serde_yaml::from_str("type: maybe");
        assert!(result.is_err());
    }

    #[test]
    fn dispatches_to_variant() {
        let mut callout: Callout = serde_yaml::from_str("type: deny\nmessage: nope").unwrap();
        callout.provision(&AppContext::new(), DEFAULT_ACCOUNT).unwrap();
        let mut request = AuthorizationRequest::new(request_claims("alice", ""));

        let err = callout.handle(&mut request).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn default_account_is_username() {
        let request = AuthorizationRequest::new(request_claims("alice", ""));
        assert_eq!(resolve_account(DEFAULT_ACCOUNT, &request).unwrap(), "alice");

        let anonymous = AuthorizationRequest::new(request_claims("", ""));
        assert_eq!(
            resolve_account(DEFAULT_ACCOUNT, &anonymous).unwrap_err(),
            CalloutError::NoTargetAccount
        );
    }
}
