//! Connection policies.
//!
//! # Evaluation
//!
//! Policies are evaluated in declaration order and the **first matching
//! policy** handles the request. A policy matches when every one of its
//! matchers matches; a policy without matchers never matches. When no policy
//! matches, the default handler decides, and without one the request is
//! refused with `no handler`.
//!
//! A matcher that fails to evaluate stops the evaluation: the request is
//! refused with an error naming the policy, instead of falling through to
//! later policies or the default handler.
//!
//! ```yaml
//! policies:
//!   - match:
//!       - username: alice
//!     handler:
//!       type: allow
//!       account: APP
//!   - account: "{oidc.session.team}"
//!     match:
//!       - connection_type: websocket
//!     handler:
//!       type: oauth2
//!       endpoint: corp
//! default_handler:
//!   type: deny
//!   message: no policy
//! ```

use nats_claims::UserClaims;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::callout::{Callout, CalloutError, DEFAULT_ACCOUNT};
use crate::context::AppContext;
use crate::matcher::{MatchError, Matcher, RequestMatcher};
use crate::request::AuthorizationRequest;

/// Why a policy list did not produce claims.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Nothing matched and no default handler is configured.
    #[error("no handler")]
    NoHandler,

    /// A matcher failed while evaluating policy `index`.
    #[error("policy {index}: {source}")]
    Match {
        /// Zero-based policy position.
        index: usize,
        /// Matcher failure.
        source: MatchError,
    },

    /// The selected handler refused the request.
    #[error(transparent)]
    Denied(#[from] CalloutError),
}

/// Configuration of one policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Target account for the handler. May contain placeholders.
    #[serde(default)]
    pub account: Option<String>,
    /// Matchers, all of which must match.
    #[serde(rename = "match", default)]
    pub matchers: Vec<Matcher>,
    /// Handler for matching requests.
    pub handler: Callout,
}

/// Matchers bound to one handler.
#[derive(Debug)]
pub struct Policy {
    matchers: Vec<Box<dyn RequestMatcher>>,
    callout: Callout,
}

impl Policy {
    /// A policy from already provisioned parts.
    #[must_use]
    pub fn new(matchers: Vec<Box<dyn RequestMatcher>>, callout: Callout) -> Self {
        Self { matchers, callout }
    }

    /// Build and provision a policy from configuration.
    pub fn from_config(config: &PolicyConfig, ctx: &AppContext) -> crate::Result<Self> {
        let mut callout = config.handler.clone();
        callout.provision(ctx, config.account.as_deref().unwrap_or(DEFAULT_ACCOUNT))?;
        let matchers = config
            .matchers
            .iter()
            .cloned()
            .map(|m| Box::new(m) as Box<dyn RequestMatcher>)
            .collect();
        Ok(Self::new(matchers, callout))
    }

    /// Whether every matcher matches. Empty policies never match.
    pub fn matches(&self, request: &AuthorizationRequest) -> Result<bool, MatchError> {
        if self.matchers.is_empty() {
            return Ok(false);
        }
        for matcher in &self.matchers {
            if !matcher.matches(request)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The handler of this policy.
    #[must_use]
    pub fn callout(&self) -> &Callout {
        &self.callout
    }

    /// One-line summary, e.g. `username+host -> allow`.
    #[must_use]
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self.matchers.iter().map(|m| m.name()).collect();
        let matchers = if names.is_empty() { "<never>".to_string() } else { names.join("+") };
        format!("{matchers} -> {}", self.callout.kind())
    }
}

/// Ordered policies with an optional fallback handler.
#[derive(Debug, Default)]
pub struct PolicyList {
    policies: Vec<Policy>,
    default: Option<Callout>,
}

impl PolicyList {
    /// A list from already provisioned parts.
    #[must_use]
    pub fn new(policies: Vec<Policy>, default: Option<Callout>) -> Self {
        Self { policies, default }
    }

    /// Build and provision every policy and the default handler.
    pub fn from_config(
        policies: &[PolicyConfig],
        default: Option<&Callout>,
        ctx: &AppContext,
    ) -> crate::Result<Self> {
        let policies = policies
            .iter()
            .enumerate()
            .map(|(i, config)| {
                Policy::from_config(config, ctx)
                    .map_err(|e| crate::Error::Config(format!("policy {i}: {e}")))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let default = match default {
            Some(handler) => {
                let mut handler = handler.clone();
                handler
                    .provision(ctx, DEFAULT_ACCOUNT)
                    .map_err(|e| crate::Error::Config(format!("default handler: {e}")))?;
                Some(handler)
            }
            None => None,
        };

        Ok(Self::new(policies, default))
    }

    /// Policies in evaluation order.
    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// The fallback handler.
    #[must_use]
    pub fn default_handler(&self) -> Option<&Callout> {
        self.default.as_ref()
    }

    /// Select the handler for `request` and let it decide.
    pub fn match_and_authorize(&self, request: &mut AuthorizationRequest) -> Result<UserClaims, PolicyError> {
        for (index, policy) in self.policies.iter().enumerate() {
            match policy.matches(request) {
                Ok(true) => {
                    debug!(policy = index, handler = policy.callout.kind(), "policy matched");
                    return Ok(policy.callout.handle(request)?);
                }
                Ok(false) => {}
                Err(source) => {
                    warn!(policy = index, error = %source, "matcher failed");
                    return Err(PolicyError::Match { index, source });
                }
            }
        }

        let Some(default) = &self.default else {
            debug!("no policy matched and no default handler");
            return Err(PolicyError::NoHandler);
        };
        debug!(handler = default.kind(), "using default handler");
        Ok(default.handle(request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callout::{AllowCallout, DenyCallout};
    use crate::request::tests::request_claims;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Failing;

    impl RequestMatcher for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn matches(&self, _request: &AuthorizationRequest) -> Result<bool, MatchError> {
            Err(MatchError {
                matcher: "failing".to_string(),
                reason: "backend unavailable".to_string(),
            })
        }
    }

    fn allow(account: &str) -> Callout {
        let mut callout = Callout::Allow(AllowCallout::new(account));
        callout.provision(&AppContext::new(), DEFAULT_ACCOUNT).unwrap();
        callout
    }

    fn username(name: &str) -> Box<dyn RequestMatcher> {
        Box::new(Matcher::Username(vec![name.to_string()]))
    }

    fn request(name: &str) -> AuthorizationRequest {
        AuthorizationRequest::new(request_claims(name, ""))
    }

    #[test]
    fn first_matching_policy_wins() {
        // GIVEN: two policies that both match alice
        let list = PolicyList::new(
            vec![
                Policy::new(vec![username("alice")], allow("FIRST")),
                Policy::new(vec![username("alice")], allow("SECOND")),
            ],
            None,
        );

        // WHEN
        let claims = list.match_and_authorize(&mut request("alice")).unwrap();

        // THEN: the earlier policy decides
        assert_eq!(claims.audience, "FIRST");
    }

    #[test]
    fn earlier_deny_wins_over_later_allow() {
        let list = PolicyList::new(
            vec![
                Policy::new(vec![username("alice")], Callout::Deny(DenyCallout::default())),
                Policy::new(vec![username("alice")], allow("APP")),
            ],
            None,
        );

        let err = list.match_and_authorize(&mut request("alice")).unwrap_err();
        assert_eq!(err.to_string(), "access denied");
    }

    #[test]
    fn all_matchers_must_match() {
        let host: Box<dyn RequestMatcher> = Box::new(Matcher::Host(vec!["10.0.0.5".to_string()]));
        let list = PolicyList::new(vec![Policy::new(vec![username("alice"), host], allow("APP"))], None);

        // alice from an in-process connection: host matcher fails
        let err = list.match_and_authorize(&mut request("alice")).unwrap_err();
        assert_eq!(err, PolicyError::NoHandler);
    }

    #[test]
    fn empty_policy_never_matches() {
        // GIVEN: a policy without matchers ahead of a default deny
        let list = PolicyList::new(
            vec![Policy::new(Vec::new(), allow("APP"))],
            Some(Callout::Deny(DenyCallout::with_message("fallback"))),
        );

        // WHEN/THEN: the default decides
        let err = list.match_and_authorize(&mut request("alice")).unwrap_err();
        assert_eq!(err.to_string(), "fallback");
    }

    #[test]
    fn no_match_without_default_is_no_handler() {
        let list = PolicyList::new(vec![Policy::new(vec![username("alice")], allow("APP"))], None);

        let err = list.match_and_authorize(&mut request("bob")).unwrap_err();
        assert_eq!(err, PolicyError::NoHandler);
        assert_eq!(err.to_string(), "no handler");
    }

    #[test]
    fn matcher_error_is_surfaced() {
        // GIVEN: a failing matcher ahead of a catch-all default
        let failing: Box<dyn RequestMatcher> = Box::new(Failing);
        let list = PolicyList::new(
            vec![
                Policy::new(vec![username("bob")], allow("BOB")),
                Policy::new(vec![failing], allow("APP")),
            ],
            Some(allow("DEFAULT")),
        );

        // WHEN
        let err = list.match_and_authorize(&mut request("alice")).unwrap_err();

        // THEN: the failure names the policy and the default is not used
        assert!(matches!(err, PolicyError::Match { index: 1, .. }));
        assert_eq!(
            err.to_string(),
            "policy 1: failing matcher failed: backend unavailable"
        );
    }

    #[test]
    fn from_config_uses_policy_account() {
        let yaml = r"
- account: TEAM
  match:
    - username: alice
  handler:
    type: allow
";
        let configs: Vec<PolicyConfig> = serde_yaml::from_str(yaml).unwrap();
        let list = PolicyList::from_config(&configs, None, &AppContext::new()).unwrap();

        let claims = list.match_and_authorize(&mut request("alice")).unwrap();
        assert_eq!(claims.audience, "TEAM");
        assert_eq!(list.policies()[0].describe(), "username -> allow");
    }

    #[test]
    fn from_config_reports_failing_policy() {
        let yaml = r"
- match:
    - username: alice
  handler:
    type: oauth2
    endpoint: missing
";
        let configs: Vec<PolicyConfig> = serde_yaml::from_str(yaml).unwrap();
        let err = PolicyList::from_config(&configs, None, &AppContext::new()).unwrap_err();
        assert!(err.to_string().contains("policy 0"));
    }
}
