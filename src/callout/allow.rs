use nats_claims::UserClaims;
use serde::Deserialize;

use super::{CalloutError, resolve_account};
use crate::context::AppContext;
use crate::request::AuthorizationRequest;
use crate::template::UserClaimsTemplate;

/// Grants every request it receives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowCallout {
    /// Target account, overriding the policy's. May contain placeholders.
    #[serde(default)]
    pub account: Option<String>,
    /// Claims applied to the issued credential.
    #[serde(default)]
    pub template: Option<UserClaimsTemplate>,
    #[serde(skip)]
    target: String,
}

impl AllowCallout {
    /// An allow handler for `account` without template.
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            ..Self::default()
        }
    }

    /// Set the template.
    #[must_use]
    pub fn with_template(mut self, template: UserClaimsTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub(super) fn provision(&mut self, _ctx: &AppContext, account: &str) -> crate::Result<()> {
        self.target = self.account.clone().unwrap_or_else(|| account.to_string());
        tracing::debug!(account = %self.target, "provisioned allow callout");
        Ok(())
    }

    pub(super) fn handle(&self, request: &mut AuthorizationRequest) -> Result<UserClaims, CalloutError> {
        if !request.is_authenticated() {
            return Err(CalloutError::NotAuthenticated);
        }
        let mut claims = UserClaims::for_user(request.user_nkey());
        if let Some(template) = &self.template {
            template.render(&mut claims, request.replacer());
        }
        claims.audience = resolve_account(&self.target, request)?;
        tracing::info!(
            user = %claims.subject,
            account = %claims.audience,
            "allowing access"
        );
        Ok(claims)
    }
}
