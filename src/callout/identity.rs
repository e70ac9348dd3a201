use std::sync::Arc;

use nats_claims::UserClaims;
use serde::Deserialize;

use super::session::SessionDecoder;
use super::{CalloutError, resolve_account};
use crate::context::AppContext;
use crate::request::AuthorizationRequest;
use crate::template::UserClaimsTemplate;

/// Placeholder prefix under which session claims are exposed.
pub const SESSION_PREFIX: &str = "oidc.session.";

/// Grants access to clients presenting a valid identity-provider session as
/// their connect token.
///
/// Scalar session claims become placeholders (`{oidc.session.email}`,
/// `{oidc.session.team}`) usable in the account and the template. Array and
/// object claims never resolve.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityCallout {
    /// Name of the session endpoint registered in the app context.
    pub endpoint: String,
    /// Target account, overriding the policy's.
    #[serde(default)]
    pub account: Option<String>,
    /// Claims applied to the issued credential.
    #[serde(default)]
    pub template: Option<UserClaimsTemplate>,
    #[serde(skip)]
    target: String,
    #[serde(skip)]
    decoder: Option<Arc<dyn SessionDecoder>>,
}

impl IdentityCallout {
    /// An identity handler using the session endpoint `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub(super) fn provision(&mut self, ctx: &AppContext, account: &str) -> crate::Result<()> {
        let Some(decoder) = ctx.session(&self.endpoint) else {
            let known: Vec<&str> = ctx.session_names().collect();
            return Err(crate::Error::Config(format!(
                "unknown session endpoint '{}' (registered: [{}])",
                self.endpoint,
                known.join(", ")
            )));
        };
        self.decoder = Some(decoder);
        self.target = self.account.clone().unwrap_or_else(|| account.to_string());
        Ok(())
    }

    pub(super) fn handle(&self, request: &mut AuthorizationRequest) -> Result<UserClaims, CalloutError> {
        let decoder = self.decoder.as_ref().ok_or(CalloutError::NotProvisioned)?;
        if !request.is_authenticated() {
            return Err(CalloutError::NotAuthenticated);
        }

        let token = &request.claims().nats.connect_opts.token;
        let session = decoder.decode(token).map_err(|e| {
            tracing::info!(endpoint = %self.endpoint, error = %e, "rejecting session token");
            CalloutError::InvalidSession
        })?;

        let exposed = Arc::clone(&session);
        request
            .replacer_mut()
            .map(move |key| key.strip_prefix(SESSION_PREFIX).and_then(|claim| exposed.claim(claim)));

        let mut claims = UserClaims::for_user(request.user_nkey());
        claims.audience = resolve_account(&self.target, request)?;
        match &self.template {
            Some(template) => template.render(&mut claims, request.replacer()),
            None => claims.name = session.email().unwrap_or_default(),
        }

        tracing::info!(
            email = %session.email().unwrap_or_default(),
            account = %claims.audience,
            "authenticated session"
        );
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callout::session::HmacSessionDecoder;
    use crate::request::tests::request_claims;
    use serde_json::{Map, Value, json};

    fn context() -> (AppContext, Arc<HmacSessionDecoder>) {
        let decoder = Arc::new(HmacSessionDecoder::new("s3cret"));
        let mut ctx = AppContext::new();
        ctx.register_session("corp", decoder.clone());
        (ctx, decoder)
    }

    fn session_request(token: &str) -> AuthorizationRequest {
        let mut claims = request_claims("", "");
        claims.nats.connect_opts.token = token.to_string();
        AuthorizationRequest::new(claims)
    }

    fn session_token(decoder: &HmacSessionDecoder, value: Value) -> String {
        let map: Map<String, Value> = serde_json::from_value(value).unwrap();
        decoder.encode(&map).unwrap()
    }

    #[test]
    fn session_claims_drive_account_and_name() {
        // GIVEN: an identity handler targeting the session's team claim
        let (ctx, decoder) = context();
        let mut callout = IdentityCallout::new("corp");
        callout.account = Some("{oidc.session.team}".to_string());
        callout.provision(&ctx, "UNUSED").unwrap();
        let token = session_token(&decoder, json!({"email": "alice@example.com", "team": "ops"}));

        // WHEN
        let claims = callout.handle(&mut session_request(&token)).unwrap();

        // THEN: account comes from the session, name defaults to email
        assert_eq!(claims.audience, "ops");
        assert_eq!(claims.name, "alice@example.com");
        assert_eq!(claims.subject, "UCLIENTKEY");
    }

    #[test]
    fn template_replaces_default_name() {
        let (ctx, decoder) = context();
        let mut callout = IdentityCallout::new("corp");
        callout.template = Some(UserClaimsTemplate {
            allow_pub: Some(vec!["users.{oidc.session.email}".to_string()]),
            ..UserClaimsTemplate::default()
        });
        callout.provision(&ctx, "APP").unwrap();
        let token = session_token(&decoder, json!({"email": "bob@example.com"}));

        let claims = callout.handle(&mut session_request(&token)).unwrap();

        assert_eq!(claims.audience, "APP");
        assert_eq!(claims.name, "");
        assert_eq!(claims.nats.publish.allow, vec!["users.bob@example.com"]);
    }

    #[test]
    fn invalid_session_is_denied() {
        let (ctx, _) = context();
        let mut callout = IdentityCallout::new("corp");
        callout.provision(&ctx, "APP").unwrap();

        let err = callout.handle(&mut session_request("garbage")).unwrap_err();
        assert_eq!(err, CalloutError::InvalidSession);
    }

    #[test]
    fn missing_session_claim_for_account_is_denied() {
        let (ctx, decoder) = context();
        let mut callout = IdentityCallout::new("corp");
        callout.account = Some("{oidc.session.team}".to_string());
        callout.provision(&ctx, "APP").unwrap();
        let token = session_token(&decoder, json!({"email": "alice@example.com"}));

        let err = callout.handle(&mut session_request(&token)).unwrap_err();
        assert_eq!(err, CalloutError::NoTargetAccount);
    }

    #[test]
    fn array_session_claim_does_not_resolve() {
        // GIVEN: an account drawn from a list-valued claim
        let (ctx, decoder) = context();
        let mut callout = IdentityCallout::new("corp");
        callout.account = Some("{oidc.session.groups}".to_string());
        callout.provision(&ctx, "APP").unwrap();
        let token = session_token(&decoder, json!({"email": "alice@example.com", "groups": ["ops"]}));

        // WHEN
        let err = callout.handle(&mut session_request(&token)).unwrap_err();

        // THEN: the placeholder empties out and no account is selected
        assert_eq!(err, CalloutError::NoTargetAccount);
    }

    #[test]
    fn unknown_endpoint_fails_provisioning() {
        let (ctx, _) = context();
        let mut callout = IdentityCallout::new("other");

        let err = callout.provision(&ctx, "APP").unwrap_err();
        assert!(err.to_string().contains("unknown session endpoint 'other'"));
    }
}
