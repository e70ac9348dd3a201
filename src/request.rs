//! Per-request authorization context.
//!
//! An [`AuthorizationRequest`] wraps the decoded request claims together with
//! the placeholder [`Replacer`] built for that one request. The replacer is
//! owned by the request and dropped with it; handlers may extend it (e.g. with
//! identity-provider session claims) without affecting any other request.

use nats_claims::AuthorizationRequestClaims;

use crate::placeholder::Replacer;

/// A single authorization request in flight.
#[derive(Debug)]
pub struct AuthorizationRequest {
    claims: AuthorizationRequestClaims,
    replacer: Replacer,
}

impl AuthorizationRequest {
    /// Wrap decoded request claims and build their placeholder context.
    #[must_use]
    pub fn new(claims: AuthorizationRequestClaims) -> Self {
        let replacer = request_replacer(&claims);
        Self { claims, replacer }
    }

    /// The decoded request claims.
    #[must_use]
    pub fn claims(&self) -> &AuthorizationRequestClaims {
        &self.claims
    }

    /// Placeholder context of this request.
    #[must_use]
    pub fn replacer(&self) -> &Replacer {
        &self.replacer
    }

    /// Mutable placeholder context, for handlers that expose extra values.
    pub fn replacer_mut(&mut self) -> &mut Replacer {
        &mut self.replacer
    }

    /// Key the issued user claims must be bound to.
    #[must_use]
    pub fn user_nkey(&self) -> &str {
        &self.claims.nats.user_nkey
    }

    /// Whether the broker forwarded a client key to bind credentials to.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.claims.nats.user_nkey.is_empty()
    }

    /// Public key of the server that forwarded the request.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.claims.nats.server_id.id
    }

    /// Unwrap into the raw claims.
    #[must_use]
    pub fn into_claims(self) -> AuthorizationRequestClaims {
        self.claims
    }
}

fn request_replacer(claims: &AuthorizationRequestClaims) -> Replacer {
    let req = &claims.nats;
    let opts = &req.connect_opts;
    let info = &req.client_info;

    let mut repl = Replacer::with_secrets();
    repl.set("connect_opts.username", opts.username.as_str());
    repl.set("connect_opts.password", opts.password.as_str());
    repl.set("connect_opts.token", opts.token.as_str());
    repl.set("connect_opts.name", opts.name.as_str());
    repl.set("connect_opts.lang", opts.lang.as_str());
    repl.set("connect_opts.version", opts.version.as_str());
    repl.set("connect_opts.protocol", opts.protocol.to_string());
    repl.set("client_info.id", info.id.to_string());
    repl.set("client_info.name", info.name.as_str());
    repl.set("client_info.host", info.host.as_str());
    repl.set("client_info.user", info.user.as_str());
    repl.set("client_info.kind", info.kind.as_str());
    repl.set("client_info.type", info.client_type.as_str());
    repl.set("client_info.mqtt", info.mqtt_id.as_str());
    repl.set("user_nkey", req.user_nkey.as_str());
    repl.set("server.id", req.server_id.id.as_str());
    repl.set("server.name", req.server_id.name.as_str());
    repl
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nats_claims::{AUTHORIZATION_REQUEST_TYPE, CLAIMS_VERSION};

    /// Request claims for a client with the given username and host.
    pub(crate) fn request_claims(username: &str, host: &str) -> AuthorizationRequestClaims {
        let mut claims = AuthorizationRequestClaims::default();
        claims.nats.claim_type = AUTHORIZATION_REQUEST_TYPE.to_string();
        claims.nats.version = CLAIMS_VERSION;
        claims.nats.user_nkey = "UCLIENTKEY".to_string();
        claims.nats.server_id.id = "NSERVER".to_string();
        claims.nats.server_id.name = "n1".to_string();
        claims.nats.connect_opts.username = username.to_string();
        claims.nats.client_info.host = host.to_string();
        claims
    }

    #[test]
    fn exposes_connection_placeholders() {
        // GIVEN: a request from alice on 10.0.0.5
        let req = AuthorizationRequest::new(request_claims("alice", "10.0.0.5"));

        // WHEN: a subject template references request fields
        let subject = req
            .replacer()
            .replace_known("users.{connect_opts.username}.{client_info.host}", "");

        // THEN: both are substituted
        assert_eq!(subject, "users.alice.10.0.0.5");
        assert_eq!(req.replacer().get("server.id").as_deref(), Some("NSERVER"));
        assert_eq!(req.replacer().get("connect_opts.protocol").as_deref(), Some("0"));
    }

    #[test]
    fn handler_extensions_stay_on_the_request() {
        let mut first = AuthorizationRequest::new(request_claims("alice", ""));
        let second = AuthorizationRequest::new(request_claims("bob", ""));

        first.replacer_mut().set("oidc.session.email", "alice@example.com");

        assert!(first.replacer().get("oidc.session.email").is_some());
        assert!(second.replacer().get("oidc.session.email").is_none());
    }

    #[test]
    fn missing_user_key_is_unauthenticated() {
        let mut claims = request_claims("alice", "");
        claims.nats.user_nkey.clear();

        assert!(!AuthorizationRequest::new(claims).is_authenticated());
    }
}
