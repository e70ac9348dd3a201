//! Authorization callout service.
//!
//! # Request flow
//!
//! ```text
//! broker ──$SYS.REQ.USER.AUTH──▶ decode ──▶ pinned token? ──yes──▶ pinned claims
//!                                              │ no
//!                                              ▼
//!                                        PolicyList ──▶ user claims | denial
//!                                              │
//!                    sign claims with target account key (success)
//!                    sign response with auth account key (always)
//!                                              │
//! broker ◀─────────────── reply ◀──────────────┘
//! ```
//!
//! Undecodable requests and signing failures are dropped without a reply;
//! the broker then times the client out. Denials are answered with a signed
//! error response whose message the client sees.
//!
//! Each message is handled on its own task. The service state is read-only
//! apart from the [`PinnedTokens`] registry, which locks internally.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use nats_claims::{AuthorizationRequestClaims, AuthorizationResponseClaims, UserClaims};
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::bootstrap::provision_internal_account;
use crate::callout::CalloutError;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pinned::PinnedTokens;
use crate::placeholder::Replacer;
use crate::policy::PolicyList;
use crate::request::AuthorizationRequest;
use crate::signing::KeyResolver;

/// The authorization callout service.
#[derive(Debug)]
pub struct AuthService {
    subject: String,
    queue_group: String,
    resolver: KeyResolver,
    policies: PolicyList,
    pinned: Arc<PinnedTokens>,
}

impl AuthService {
    /// A service from already provisioned parts.
    #[must_use]
    pub fn new(resolver: KeyResolver, policies: PolicyList, pinned: Arc<PinnedTokens>) -> Self {
        Self {
            subject: crate::config::DEFAULT_SUBJECT.to_string(),
            queue_group: crate::config::DEFAULT_QUEUE_GROUP.to_string(),
            resolver,
            policies,
            pinned,
        }
    }

    /// Listen on `subject` instead of the default.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Join `queue_group` instead of the default.
    #[must_use]
    pub fn with_queue_group(mut self, queue_group: impl Into<String>) -> Self {
        self.queue_group = queue_group.into();
        self
    }

    /// Provision the service from configuration.
    ///
    /// Bootstraps the internal auth account into `config.broker` when no
    /// signing material is configured, so the caller can hand the updated
    /// broker options to the broker. With `callout.internal_seed_file` set the
    /// issuer is the same on every start.
    pub fn provision(config: &mut Config, pinned: Arc<PinnedTokens>) -> Result<Self> {
        config.validate()?;
        let internal = if config.callout.uses_internal_account() {
            Some(provision_internal_account(config)?)
        } else {
            None
        };
        let callout = &config.callout;

        let resolver = if let Some(internal) = internal {
            KeyResolver::from_seed(&internal.signing_seed)?
        } else if let Some(seed) = callout.signing_key.as_deref().filter(|s| !s.is_empty()) {
            KeyResolver::from_seed(seed)?
        } else {
            let (Some(issuer), Some(keystore)) = (&callout.issuer, &callout.keystore) else {
                return Err(Error::Config("signing key or keystore must be set".to_string()));
            };
            KeyResolver::with_keystore(issuer.clone(), callout.account.clone(), keystore.build(&Replacer::with_secrets()))?
        };

        let ctx = callout.app_context();
        let policies = PolicyList::from_config(&callout.policies, callout.default_handler.as_ref(), &ctx)?;

        info!(
            issuer = %resolver.issuer(),
            policies = policies.policies().len(),
            default_handler = policies.default_handler().map_or("none", |h| h.kind()),
            "provisioned auth callout service"
        );

        Ok(Self::new(resolver, policies, pinned)
            .with_subject(callout.subject.clone())
            .with_queue_group(callout.queue_group.clone()))
    }

    /// Subject requests arrive on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Public key signing authorization responses.
    #[must_use]
    pub fn issuer(&self) -> String {
        self.resolver.issuer()
    }

    /// Provisioned policies.
    #[must_use]
    pub fn policies(&self) -> &PolicyList {
        &self.policies
    }

    /// Handle one raw request payload. `None` means the request is dropped.
    pub async fn handle_message(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let token = match std::str::from_utf8(payload) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "authorization request is not UTF-8");
                audit::emit(&AuditEvent::dropped(None, "payload is not UTF-8"));
                return None;
            }
        };
        let claims: AuthorizationRequestClaims = match nats_claims::decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                error!(error = %e, "failed to decode authorization request");
                audit::emit(&AuditEvent::dropped(None, e.to_string()));
                return None;
            }
        };

        match self.authorize(claims.clone()).await {
            Ok(response) => Some(response.into_bytes()),
            Err(e) => {
                error!(error = %e, "failed to create authorization response");
                audit::emit(&AuditEvent::dropped(Some(&claims), e.to_string()));
                None
            }
        }
    }

    /// Decide on decoded request claims and return the signed response.
    pub async fn authorize(&self, claims: AuthorizationRequestClaims) -> Result<String> {
        let info = &claims.nats.client_info;
        info!(
            host = %info.host,
            kind = %info.kind,
            client_type = %info.client_type,
            user = %claims.nats.connect_opts.username,
            "auth callout request"
        );

        let connect_token = &claims.nats.connect_opts.token;
        if let Some((account, mut user)) = self.pinned.lookup(connect_token) {
            info!(account = %account, "using pinned token");
            user.subject.clone_from(&claims.nats.user_nkey);
            user.audience.clone_from(&account);
            let response = self.success_response(&claims, user).await?;
            let signed = self.sign_response(response).await?;
            audit::emit(&AuditEvent::pinned(&claims, &account));
            return Ok(signed);
        }

        let mut request = AuthorizationRequest::new(claims);
        let decision = self
            .policies
            .match_and_authorize(&mut request)
            .map_err(|e| e.to_string())
            .and_then(|user| {
                if user.audience.is_empty() {
                    Err(CalloutError::NoTargetAccount.to_string())
                } else {
                    Ok(user)
                }
            });
        let claims = request.into_claims();

        let (response, event) = match decision {
            Ok(user) => {
                let event = AuditEvent::allowed(&claims, &user.audience);
                (self.success_response(&claims, user).await?, event)
            }
            Err(reason) => {
                let event = AuditEvent::denied(&claims, &reason);
                (error_response(&claims, reason), event)
            }
        };
        let signed = self.sign_response(response).await?;
        audit::emit(&event);
        Ok(signed)
    }

    async fn success_response(
        &self,
        request: &AuthorizationRequestClaims,
        mut user: UserClaims,
    ) -> Result<AuthorizationResponseClaims> {
        let key = self.resolver.account_key(&user.audience).await?;
        let jwt = nats_claims::encode(&mut user, &key)?;
        debug!(account = %user.audience, issuer = %user.issuer, "signed user claims");

        let mut response = AuthorizationResponseClaims::for_user(&request.nats.user_nkey);
        response.audience.clone_from(&request.nats.server_id.id);
        response.nats.jwt = jwt;
        Ok(response)
    }

    async fn sign_response(&self, mut response: AuthorizationResponseClaims) -> Result<String> {
        let key = self.resolver.auth_key().await?;
        Ok(nats_claims::encode(&mut response, &key)?)
    }

    /// Answer requests until `shutdown` fires or the subscription ends.
    pub async fn serve(self: Arc<Self>, client: async_nats::Client, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut requests = client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        info!(subject = %self.subject, queue_group = %self.queue_group, "auth callout service listening");

        loop {
            tokio::select! {
                message = requests.next() => {
                    let Some(message) = message else {
                        warn!("auth callout subscription closed");
                        break;
                    };
                    let service = Arc::clone(&self);
                    let client = client.clone();
                    let span = info_span!("auth_request", request_id = %Uuid::new_v4());
                    tokio::spawn(
                        async move {
                            service.respond(&client, message).await;
                        }
                        .instrument(span),
                    );
                }
                _ = shutdown.recv() => {
                    info!("auth callout service stopping");
                    break;
                }
            }
        }

        if let Err(e) = requests.unsubscribe().await {
            debug!(error = %e, "unsubscribe failed");
        }
        client.flush().await.map_err(|e| Error::Broker(e.to_string()))?;
        Ok(())
    }

    async fn respond(&self, client: &async_nats::Client, message: async_nats::Message) {
        let Some(reply) = message.reply.clone() else {
            warn!(subject = %message.subject, "authorization request without reply subject");
            return;
        };
        let Some(response) = self.handle_message(&message.payload).await else {
            return;
        };
        if let Err(e) = client.publish(reply, Bytes::from(response)).await {
            error!(error = %e, "failed to respond to authorization request");
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then notify `shutdown_tx`.
pub async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
}

fn error_response(request: &AuthorizationRequestClaims, reason: String) -> AuthorizationResponseClaims {
    let mut response = AuthorizationResponseClaims::for_user(&request.nats.user_nkey);
    response.audience.clone_from(&request.nats.server_id.id);
    response.nats.error = reason;
    response
}
