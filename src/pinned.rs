//! Pinned tokens.
//!
//! A pinned token is a bearer secret minted out-of-band for one account.
//! Clients presenting it as their connect token are granted the stored claims
//! without going through policies. Each account has at most one live token;
//! pinning again revokes the previous one.
//!
//! The three indices (token → claims, account → token, token → account) are
//! guarded by one mutex so `add`, `remove` and `credentials_for` update them
//! atomically. Audit events are emitted after the lock is released.

use std::collections::HashMap;

use nats_claims::UserClaims;
use parking_lot::Mutex;

use crate::audit::{self, AuditEvent};
use crate::error::Result;

#[derive(Debug, Default)]
struct Registry {
    claims: HashMap<String, UserClaims>,
    tokens_by_account: HashMap<String, String>,
    accounts_by_token: HashMap<String, String>,
}

impl Registry {
    fn remove(&mut self, account: &str) -> bool {
        let Some(token) = self.tokens_by_account.remove(account) else {
            return false;
        };
        self.claims.remove(&token);
        self.accounts_by_token.remove(&token);
        true
    }

    /// Replace the token of `account`. Returns whether a previous token was revoked.
    fn insert(&mut self, account: &str, token: &str, claims: UserClaims) -> bool {
        let revoked = self.remove(account);
        self.claims.insert(token.to_string(), claims);
        self.tokens_by_account.insert(account.to_string(), token.to_string());
        self.accounts_by_token.insert(token.to_string(), account.to_string());
        revoked
    }
}

/// Registry of pinned tokens.
#[derive(Debug, Default)]
pub struct PinnedTokens {
    inner: Mutex<Registry>,
}

fn default_claims(account: &str) -> UserClaims {
    let mut claims = UserClaims::for_user("");
    claims.audience = account.to_string();
    claims
}

fn mint() -> Result<String> {
    Ok(nkeys::KeyPair::new_user().seed()?)
}

fn emit_lifecycle(account: &str, revoked: bool) {
    if revoked {
        audit::emit(&AuditEvent::token_revoked(account));
    }
    audit::emit(&AuditEvent::token_pinned(account));
}

impl PinnedTokens {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token for `account`, revoking any previous one.
    ///
    /// Without `claims`, the token grants the account with no limits.
    pub fn add(&self, account: &str, claims: Option<UserClaims>) -> Result<(String, UserClaims)> {
        let claims = claims.unwrap_or_else(|| default_claims(account));
        let token = mint()?;

        let revoked = self.inner.lock().insert(account, &token, claims.clone());

        emit_lifecycle(account, revoked);
        Ok((token, claims))
    }

    /// Revoke the token of `account`. No-op when there is none.
    pub fn remove(&self, account: &str) -> bool {
        let removed = self.inner.lock().remove(account);
        if removed {
            audit::emit(&AuditEvent::token_revoked(account));
        }
        removed
    }

    /// Token and claims of `account`.
    #[must_use]
    pub fn get(&self, account: &str) -> Option<(String, UserClaims)> {
        let registry = self.inner.lock();
        let token = registry.tokens_by_account.get(account)?;
        let claims = registry.claims.get(token)?;
        Some((token.clone(), claims.clone()))
    }

    /// Account and claims of `token`.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<(String, UserClaims)> {
        if token.is_empty() {
            return None;
        }
        let registry = self.inner.lock();
        let claims = registry.claims.get(token)?;
        let account = registry.accounts_by_token.get(token)?;
        Some((account.clone(), claims.clone()))
    }

    /// The live token of `account`, minting one if needed.
    ///
    /// Concurrent callers for the same account all receive the same token.
    pub fn credentials_for(&self, account: &str) -> Result<String> {
        let mut registry = self.inner.lock();
        if let Some(token) = registry.tokens_by_account.get(account) {
            return Ok(token.clone());
        }
        let token = mint()?;
        let revoked = registry.insert(account, &token, default_claims(account));
        drop(registry);

        emit_lifecycle(account, revoked);
        Ok(token)
    }

    /// Number of live tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().tokens_by_account.len()
    }

    /// Whether no token is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nats_claims::NO_LIMIT;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Barrier};

    #[test]
    fn add_then_get_and_lookup() {
        // GIVEN: a token pinned for ACC1 without explicit claims
        let pinned = PinnedTokens::new();
        let (token, claims) = pinned.add("ACC1", None).unwrap();

        // THEN: both indices return the same triple
        assert_eq!(pinned.get("ACC1"), Some((token.clone(), claims.clone())));
        assert_eq!(pinned.lookup(&token), Some(("ACC1".to_string(), claims.clone())));

        // AND: default claims target the account with no limits
        assert_eq!(claims.audience, "ACC1");
        assert_eq!(claims.nats.subs, NO_LIMIT);
        assert_eq!(claims.nats.data, NO_LIMIT);
        assert_eq!(claims.nats.payload, NO_LIMIT);
    }

    #[test]
    fn add_replaces_previous_token() {
        // GIVEN: two successive pins for the same account
        let pinned = PinnedTokens::new();
        let mut first = UserClaims::for_user("");
        first.name = "first".to_string();
        let mut second = UserClaims::for_user("");
        second.name = "second".to_string();
        let (t1, _) = pinned.add("ACC1", Some(first)).unwrap();
        let (t2, c2) = pinned.add("ACC1", Some(second)).unwrap();

        // THEN: the first token is gone and the second is live
        assert_ne!(t1, t2);
        assert_eq!(pinned.lookup(&t1), None);
        assert_eq!(pinned.lookup(&t2), Some(("ACC1".to_string(), c2)));
        assert_eq!(pinned.len(), 1);
    }

    #[test]
    fn remove_clears_all_indices() {
        let pinned = PinnedTokens::new();
        let (token, _) = pinned.add("ACC1", None).unwrap();

        assert!(pinned.remove("ACC1"));
        assert_eq!(pinned.get("ACC1"), None);
        assert_eq!(pinned.lookup(&token), None);
        assert!(pinned.is_empty());

        // Removing again is a no-op
        assert!(!pinned.remove("ACC1"));
    }

    #[test]
    fn unknown_keys_are_not_found() {
        let pinned = PinnedTokens::new();
        assert_eq!(pinned.get("nobody"), None);
        assert_eq!(pinned.lookup(""), None);
        assert_eq!(pinned.lookup("SUAFAKE"), None);
    }

    #[test]
    fn credentials_for_reuses_live_token() {
        let pinned = PinnedTokens::new();
        let first = pinned.credentials_for("ACC1").unwrap();
        let again = pinned.credentials_for("ACC1").unwrap();

        assert_eq!(first, again);
        assert_eq!(pinned.len(), 1);
    }

    #[test]
    fn concurrent_credentials_share_one_live_token() {
        // GIVEN: many threads released together asking for the same account
        for _ in 0..20 {
            let pinned = Arc::new(PinnedTokens::new());
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let pinned = Arc::clone(&pinned);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        pinned.credentials_for("ACC1").unwrap()
                    })
                })
                .collect();
            let tokens: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            // THEN: every caller got the same token and it is still live
            assert!(tokens.iter().all(|t| *t == tokens[0]));
            assert_eq!(pinned.lookup(&tokens[0]).map(|(a, _)| a).as_deref(), Some("ACC1"));
            assert_eq!(pinned.len(), 1);
        }
    }

    #[test]
    fn lifecycle_events_are_emitted_outside_the_lock() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        struct LockCheck {
            pinned: Arc<PinnedTokens>,
            events: Arc<AtomicUsize>,
            held: Arc<AtomicUsize>,
        }

        impl<S: tracing::Subscriber> Layer<S> for LockCheck {
            fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                self.events.fetch_add(1, Ordering::SeqCst);
                if self.pinned.inner.try_lock().is_none() {
                    self.held.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        // GIVEN: a subscriber that checks the registry lock on every event
        let pinned = Arc::new(PinnedTokens::new());
        let events = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LockCheck {
            pinned: Arc::clone(&pinned),
            events: Arc::clone(&events),
            held: Arc::clone(&held),
        });

        // WHEN: tokens are pinned, replaced, revoked and minted on demand
        tracing::subscriber::with_default(subscriber, || {
            pinned.add("ACC1", None).unwrap();
            pinned.add("ACC1", None).unwrap();
            pinned.remove("ACC1");
            pinned.credentials_for("ACC2").unwrap();
        });

        // THEN: every audit event was emitted with the lock free
        assert!(events.load(Ordering::SeqCst) >= 5);
        assert_eq!(held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_pins_keep_one_token_per_account() {
        // GIVEN: many threads pinning the same two accounts
        let pinned = Arc::new(PinnedTokens::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pinned = Arc::clone(&pinned);
                std::thread::spawn(move || {
                    let account = if i % 2 == 0 { "EVEN" } else { "ODD" };
                    pinned.add(account, None).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // THEN: exactly one live token per account, indices consistent
        assert_eq!(pinned.len(), 2);
        for account in ["EVEN", "ODD"] {
            let (token, _) = pinned.get(account).unwrap();
            assert_eq!(pinned.lookup(&token).map(|(a, _)| a).as_deref(), Some(account));
        }
    }
}
