//! Signing key resolution.
//!
//! Issued credentials are signed with the key of their target account;
//! authorization responses are always signed with the auth account's key.
//! [`KeyResolver`] hides whether those keys come from one static seed or
//! from a per-account [`Keystore`].
//!
//! | Mode | Credential key | Response key |
//! |------|----------------|--------------|
//! | static seed | the seed | the seed |
//! | keystore | `keystore.get(target account)` | `keystore.get(auth account)`, checked against the configured issuer |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use nkeys::KeyPair;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};

/// Default variable prefix of [`EnvKeystore`].
pub const DEFAULT_ENV_PREFIX: &str = "NATS_CALLOUT_KEY_";

/// Keystore lookup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeystoreError {
    /// No seed is stored for the account.
    #[error("no signing key for account '{0}'")]
    NotFound(String),

    /// The backing store could not be read.
    #[error("keystore unavailable: {0}")]
    Unavailable(String),
}

/// Maps account names to signing seeds.
#[async_trait::async_trait]
pub trait Keystore: Send + Sync + fmt::Debug {
    /// Seed of `account`'s signing key.
    async fn get(&self, account: &str) -> std::result::Result<String, KeystoreError>;
}

/// Keystore held in memory.
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    keys: DashMap<String, String>,
}

impl MemoryKeystore {
    /// An empty keystore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the seed of `account`.
    pub fn insert(&self, account: impl Into<String>, seed: impl Into<String>) {
        self.keys.insert(account.into(), seed.into());
    }
}

impl FromIterator<(String, String)> for MemoryKeystore {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl Keystore for MemoryKeystore {
    async fn get(&self, account: &str) -> std::result::Result<String, KeystoreError> {
        self.keys
            .get(account)
            .map(|seed| seed.value().clone())
            .ok_or_else(|| KeystoreError::NotFound(account.to_string()))
    }
}

/// Keystore reading `<PREFIX><ACCOUNT>` environment variables.
///
/// The account name is upper-cased and every character outside
/// `[A-Z0-9_]` becomes `_`.
#[derive(Debug, Clone)]
pub struct EnvKeystore {
    prefix: String,
}

impl EnvKeystore {
    /// A keystore reading variables starting with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Variable holding the seed of `account`.
    #[must_use]
    pub fn variable(&self, account: &str) -> String {
        let name: String = account
            .chars()
            .map(|c| {
                let c = c.to_ascii_uppercase();
                if c.is_ascii_alphanumeric() { c } else { '_' }
            })
            .collect();
        format!("{}{name}", self.prefix)
    }
}

impl Default for EnvKeystore {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

#[async_trait::async_trait]
impl Keystore for EnvKeystore {
    async fn get(&self, account: &str) -> std::result::Result<String, KeystoreError> {
        let var = self.variable(account);
        match std::env::var(&var) {
            Ok(seed) if !seed.is_empty() => Ok(seed),
            Ok(_) | Err(std::env::VarError::NotPresent) => Err(KeystoreError::NotFound(account.to_string())),
            Err(e) => Err(KeystoreError::Unavailable(format!("{var}: {e}"))),
        }
    }
}

/// Keystore configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeystoreConfig {
    /// Inline account → seed map. Seeds may use `{env.*}`/`{file.*}`.
    Memory {
        /// Seeds by account name.
        #[serde(default)]
        keys: HashMap<String, String>,
    },
    /// Environment variables.
    Env {
        /// Variable prefix.
        #[serde(default = "default_env_prefix")]
        prefix: String,
    },
}

fn default_env_prefix() -> String {
    DEFAULT_ENV_PREFIX.to_string()
}

impl KeystoreConfig {
    /// Build the configured keystore.
    #[must_use]
    pub fn build(&self, secrets: &crate::placeholder::Replacer) -> Arc<dyn Keystore> {
        match self {
            Self::Memory { keys } => Arc::new(
                keys.iter()
                    .map(|(account, seed)| (account.clone(), secrets.replace_all(seed, "")))
                    .collect::<MemoryKeystore>(),
            ),
            Self::Env { prefix } => Arc::new(EnvKeystore::new(prefix.clone())),
        }
    }
}

/// Decode an account seed.
pub fn account_key(seed: &str) -> Result<KeyPair> {
    let pair = KeyPair::from_seed(seed.trim())?;
    if !pair.public_key().starts_with('A') {
        return Err(Error::Signing("seed is not an account key".to_string()));
    }
    Ok(pair)
}

/// Resolves the keys used to sign credentials and responses.
#[derive(Clone)]
pub enum KeyResolver {
    /// One key signs everything.
    Static(Arc<KeyPair>),
    /// Keys are looked up per account.
    Keystore {
        /// Public key expected for the auth account.
        issuer: String,
        /// Name of the auth account in the keystore.
        auth_account: String,
        /// Seed source.
        store: Arc<dyn Keystore>,
    },
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(pair) => f.debug_tuple("Static").field(&pair.public_key()).finish(),
            Self::Keystore {
                issuer,
                auth_account,
                store,
            } => f
                .debug_struct("Keystore")
                .field("issuer", issuer)
                .field("auth_account", auth_account)
                .field("store", store)
                .finish(),
        }
    }
}

impl KeyResolver {
    /// A resolver signing everything with `seed`.
    pub fn from_seed(seed: &str) -> Result<Self> {
        Ok(Self::Static(Arc::new(account_key(seed)?)))
    }

    /// A resolver looking keys up in `store`.
    pub fn with_keystore(
        issuer: impl Into<String>,
        auth_account: impl Into<String>,
        store: Arc<dyn Keystore>,
    ) -> Result<Self> {
        let issuer = issuer.into();
        let valid = KeyPair::from_public_key(&issuer).is_ok() && issuer.starts_with('A');
        if !valid {
            return Err(Error::Config(format!("issuer '{issuer}' is not an account public key")));
        }
        Ok(Self::Keystore {
            issuer,
            auth_account: auth_account.into(),
            store,
        })
    }

    /// Public key of the auth account.
    #[must_use]
    pub fn issuer(&self) -> String {
        match self {
            Self::Static(pair) => pair.public_key(),
            Self::Keystore { issuer, .. } => issuer.clone(),
        }
    }

    /// Key signing credentials for `account`.
    pub async fn account_key(&self, account: &str) -> Result<Arc<KeyPair>> {
        match self {
            Self::Static(pair) => Ok(Arc::clone(pair)),
            Self::Keystore { store, .. } => {
                let seed = store.get(account).await?;
                debug!(account, "resolved account signing key");
                Ok(Arc::new(account_key(&seed)?))
            }
        }
    }

    /// Key signing authorization responses.
    pub async fn auth_key(&self) -> Result<Arc<KeyPair>> {
        match self {
            Self::Static(pair) => Ok(Arc::clone(pair)),
            Self::Keystore {
                issuer,
                auth_account,
                store,
            } => {
                let seed = store.get(auth_account).await?;
                let pair = account_key(&seed)?;
                if pair.public_key() != *issuer {
                    return Err(Error::Signing(format!(
                        "keystore key for '{auth_account}' does not match issuer {issuer}"
                    )));
                }
                Ok(Arc::new(pair))
            }
        }
    }
}
