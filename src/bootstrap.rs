//! Internal auth account bootstrap.
//!
//! When no signing key is configured, the service generates its own: an
//! account key pair becomes the callout issuer, and one user of a dedicated
//! account (password = the account seed) is the only user allowed to answer
//! authorization requests. The resulting accounts and authorization map are
//! written into [`BrokerOptions`], which the broker loads on startup.
//!
//! The broker only trusts an issuer it was configured with, so the seed is
//! kept in `callout.internal_seed_file` and reused on every start, and the
//! broker block is written to `callout.broker_file`:
//!
//! ```yaml
//! callout:
//!   internal_seed_file: /var/lib/nats-callout/auth.seed
//!   broker_file: /etc/nats/callout-auth.json
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, expand_home};
use crate::error::{Error, Result};
use crate::signing::account_key;

/// Broker authorization options the bootstrap writes into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOptions {
    /// Accounts defined on the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<Account>>,
    /// Authorization block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationMap>,
}

/// A broker account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account name.
    pub name: String,
    /// Users of the account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
}

/// A user/password pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Username.
    pub user: String,
    /// Password.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

/// Top-level broker authorization block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMap {
    /// Single-token authorization.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Single-user authorization.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Password of `user`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Users of the global account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
    /// Authorization callout settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_callout: Option<AuthCalloutMap>,
}

/// Authorization callout block of the broker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCalloutMap {
    /// Public key that signs authorization responses.
    pub issuer: String,
    /// Account whose users answer authorization requests.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account: String,
    /// Users allowed to answer authorization requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_users: Vec<String>,
}

impl BrokerOptions {
    /// Credentials of a user allowed to answer authorization requests.
    ///
    /// Searches top-level users first, then the users of the callout account.
    #[must_use]
    pub fn auth_user_credentials(&self) -> Option<(String, String)> {
        let auth = self.authorization.as_ref()?;
        let callout = auth.auth_callout.as_ref()?;
        let is_auth_user = |u: &&User| callout.auth_users.iter().any(|a| *a == u.user);

        if !auth.users.is_empty() {
            return auth
                .users
                .iter()
                .find(is_auth_user)
                .map(|u| (u.user.clone(), u.password.clone()));
        }

        self.accounts
            .iter()
            .flatten()
            .filter(|acc| acc.name == callout.account)
            .flat_map(|acc| acc.users.iter())
            .find(is_auth_user)
            .map(|u| (u.user.clone(), u.password.clone()))
    }
}

/// Key material generated for the internal auth account.
#[derive(Debug, Clone)]
pub struct InternalAccount {
    /// Seed signing authorization responses.
    pub signing_seed: String,
    /// Public key of `signing_seed`.
    pub issuer: String,
    /// Internal user name.
    pub user: String,
}

/// Create the internal auth account and inject it into `opts`.
///
/// Uses `seed` as the account key when given, otherwise generates one. Fails
/// if `opts` already carries an authorization block or defines no accounts
/// list.
pub fn setup_internal_account(
    opts: &mut BrokerOptions,
    account: &str,
    user: Option<&str>,
    seed: Option<&str>,
) -> Result<InternalAccount> {
    if account.is_empty() {
        return Err(Error::Config("internal account name must not be empty".to_string()));
    }
    if opts.authorization.is_some() {
        return Err(Error::Config(
            "internal account is not allowed when custom authorization map is used".to_string(),
        ));
    }
    let Some(accounts) = opts.accounts.as_mut() else {
        return Err(Error::Config(
            "internal account is not allowed when no accounts are defined".to_string(),
        ));
    };

    let pair = match seed {
        Some(seed) => account_key(seed)?,
        None => nkeys::KeyPair::new_account(),
    };
    let seed = pair.seed()?;
    let issuer = pair.public_key();
    let user = user.filter(|u| !u.is_empty()).unwrap_or(&issuer).to_string();

    accounts.push(Account {
        name: account.to_string(),
        users: vec![User {
            user: user.clone(),
            password: seed.clone(),
        }],
    });
    opts.authorization = Some(AuthorizationMap {
        auth_callout: Some(AuthCalloutMap {
            issuer: issuer.clone(),
            account: account.to_string(),
            auth_users: vec![user.clone()],
        }),
        ..AuthorizationMap::default()
    });

    info!(account, issuer = %issuer, user = %user, "bootstrapped internal auth account");
    Ok(InternalAccount {
        signing_seed: seed,
        issuer,
        user,
    })
}

/// Read the account seed stored at `path`, generating and storing one if the
/// file does not exist yet.
pub fn load_or_create_seed(path: &Path) -> Result<String> {
    if path.exists() {
        let seed = fs::read_to_string(path)?;
        let seed = seed.trim();
        account_key(seed).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        return Ok(seed.to_string());
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let seed = nkeys::KeyPair::new_account().seed()?;
    fs::write(path, format!("{seed}\n"))?;

    // Owner read/write only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %path.display(), "generated internal account seed");
    Ok(seed)
}

/// Write `opts` as JSON for the broker to load.
pub fn write_broker_options(path: &Path, opts: &BrokerOptions) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(opts)?)?;

    // The block carries the auth user's password
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %path.display(), "wrote broker authorization options");
    Ok(())
}

/// Bootstrap the internal account described by `config` into `config.broker`.
///
/// Reuses the seed in `callout.internal_seed_file` and writes the broker block
/// to `callout.broker_file` when those are set.
pub fn provision_internal_account(config: &mut Config) -> Result<InternalAccount> {
    let callout = &config.callout;
    let seed = match callout.internal_seed_file.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => Some(load_or_create_seed(&expand_home(path))?),
        None => {
            warn!("callout.internal_seed_file is not set; the internal account key is regenerated on every start");
            None
        }
    };

    let internal = setup_internal_account(
        &mut config.broker,
        &callout.account,
        callout.internal_user.as_deref(),
        seed.as_deref(),
    )?;

    if let Some(path) = callout.broker_file.as_deref().filter(|p| !p.is_empty()) {
        write_broker_options(&expand_home(path), &config.broker)?;
    }
    Ok(internal)
}
