//! Configuration management

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

use crate::bootstrap::BrokerOptions;
use crate::callout::Callout;
use crate::callout::session::{HmacSessionDecoder, SessionDecoder};
use crate::context::AppContext;
use crate::placeholder::Replacer;
use crate::policy::PolicyConfig;
use crate::signing::KeystoreConfig;
use crate::{Error, Result};

/// Subject the broker sends authorization requests to.
pub const DEFAULT_SUBJECT: &str = "$SYS.REQ.USER.AUTH";
/// Default auth account name.
pub const DEFAULT_AUTH_ACCOUNT: &str = "AUTH";
/// Default queue group shared by service replicas.
pub const DEFAULT_QUEUE_GROUP: &str = "auth_callout";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NATS_CALLOUT_";

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `{env.VAR}` resolution.
    pub env_files: Vec<String>,
    /// Broker connection of the service itself
    pub server: ServerConfig,
    /// Callout service configuration
    pub callout: CalloutConfig,
    /// Broker authorization options (written to by the internal account bootstrap)
    pub broker: BrokerOptions,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("Config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(&figment)
    }

    /// Parse configuration from a YAML document, without environment
    /// overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_figment(&Figment::from(Yaml::string(yaml)))
    }

    fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        // Env files must be loaded before `{env.*}` placeholders are resolved
        config.load_env_files();
        config.resolve_secrets();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = expand_home(path_str);
            let expanded = path.display();
            if !path.exists() {
                tracing::debug!("Env file not found (skipped): {expanded}");
                continue;
            }
            match dotenvy::from_path(&path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        }
    }

    /// Resolve `{env.*}` and `{file.*}` placeholders in secret-bearing fields.
    fn resolve_secrets(&mut self) {
        let secrets = Replacer::with_secrets();
        let resolve = |value: &mut Option<String>| {
            if let Some(v) = value.as_mut() {
                *v = secrets.replace_all(v, "");
            }
        };

        resolve(&mut self.server.user);
        resolve(&mut self.server.password);
        resolve(&mut self.server.token);
        resolve(&mut self.callout.signing_key);
        resolve(&mut self.callout.issuer);
        for session in self.callout.sessions.values_mut() {
            match session {
                SessionConfig::Hmac { secret } => *secret = secrets.replace_all(secret, ""),
            }
        }
    }

    /// Check option combinations that cannot be expressed in types.
    pub fn validate(&self) -> Result<()> {
        let callout = &self.callout;
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

        if callout.subject.is_empty() {
            return Err(Error::Config("callout.subject must not be empty".to_string()));
        }
        if set(&callout.signing_key) && set(&callout.issuer) {
            return Err(Error::Config(
                "callout.signing_key and callout.issuer are mutually exclusive".to_string(),
            ));
        }
        if set(&callout.issuer) && callout.keystore.is_none() {
            return Err(Error::Config(
                "callout.issuer is set but no keystore is defined".to_string(),
            ));
        }
        if callout.keystore.is_some() && !set(&callout.issuer) {
            return Err(Error::Config("callout.keystore requires callout.issuer".to_string()));
        }
        if set(&callout.internal_user) && !callout.uses_internal_account() {
            return Err(Error::Config(
                "callout.internal_user requires an internal account (no signing_key or issuer)".to_string(),
            ));
        }
        for (field, value) in [
            ("internal_seed_file", &callout.internal_seed_file),
            ("broker_file", &callout.broker_file),
        ] {
            if set(value) && !callout.uses_internal_account() {
                return Err(Error::Config(format!(
                    "callout.{field} requires an internal account (no signing_key or issuer)"
                )));
            }
        }
        if callout.uses_internal_account() && callout.account.is_empty() {
            return Err(Error::Config("callout.account must not be empty".to_string()));
        }
        for (name, session) in &callout.sessions {
            match session {
                SessionConfig::Hmac { secret } if secret.is_empty() => {
                    return Err(Error::Config(format!("session '{name}' has an empty secret")));
                }
                SessionConfig::Hmac { .. } => {}
            }
        }
        Ok(())
    }
}

/// Broker connection of the service itself
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Broker URL
    pub url: String,
    /// Connection name
    pub name: String,
    /// Username (defaults to the bootstrapped or configured auth user)
    pub user: Option<String>,
    /// Password of `user`
    pub password: Option<String>,
    /// Token authentication
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            name: "auth_callout".to_string(),
            user: None,
            password: None,
            token: None,
        }
    }
}

impl ServerConfig {
    /// User and password to connect with: explicit ones first, else the auth
    /// user found in the broker options.
    #[must_use]
    pub fn credentials(&self, broker: &BrokerOptions) -> Option<(String, String)> {
        match (&self.user, &self.password) {
            (Some(user), password) if !user.is_empty() => Some((user.clone(), password.clone().unwrap_or_default())),
            _ => broker.auth_user_credentials(),
        }
    }
}

/// Callout service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalloutConfig {
    /// Subject authorization requests arrive on
    pub subject: String,
    /// Auth account name
    pub account: String,
    /// Seed of the auth account signing key
    pub signing_key: Option<String>,
    /// Public key of the auth account, keys come from `keystore`
    pub issuer: Option<String>,
    /// Per-account signing keys
    pub keystore: Option<KeystoreConfig>,
    /// Name of the bootstrapped internal user
    pub internal_user: Option<String>,
    /// File holding the internal account seed, created on first start
    pub internal_seed_file: Option<String>,
    /// File the bootstrapped broker authorization block is written to
    pub broker_file: Option<String>,
    /// Queue group shared by replicas
    pub queue_group: String,
    /// Ordered connection policies
    pub policies: Vec<PolicyConfig>,
    /// Handler used when no policy matches
    pub default_handler: Option<Callout>,
    /// Named identity-provider session endpoints
    pub sessions: HashMap<String, SessionConfig>,
}

impl Default for CalloutConfig {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            account: DEFAULT_AUTH_ACCOUNT.to_string(),
            signing_key: None,
            issuer: None,
            keystore: None,
            internal_user: None,
            internal_seed_file: None,
            broker_file: None,
            queue_group: DEFAULT_QUEUE_GROUP.to_string(),
            policies: Vec::new(),
            default_handler: None,
            sessions: HashMap::new(),
        }
    }
}

/// Expand a leading `~` to the home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => PathBuf::from(format!("{}{rest}", home.display())),
        _ => PathBuf::from(path),
    }
}

impl CalloutConfig {
    /// Whether the signing key must be generated by the bootstrap.
    #[must_use]
    pub fn uses_internal_account(&self) -> bool {
        let unset = |v: &Option<String>| v.as_deref().is_none_or(str::is_empty);
        unset(&self.signing_key) && unset(&self.issuer)
    }

    /// Build the provisioning context from the configured session endpoints.
    #[must_use]
    pub fn app_context(&self) -> AppContext {
        let mut ctx = AppContext::new();
        for (name, session) in &self.sessions {
            let decoder: Arc<dyn SessionDecoder> = match session {
                SessionConfig::Hmac { secret } => Arc::new(HmacSessionDecoder::new(secret.as_bytes())),
            };
            ctx.register_session(name.clone(), decoder);
        }
        ctx
    }
}

/// Identity-provider session endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionConfig {
    /// HMAC-SHA256 signed session tokens
    Hmac {
        /// Shared secret. Supports `{env.*}`/`{file.*}`.
        secret: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_match_broker_conventions() {
        let config = Config::default();
        assert_eq!(config.server.url, "nats://127.0.0.1:4222");
        assert_eq!(config.callout.subject, "$SYS.REQ.USER.AUTH");
        assert_eq!(config.callout.account, "AUTH");
        assert_eq!(config.callout.queue_group, "auth_callout");
        assert!(config.callout.uses_internal_account());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        // GIVEN: a config with policies, a default handler and a session endpoint
        let config = Config::from_yaml(
            r"
server:
  url: nats://broker:4222
callout:
  account: AUTH
  policies:
    - match:
        - username: alice
      handler:
        type: allow
        account: APP
    - account: '{oidc.session.team}'
      match:
        - connection_type: [websocket]
      handler:
        type: oauth2
        endpoint: corp
  default_handler:
    type: deny
    message: no policy
  sessions:
    corp:
      type: hmac
      secret: s3cret
broker:
  accounts:
    - name: APP
",
        )
        .unwrap();

        // THEN
        assert_eq!(config.server.url, "nats://broker:4222");
        assert_eq!(config.callout.policies.len(), 2);
        assert_eq!(config.callout.default_handler.as_ref().map(Callout::kind), Some("deny"));
        assert_eq!(config.broker.accounts.as_ref().map(Vec::len), Some(1));
        assert!(config.validate().is_ok());
        assert!(config.callout.app_context().session("corp").is_some());
    }

    #[test]
    fn signing_key_and_issuer_are_exclusive() {
        let config = parse(
            r"
callout:
  signing_key: SAAKEY
  issuer: AISSUER
  keystore: {type: env}
",
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn issuer_requires_keystore() {
        let config = parse("callout: {issuer: AISSUER}");
        assert!(config.validate().unwrap_err().to_string().contains("no keystore"));

        let config = parse("callout: {keystore: {type: env}}");
        assert!(config.validate().unwrap_err().to_string().contains("requires callout.issuer"));
    }

    #[test]
    fn internal_user_requires_internal_account() {
        let config = parse("callout: {signing_key: SAAKEY, internal_user: svc}");
        assert!(config.validate().unwrap_err().to_string().contains("internal_user"));
    }

    #[test]
    fn bootstrap_files_require_internal_account() {
        let config = parse("callout: {signing_key: SAAKEY, internal_seed_file: auth.seed}");
        assert!(config.validate().unwrap_err().to_string().contains("internal_seed_file"));

        let config = parse("callout: {signing_key: SAAKEY, broker_file: broker.json}");
        assert!(config.validate().unwrap_err().to_string().contains("broker_file"));

        let config = parse("callout: {internal_seed_file: auth.seed, broker_file: broker.json}");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_matcher_is_rejected() {
        let result: std::result::Result<Config, _> = serde_yaml::from_str(
            r"
callout:
  policies:
    - match: [{shoe_size: 42}]
      handler: {type: allow}
",
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_reads_file_and_resolves_secrets() {
        // GIVEN: a config file whose signing key points at a secret file
        let dir = tempfile::tempdir().unwrap();
        let seed = nkeys::KeyPair::new_account().seed().unwrap();
        let seed_path = dir.path().join("seed");
        std::fs::write(&seed_path, format!("{seed}\n")).unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            format!("callout:\n  signing_key: '{{file.{}}}'\n", seed_path.display()),
        )
        .unwrap();

        // WHEN
        let config = Config::load(Some(&config_path)).unwrap();

        // THEN: the placeholder is replaced by the trimmed file contents
        assert_eq!(config.callout.signing_key.as_deref(), Some(seed.as_str()));
        assert!(!config.callout.uses_internal_account());
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/nats-callout.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn explicit_credentials_take_precedence() {
        let server = ServerConfig {
            user: Some("svc".to_string()),
            password: Some("pw".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(
            server.credentials(&BrokerOptions::default()),
            Some(("svc".to_string(), "pw".to_string()))
        );
        assert_eq!(ServerConfig::default().credentials(&BrokerOptions::default()), None);
    }

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "NATS_CALLOUT_TEST_ENV_FILE_KEY=hello_from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(
            env::var("NATS_CALLOUT_TEST_ENV_FILE_KEY").unwrap(),
            "hello_from_env_file"
        );
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }
}
