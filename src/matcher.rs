//! Connection matchers.
//!
//! A matcher is a predicate over the claims of an [`AuthorizationRequest`].
//! Each variant of [`Matcher`] holds an allow-list; the matcher succeeds when
//! the request value equals any entry.
//!
//! In configuration each matcher is a single-key map whose value is either a
//! scalar or a list:
//!
//! ```yaml
//! match:
//!   - username: alice
//!   - connection_type: [standard, websocket]
//!   - protocol: [1, 2]
//! ```

use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::request::AuthorizationRequest;

/// Host allow-list entry that matches in-process connections (empty host).
pub const IN_PROCESS: &str = "in_process";

/// A matcher failed to evaluate a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{matcher} matcher failed: {reason}")]
pub struct MatchError {
    /// Matcher name.
    pub matcher: String,
    /// Failure detail.
    pub reason: String,
}

/// A predicate over an authorization request.
pub trait RequestMatcher: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Evaluate the predicate.
    fn matches(&self, request: &AuthorizationRequest) -> Result<bool, MatchError>;
}

/// Configured matcher variants.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "MatcherConfig")]
pub enum Matcher {
    /// Connect-options user or client-info user.
    Username(Vec<String>),
    /// Connect-options password, constant-time.
    Password(Vec<String>),
    /// Connect-options bearer token, constant-time.
    Token(Vec<String>),
    /// Connect-options nkey.
    KeyIdentity(Vec<String>),
    /// Client host; [`IN_PROCESS`] matches an empty host.
    Host(Vec<String>),
    /// Client kind, case-insensitive.
    ConnectionKind(Vec<String>),
    /// Client connection type, case-insensitive.
    ConnectionType(Vec<String>),
    /// Connect-options name or client-info name.
    Name(Vec<String>),
    /// Client library version.
    Version(Vec<String>),
    /// Protocol level.
    Protocol(Vec<i32>),
}

impl RequestMatcher for Matcher {
    fn name(&self) -> &str {
        match self {
            Self::Username(_) => "username",
            Self::Password(_) => "password",
            Self::Token(_) => "token",
            Self::KeyIdentity(_) => "key_identity",
            Self::Host(_) => "host",
            Self::ConnectionKind(_) => "connection_kind",
            Self::ConnectionType(_) => "connection_type",
            Self::Name(_) => "name",
            Self::Version(_) => "version",
            Self::Protocol(_) => "protocol",
        }
    }

    fn matches(&self, request: &AuthorizationRequest) -> Result<bool, MatchError> {
        let req = &request.claims().nats;
        let opts = &req.connect_opts;
        let info = &req.client_info;

        let matched = match self {
            Self::Username(allowed) => {
                any_eq(allowed, &opts.username) || (!info.user.is_empty() && any_eq(allowed, &info.user))
            }
            Self::Password(allowed) => any_secret_eq(allowed, &opts.password),
            Self::Token(allowed) => any_secret_eq(allowed, &opts.token),
            Self::KeyIdentity(allowed) => any_eq(allowed, &opts.nkey),
            Self::Host(allowed) => allowed.iter().any(|entry| {
                if entry == IN_PROCESS {
                    info.host.is_empty()
                } else {
                    *entry == info.host
                }
            }),
            Self::ConnectionKind(allowed) => any_eq(allowed, &info.kind.to_lowercase()),
            Self::ConnectionType(allowed) => any_eq(allowed, &info.client_type.to_lowercase()),
            Self::Name(allowed) => {
                any_eq(allowed, &opts.name) || (!info.name.is_empty() && any_eq(allowed, &info.name))
            }
            Self::Version(allowed) => any_eq(allowed, &opts.version),
            Self::Protocol(allowed) => allowed.contains(&opts.protocol),
        };
        Ok(matched)
    }
}

fn any_eq(allowed: &[String], value: &str) -> bool {
    allowed.iter().any(|entry| entry == value)
}

fn any_secret_eq(allowed: &[String], value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    // Evaluate every entry so timing does not reveal which one matched
    allowed.iter().fold(false, |found, entry| {
        let eq: bool = entry.as_bytes().ct_eq(value.as_bytes()).into();
        found | eq
    })
}

/// A scalar or a list in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value.
    One(T),
    /// Several values.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

/// Raw configuration form of a matcher: a map with exactly one key.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MatcherConfig {
    username: Option<OneOrMany<String>>,
    password: Option<OneOrMany<String>>,
    token: Option<OneOrMany<String>>,
    #[serde(alias = "nkey")]
    key_identity: Option<OneOrMany<String>>,
    host: Option<OneOrMany<String>>,
    #[serde(alias = "kind")]
    connection_kind: Option<OneOrMany<String>>,
    #[serde(alias = "type")]
    connection_type: Option<OneOrMany<String>>,
    name: Option<OneOrMany<String>>,
    version: Option<OneOrMany<String>>,
    protocol: Option<OneOrMany<i32>>,
}

impl TryFrom<MatcherConfig> for Matcher {
    type Error = String;

    fn try_from(raw: MatcherConfig) -> Result<Self, Self::Error> {
        let mut found: Vec<Self> = Vec::with_capacity(1);
        if let Some(v) = raw.username {
            found.push(Self::Username(strings("username", v)?));
        }
        if let Some(v) = raw.password {
            found.push(Self::Password(strings("password", v)?));
        }
        if let Some(v) = raw.token {
            found.push(Self::Token(strings("token", v)?));
        }
        if let Some(v) = raw.key_identity {
            found.push(Self::KeyIdentity(strings("key_identity", v)?));
        }
        if let Some(v) = raw.host {
            found.push(Self::Host(strings("host", v)?));
        }
        if let Some(v) = raw.connection_kind {
            found.push(Self::ConnectionKind(lowercase(strings("connection_kind", v)?)));
        }
        if let Some(v) = raw.connection_type {
            found.push(Self::ConnectionType(lowercase(strings("connection_type", v)?)));
        }
        if let Some(v) = raw.name {
            found.push(Self::Name(strings("name", v)?));
        }
        if let Some(v) = raw.version {
            found.push(Self::Version(strings("version", v)?));
        }
        if let Some(v) = raw.protocol {
            let values = v.into_vec();
            if values.is_empty() {
                return Err("protocol matcher requires at least one value".to_string());
            }
            found.push(Self::Protocol(values));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("matcher must name one of: username, password, token, key_identity, host, \
                      connection_kind, connection_type, name, version, protocol"
                .to_string()),
            _ => Err("each matcher entry must have exactly one key; list several entries instead".to_string()),
        }
    }
}

fn strings(name: &str, values: OneOrMany<String>) -> Result<Vec<String>, String> {
    let values = values.into_vec();
    if values.is_empty() {
        return Err(format!("{name} matcher requires at least one value"));
    }
    if values.iter().any(String::is_empty) {
        return Err(format!("{name} matcher values must not be empty"));
    }
    Ok(values)
}

fn lowercase(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}
