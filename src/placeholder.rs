//! Placeholder resolution for configured strings.
//!
//! Placeholders use `{key}` syntax, e.g. `orders.{client_info.host}.>` or
//! `{oidc.session.team}`. A [`Replacer`] resolves keys from fixed values
//! first, then from mapper functions in registration order.
//!
//! Two substitution modes exist:
//!
//! - [`Replacer::replace_all`] substitutes every placeholder; unknown keys
//!   become the `empty` value. Used for target accounts, where a dangling
//!   placeholder must not leak into the account name.
//! - [`Replacer::replace_known`] substitutes only keys it can resolve and
//!   leaves the rest verbatim. Used for subjects, which may legitimately
//!   contain braces.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::unwrap_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}\s]+)\}").unwrap());

/// A key → value lookup function.
pub type Mapper = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves `{key}` placeholders.
#[derive(Default)]
pub struct Replacer {
    values: HashMap<String, String>,
    mappers: Vec<Mapper>,
}

impl std::fmt::Debug for Replacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replacer")
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("mappers", &self.mappers.len())
            .finish()
    }
}

impl Replacer {
    /// Create an empty replacer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a replacer that already resolves `env.*` and `file.*` keys.
    #[must_use]
    pub fn with_secrets() -> Self {
        let mut repl = Self::new();
        repl.map(secret_vars);
        repl
    }

    /// Set a fixed value for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Register a mapper consulted after fixed values and earlier mappers.
    pub fn map<F>(&mut self, mapper: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.mappers.push(Box::new(mapper));
    }

    /// Resolve a single key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.values.get(key) {
            return Some(value.clone());
        }
        self.mappers.iter().find_map(|m| m(key))
    }

    /// Replace every placeholder; unknown or empty values become `empty`.
    #[must_use]
    pub fn replace_all(&self, input: &str, empty: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &regex::Captures<'_>| match self.get(&caps[1]) {
                Some(value) if !value.is_empty() => value,
                _ => empty.to_string(),
            })
            .into_owned()
    }

    /// Replace only resolvable placeholders; resolvable-but-empty values
    /// become `empty`, unknown placeholders are left untouched.
    #[must_use]
    pub fn replace_known(&self, input: &str, empty: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &regex::Captures<'_>| match self.get(&caps[1]) {
                Some(value) if value.is_empty() => empty.to_string(),
                Some(value) => value,
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// `env.VAR` reads an environment variable, `file.PATH` reads a file.
fn secret_vars(key: &str) -> Option<String> {
    if let Some(var) = key.strip_prefix("env.") {
        return std::env::var(var).ok();
    }
    if let Some(path) = key.strip_prefix("file.") {
        return std::fs::read_to_string(path)
            .ok()
            .map(|content| content.trim_end_matches(['\r', '\n']).to_string());
    }
    None
}
