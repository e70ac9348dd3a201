//! Shared provisioning context.
//!
//! Holds the named collaborators callout handlers may look up while they are
//! provisioned. Built once at startup and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::callout::session::SessionDecoder;

/// Collaborators available to callout handlers during provisioning.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    sessions: HashMap<String, Arc<dyn SessionDecoder>>,
}

impl AppContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session endpoint under `name`, replacing any previous one.
    pub fn register_session(&mut self, name: impl Into<String>, decoder: Arc<dyn SessionDecoder>) {
        self.sessions.insert(name.into(), decoder);
    }

    /// Look up a session endpoint.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<Arc<dyn SessionDecoder>> {
        self.sessions.get(name).cloned()
    }

    /// Names of registered session endpoints.
    pub fn session_names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}
