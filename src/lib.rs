//! NATS authorization callout service.
//!
//! The broker forwards every connection attempt to this service as a signed
//! authorization request. The service runs it through an ordered list of
//! policies and answers with a signed credential for the target account or a
//! signed denial.
//!
//! # Features
//!
//! - **Policies**: first-match-wins lists of matchers over connect options and client info
//! - **Handlers**: allow (with claim templates), deny, identity-provider sessions
//! - **Signing**: one static account key, or per-account keys from a keystore
//! - **Bootstrap**: self-generated internal auth account when no key is configured
//! - **Pinned tokens**: out-of-band bearer tokens bound to one account

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod bootstrap;
pub mod callout;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod matcher;
pub mod pinned;
pub mod placeholder;
pub mod policy;
pub mod request;
pub mod service;
pub mod signing;
pub mod template;

pub use error::{Error, Result};
pub use service::AuthService;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| Error::Internal(format!("failed to install subscriber: {e}")))
}
