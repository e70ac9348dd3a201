//! Identity-provider sessions.
//!
//! The `oauth2` callout reads a session token from the client's connect
//! options and turns it into [`SessionClaims`] through a named
//! [`SessionDecoder`]. The built-in decoder accepts tokens of the form
//! `base64url(json).base64url(hmac_sha256(json))`.

use std::fmt::Debug;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{KeyInit, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Session decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Not a two-segment base64url token.
    #[error("malformed session token")]
    Malformed,

    /// MAC verification failed.
    #[error("invalid session signature")]
    BadSignature,

    /// The session `exp` has passed.
    #[error("session expired")]
    Expired,

    /// The decoder could not be used.
    #[error("session decoder error: {0}")]
    Decoder(String),
}

/// Claims of a decoded identity-provider session.
pub trait SessionClaims: Send + Sync + Debug {
    /// The session's email claim.
    fn email(&self) -> Option<String>;

    /// A claim rendered as a string, if present and scalar.
    fn claim(&self, name: &str) -> Option<String>;
}

/// Turns a session token into claims.
pub trait SessionDecoder: Send + Sync + Debug {
    /// Decode and validate `token`.
    fn decode(&self, token: &str) -> Result<Arc<dyn SessionClaims>, SessionError>;
}

/// Session claims backed by a JSON object.
#[derive(Debug, Clone, Default)]
pub struct JsonSession {
    claims: Map<String, Value>,
}

impl JsonSession {
    /// Wrap a claims object.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self { claims }
    }
}

impl SessionClaims for JsonSession {
    fn email(&self) -> Option<String> {
        self.claim("email")
    }

    fn claim(&self, name: &str) -> Option<String> {
        match self.claims.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => {
                tracing::warn!(claim = name, kind = %json_kind(other), "session claim is not a scalar");
                None
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        _ => "scalar",
    }
}

/// HMAC-SHA256 signed session tokens.
pub struct HmacSessionDecoder {
    secret: Vec<u8>,
}

impl Debug for HmacSessionDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSessionDecoder").finish_non_exhaustive()
    }
}

impl HmacSessionDecoder {
    /// Create a decoder verifying with `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Sign a claims object into a session token.
    pub fn encode(&self, claims: &Map<String, Value>) -> Result<String, SessionError> {
        let body = serde_json::to_vec(claims).map_err(|e| SessionError::Decoder(e.to_string()))?;
        let mac = self.mac(&body)?;
        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&body), URL_SAFE_NO_PAD.encode(mac)))
    }

    fn mac(&self, body: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut mac = hmac::Hmac::<Sha256>::new_from_slice(&self.secret)
            .map_err(|e| SessionError::Decoder(format!("invalid secret: {e}")))?;
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl SessionDecoder for HmacSessionDecoder {
    fn decode(&self, token: &str) -> Result<Arc<dyn SessionClaims>, SessionError> {
        let (body_b64, mac_b64) = token.trim().split_once('.').ok_or(SessionError::Malformed)?;
        let body = URL_SAFE_NO_PAD.decode(body_b64).map_err(|_| SessionError::Malformed)?;
        let presented = URL_SAFE_NO_PAD.decode(mac_b64).map_err(|_| SessionError::Malformed)?;

        let expected = self.mac(&body)?;
        if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            return Err(SessionError::BadSignature);
        }

        let claims: Map<String, Value> = serde_json::from_slice(&body).map_err(|_| SessionError::Malformed)?;
        let expired = claims
            .get("exp")
            .and_then(Value::as_i64)
            .is_some_and(|exp| exp <= Utc::now().timestamp());
        if expired {
            return Err(SessionError::Expired);
        }

        Ok(Arc::new(JsonSession::new(claims)))
    }
}
