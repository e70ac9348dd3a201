//! Signed claim tokens used by NATS authorization callouts.
//!
//! A token is three dot-separated base64url segments:
//!
//! ```text
//! base64url({"typ":"JWT","alg":"ed25519-nkey"}) . base64url(claims) . base64url(signature)
//! ```
//!
//! The signature is ed25519 over `header.payload`, made with an nkey whose
//! public key is the `iss` claim. [`decode`] verifies it against that key, so a
//! decoded token is always self-consistent; whether the issuer is *trusted* is
//! the caller's decision.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod types;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use nkeys::KeyPair;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use nkeys;
pub use types::*;

/// Header algorithm for nkey-signed tokens.
pub const ALGORITHM: &str = "ed25519-nkey";

const TOKEN_HEADER: &str = r#"{"typ":"JWT","alg":"ed25519-nkey"}"#;

/// Errors from token encoding and decoding.
#[derive(Error, Debug)]
pub enum ClaimsError {
    /// The token does not have three segments.
    #[error("invalid token format")]
    InvalidFormat,

    /// A segment is not valid base64url.
    #[error("invalid base64 encoding")]
    InvalidBase64,

    /// Header or payload is not valid JSON for the expected claims.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The header names an algorithm other than [`ALGORITHM`].
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The issuer is not a valid public key.
    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// The token has expired.
    #[error("token expired")]
    Expired,

    /// The signing key could not produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(serde::Deserialize)]
struct Header {
    #[serde(default)]
    alg: String,
}

/// Encode and sign `claims` with `signer`.
///
/// Sets `iss` to the signer's public key, `iat` to now when unset, and `jti`
/// to the hash of the resulting payload.
pub fn encode<T: Serialize>(claims: &mut Claims<T>, signer: &KeyPair) -> Result<String, ClaimsError> {
    claims.issuer = signer.public_key();
    if claims.issued_at == 0 {
        claims.issued_at = Utc::now().timestamp();
    }
    claims.id.clear();
    claims.id = claims_hash(claims)?;

    let header_b64 = URL_SAFE_NO_PAD.encode(TOKEN_HEADER);
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = signer
        .sign(signing_input.as_bytes())
        .map_err(|e| ClaimsError::Signing(e.to_string()))?;
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Decode `token`, verify its signature against its own issuer and reject it
/// if expired.
pub fn decode<T: DeserializeOwned>(token: &str) -> Result<Claims<T>, ClaimsError> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(ClaimsError::InvalidFormat);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|_| ClaimsError::InvalidBase64)?;
    let header: Header = serde_json::from_slice(&header_bytes)?;
    if header.alg != ALGORITHM {
        return Err(ClaimsError::UnsupportedAlgorithm(header.alg));
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| ClaimsError::InvalidBase64)?;
    let claims: Claims<T> = serde_json::from_slice(&payload_bytes)?;

    let signature = URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|_| ClaimsError::InvalidBase64)?;
    let issuer = KeyPair::from_public_key(&claims.issuer)
        .map_err(|e| ClaimsError::InvalidIssuer(e.to_string()))?;
    let signing_input = format!("{}.{}", parts[0], parts[1]);
    issuer
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| ClaimsError::InvalidSignature)?;

    if claims.expires != 0 && claims.expires <= Utc::now().timestamp() {
        return Err(ClaimsError::Expired);
    }

    Ok(claims)
}

/// Hex-encoded SHA-256 of the serialized claims.
fn claims_hash<T: Serialize>(claims: &Claims<T>) -> Result<String, ClaimsError> {
    let bytes = serde_json::to_vec(claims)?;
    Ok(hex::encode_upper(Sha256::digest(&bytes)))
}
