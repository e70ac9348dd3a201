//! Claim payloads exchanged during an authorization callout.
//!
//! Field names follow the broker's wire format (`snake_case`, with a few
//! historical short names such as `pub`/`sub`/`resp`). Empty collections and
//! empty strings are omitted on output so that tokens stay small.

use serde::{Deserialize, Serialize};

/// Sentinel for "no limit" on numeric user limits.
pub const NO_LIMIT: i64 = -1;

/// Claims schema version emitted by this crate.
pub const CLAIMS_VERSION: u8 = 2;

/// `type` value of an authorization request payload.
pub const AUTHORIZATION_REQUEST_TYPE: &str = "authorization_request";
/// `type` value of an authorization response payload.
pub const AUTHORIZATION_RESPONSE_TYPE: &str = "authorization_response";
/// `type` value of a user payload.
pub const USER_TYPE: &str = "user";

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Identity of the broker server that forwarded the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerId {
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Server host.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Server public key, used as the response audience.
    #[serde(default)]
    pub id: String,
    /// Server version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Cluster name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
}

/// What the broker knows about the connecting client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInformation {
    /// Remote host. Empty for in-process connections.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Broker-assigned client id.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    /// Authenticated user, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Client-supplied name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Connection kind (`Client`, `Leafnode`, ...).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Connection type (`STANDARD`, `WEBSOCKET`, `MQTT`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub client_type: String,
    /// MQTT client id, set only for MQTT transports.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mqtt_id: String,
    /// Nonce presented to the client.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,
}

impl ClientInformation {
    /// Whether the client connected over the MQTT gateway.
    #[must_use]
    pub fn is_mqtt(&self) -> bool {
        !self.mqtt_id.is_empty()
    }
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// Options the client sent in its `CONNECT` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// User JWT, if the client presented one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwt: String,
    /// Client public key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nkey: String,
    /// Nonce signature.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sig: String,
    /// Bearer token.
    #[serde(rename = "auth_token", default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Username.
    #[serde(rename = "user", default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Password.
    #[serde(rename = "pass", default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Client name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Client library language.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lang: String,
    /// Client library version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Protocol level.
    #[serde(default)]
    pub protocol: i32,
}

/// Payload of an authorization request sent by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Server that forwarded the request.
    #[serde(default)]
    pub server_id: ServerId,
    /// Ephemeral public key the issued user claims must be bound to.
    #[serde(default)]
    pub user_nkey: String,
    /// Client information.
    #[serde(default)]
    pub client_info: ClientInformation,
    /// Client connect options.
    #[serde(default)]
    pub connect_opts: ConnectOptions,
    /// Request nonce.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_nonce: String,
    /// Always [`AUTHORIZATION_REQUEST_TYPE`].
    #[serde(rename = "type", default)]
    pub claim_type: String,
    /// Schema version.
    #[serde(default)]
    pub version: u8,
}

/// Payload of the reply sent back to the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    /// Encoded user claims on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwt: String,
    /// Denial message on failure.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Account public key that signed `jwt`, when it differs from the issuer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer_account: String,
    /// Always [`AUTHORIZATION_RESPONSE_TYPE`].
    #[serde(rename = "type", default)]
    pub claim_type: String,
    /// Schema version.
    #[serde(default)]
    pub version: u8,
}

impl AuthorizationResponse {
    /// An empty response payload with type and version set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            claim_type: AUTHORIZATION_RESPONSE_TYPE.to_string(),
            version: CLAIMS_VERSION,
            ..Self::default()
        }
    }
}

/// Allow/deny subject lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Allowed subjects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    /// Denied subjects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl Permission {
    /// Whether both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Permission to publish to reply subjects of received requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePermission {
    /// Maximum number of responses (0 = one).
    #[serde(default)]
    pub max: i32,
    /// Validity window in nanoseconds (0 = unlimited).
    #[serde(default)]
    pub ttl: i64,
}

/// A daily access window, `HH:MM:SS` on both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start.
    pub start: String,
    /// Window end.
    pub end: String,
}

/// The `nats` section of user claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Publish permissions.
    #[serde(rename = "pub", default, skip_serializing_if = "Permission::is_empty")]
    pub publish: Permission,
    /// Subscribe permissions.
    #[serde(rename = "sub", default, skip_serializing_if = "Permission::is_empty")]
    pub subscribe: Permission,
    /// Response permission.
    #[serde(rename = "resp", default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsePermission>,
    /// Allowed source networks (CIDR).
    #[serde(rename = "src", default, skip_serializing_if = "Vec::is_empty")]
    pub source_networks: Vec<String>,
    /// Allowed time-of-day windows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<TimeRange>,
    /// Time zone the windows are evaluated in.
    #[serde(rename = "times_location", default, skip_serializing_if = "String::is_empty")]
    pub locale: String,
    /// Maximum subscriptions.
    #[serde(default = "no_limit")]
    pub subs: i64,
    /// Maximum data in flight, bytes.
    #[serde(default = "no_limit")]
    pub data: i64,
    /// Maximum message payload, bytes.
    #[serde(default = "no_limit")]
    pub payload: i64,
    /// Whether the user may connect with this token alone.
    #[serde(default, skip_serializing_if = "is_false")]
    pub bearer_token: bool,
    /// Connection types the user may use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_connection_types: Vec<String>,
    /// Account public key that signed these claims, when it is a signing key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer_account: String,
    /// Always [`USER_TYPE`].
    #[serde(rename = "type", default)]
    pub claim_type: String,
    /// Schema version.
    #[serde(default)]
    pub version: u8,
}

fn no_limit() -> i64 {
    NO_LIMIT
}

impl Default for User {
    fn default() -> Self {
        Self {
            publish: Permission::default(),
            subscribe: Permission::default(),
            response: None,
            source_networks: Vec::new(),
            times: Vec::new(),
            locale: String::new(),
            subs: NO_LIMIT,
            data: NO_LIMIT,
            payload: NO_LIMIT,
            bearer_token: false,
            allowed_connection_types: Vec::new(),
            issuer_account: String::new(),
            claim_type: USER_TYPE.to_string(),
            version: CLAIMS_VERSION,
        }
    }
}

/// Registered claims shared by every token, plus a type-specific `nats` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims<T> {
    /// Token id: hash of the payload.
    #[serde(rename = "jti", default)]
    pub id: String,
    /// Issued-at, Unix seconds.
    #[serde(rename = "iat", default)]
    pub issued_at: i64,
    /// Expiry, Unix seconds (0 = never).
    #[serde(rename = "exp", default, skip_serializing_if = "is_zero_i64")]
    pub expires: i64,
    /// Issuer public key.
    #[serde(rename = "iss", default)]
    pub issuer: String,
    /// Subject.
    #[serde(rename = "sub", default)]
    pub subject: String,
    /// Audience.
    #[serde(rename = "aud", default, skip_serializing_if = "String::is_empty")]
    pub audience: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Type-specific section.
    pub nats: T,
}

/// Claims of an inbound authorization request.
pub type AuthorizationRequestClaims = Claims<AuthorizationRequest>;
/// Claims of an authorization reply.
pub type AuthorizationResponseClaims = Claims<AuthorizationResponse>;
/// Claims granting a connecting client its identity and permissions.
pub type UserClaims = Claims<User>;

impl UserClaims {
    /// Fresh user claims bound to `subject` with no limits.
    #[must_use]
    pub fn for_user(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            nats: User::default(),
            ..Self::default()
        }
    }
}

impl AuthorizationResponseClaims {
    /// Fresh response claims for the client key `subject`.
    #[must_use]
    pub fn for_user(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            nats: AuthorizationResponse::new(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_defaults_to_no_limits() {
        let claims = UserClaims::for_user("UABC");
        assert_eq!(claims.subject, "UABC");
        assert_eq!(claims.nats.subs, NO_LIMIT);
        assert_eq!(claims.nats.data, NO_LIMIT);
        assert_eq!(claims.nats.payload, NO_LIMIT);
        assert_eq!(claims.nats.claim_type, USER_TYPE);
    }

    #[test]
    fn request_parses_broker_field_names() {
        let json = r#"{
            "server_id": {"name": "n1", "id": "NSERVER"},
            "user_nkey": "UCLIENT",
            "client_info": {"host": "10.0.0.5", "kind": "Client", "type": "websocket"},
            "connect_opts": {"user": "alice", "pass": "pw", "auth_token": "tok", "protocol": 1},
            "type": "authorization_request",
            "version": 2
        }"#;
        let req: AuthorizationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.server_id.id, "NSERVER");
        assert_eq!(req.connect_opts.username, "alice");
        assert_eq!(req.connect_opts.password, "pw");
        assert_eq!(req.connect_opts.token, "tok");
        assert_eq!(req.client_info.client_type, "websocket");
        assert!(!req.client_info.is_mqtt());
    }

    #[test]
    fn empty_permissions_are_omitted() {
        let user = User::default();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("pub").is_none());
        assert!(json.get("sub").is_none());
        assert!(json.get("resp").is_none());
        assert_eq!(json["subs"], -1);
    }
}
