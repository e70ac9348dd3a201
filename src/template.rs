//! User claims templates.
//!
//! A [`UserClaimsTemplate`] is a sparse overlay: every field is optional and
//! only fields that are present are written to the target claims. String
//! values go through the request's placeholder resolver first, so
//! permissions can reference the connecting client:
//!
//! ```yaml
//! template:
//!   allow_pub: ["orders.{connect_opts.username}.>"]
//!   allow_sub: ["_INBOX.>"]
//!   payload: 1048576
//! ```

use nats_claims::{ResponsePermission, TimeRange, UserClaims};
use serde::{Deserialize, Serialize};

use crate::placeholder::Replacer;

/// Sparse overlay applied to freshly created user claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserClaimsTemplate {
    /// Maximum message payload, bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<i64>,
    /// Maximum subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subs: Option<i64>,
    /// Maximum data in flight, bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<i64>,
    /// Subjects the user may publish to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_pub: Option<Vec<String>>,
    /// Subjects the user may not publish to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_pub: Option<Vec<String>>,
    /// Subjects the user may subscribe to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_sub: Option<Vec<String>>,
    /// Subjects the user may not subscribe to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_sub: Option<Vec<String>>,
    /// Response permission, copied as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_resp: Option<ResponsePermission>,
    /// Time-of-day access windows, copied as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<Vec<TimeRange>>,
    /// Allowed source networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<Vec<String>>,
    /// Time zone for `times`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Allowed connection types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_connection_types: Option<Vec<String>>,
    /// Mark the issued credential as bearer-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<bool>,
}

impl UserClaimsTemplate {
    /// Write every set field into `target`, resolving placeholders with `repl`.
    pub fn render(&self, target: &mut UserClaims, repl: &Replacer) {
        let user = &mut target.nats;
        let resolve = |values: &[String]| -> Vec<String> {
            values.iter().map(|v| repl.replace_known(v, "")).collect()
        };

        if let Some(payload) = self.payload {
            user.payload = payload;
        }
        if let Some(subs) = self.subs {
            user.subs = subs;
        }
        if let Some(data) = self.data {
            user.data = data;
        }
        if let Some(allow) = &self.allow_pub {
            user.publish.allow = resolve(allow);
        }
        if let Some(deny) = &self.deny_pub {
            user.publish.deny = resolve(deny);
        }
        if let Some(allow) = &self.allow_sub {
            user.subscribe.allow = resolve(allow);
        }
        if let Some(deny) = &self.deny_sub {
            user.subscribe.deny = resolve(deny);
        }
        if let Some(resp) = &self.allow_resp {
            user.response = Some(resp.clone());
        }
        if let Some(times) = &self.times {
            user.times.clone_from(times);
        }
        if let Some(src) = &self.src {
            user.source_networks = resolve(src);
        }
        if let Some(locale) = &self.locale {
            user.locale = repl.replace_known(locale, "");
        }
        if let Some(types) = &self.allowed_connection_types {
            user.allowed_connection_types = resolve(types);
        }
        if let Some(bearer) = self.bearer_token {
            user.bearer_token = bearer;
        }
    }
}
