use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form policy attributes that the operator does not interpret.
pub type Attributes = BTreeMap<String, serde_yaml::Value>;

/// A single routing/authorization rule in the proxy's configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Policy {
    /// The externally visible URL, e.g. `https://app.example.com`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,

    /// The upstream URL traffic is forwarded to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_users: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_public_unauthenticated_access: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cors_allow_preflight: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preserve_host_header: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tls_skip_verify: bool,

    /// Any other policy settings, passed through to the proxy verbatim.
    #[serde(flatten)]
    pub attributes: Attributes,
}

// === impl Policy ===

impl Policy {
    pub fn to(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn route(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }
}
