use pomerium_operator_core::{Attributes, Policy, Value};
use std::collections::BTreeMap;

/// Annotations with this prefix set the named field on every policy produced for an object,
/// e.g. `ingress.pomerium.io/allowed_groups: '["admins"]'`.
pub const OVERRIDE_PREFIX: &str = "ingress.pomerium.io/";

/// Policy fields set through annotations.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Overrides {
    from: Option<String>,
    to: Option<String>,
    allowed_groups: Option<Vec<String>>,
    allowed_users: Option<Vec<String>>,
    allowed_domains: Option<Vec<String>>,
    allow_public_unauthenticated_access: Option<bool>,
    cors_allow_preflight: Option<bool>,
    preserve_host_header: Option<bool>,
    tls_skip_verify: Option<bool>,
    attributes: Attributes,
}

#[derive(Debug, thiserror::Error)]
#[error("annotation {annotation} must be {expected}")]
pub struct InvalidOverride {
    pub annotation: String,
    pub expected: &'static str,
}

// === impl Overrides ===

impl Overrides {
    /// Collects overrides from an object's annotations.
    ///
    /// Values are parsed as YAML (and therefore JSON); a value that does not parse is used as a
    /// literal string.
    pub(crate) fn from_annotations(
        annotations: Option<&BTreeMap<String, String>>,
    ) -> Result<Self, InvalidOverride> {
        let mut overrides = Self::default();

        for (annotation, raw) in annotations.into_iter().flatten() {
            let field = match annotation.strip_prefix(OVERRIDE_PREFIX) {
                Some(field) if !field.is_empty() => field,
                _ => continue,
            };
            let value =
                serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw.as_str()));

            let invalid = |expected| InvalidOverride {
                annotation: annotation.clone(),
                expected,
            };
            match field {
                "from" => overrides.from = Some(string(value).ok_or_else(|| invalid("a string"))?),
                "to" => overrides.to = Some(string(value).ok_or_else(|| invalid("a string"))?),
                "allowed_groups" => {
                    overrides.allowed_groups =
                        Some(strings(value).ok_or_else(|| invalid("a list of strings"))?)
                }
                "allowed_users" => {
                    overrides.allowed_users =
                        Some(strings(value).ok_or_else(|| invalid("a list of strings"))?)
                }
                "allowed_domains" => {
                    overrides.allowed_domains =
                        Some(strings(value).ok_or_else(|| invalid("a list of strings"))?)
                }
                "allow_public_unauthenticated_access" => {
                    overrides.allow_public_unauthenticated_access =
                        Some(boolean(value).ok_or_else(|| invalid("a boolean"))?)
                }
                "cors_allow_preflight" => {
                    overrides.cors_allow_preflight =
                        Some(boolean(value).ok_or_else(|| invalid("a boolean"))?)
                }
                "preserve_host_header" => {
                    overrides.preserve_host_header =
                        Some(boolean(value).ok_or_else(|| invalid("a boolean"))?)
                }
                "tls_skip_verify" => {
                    overrides.tls_skip_verify =
                        Some(boolean(value).ok_or_else(|| invalid("a boolean"))?)
                }
                field => {
                    overrides.attributes.insert(field.to_string(), value);
                }
            }
        }

        Ok(overrides)
    }

    pub(crate) fn apply(&self, policy: &mut Policy) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        set(&mut policy.from, &self.from);
        set(&mut policy.to, &self.to);
        set(&mut policy.allowed_groups, &self.allowed_groups);
        set(&mut policy.allowed_users, &self.allowed_users);
        set(&mut policy.allowed_domains, &self.allowed_domains);
        set(
            &mut policy.allow_public_unauthenticated_access,
            &self.allow_public_unauthenticated_access,
        );
        set(&mut policy.cors_allow_preflight, &self.cors_allow_preflight);
        set(&mut policy.preserve_host_header, &self.preserve_host_header);
        set(&mut policy.tls_skip_verify, &self.tls_skip_verify);
        policy.attributes.extend(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}

fn string(value: Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn strings(value: Value) -> Option<Vec<String>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Sequence(values) => values.into_iter().map(string).collect(),
        _ => None,
    }
}

fn boolean(value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        _ => None,
    }
}
