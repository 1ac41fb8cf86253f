use crate::Policy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A proxy configuration document.
///
/// Only the policy list is modeled; all other settings are held as opaque values (in key order)
/// so that they serialize exactly as they were supplied.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Options {
    #[serde(default, alias = "policies", skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<Policy>,

    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

// === impl Options ===

impl Options {
    /// Parses a YAML (or JSON) configuration document. An empty document is an empty
    /// configuration.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, serde_yaml::Error> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(bytes)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Returns a copy of these options without any policies.
    pub fn settings_only(&self) -> Self {
        Self {
            policy: Vec::new(),
            settings: self.settings.clone(),
        }
    }

    /// A hex-encoded SHA-256 digest of the non-policy settings.
    ///
    /// Policies change whenever cluster resources change and the proxy reloads them on its own,
    /// so they are excluded.
    pub fn checksum(&self) -> Result<String, serde_yaml::Error> {
        let yaml = self.settings_only().to_yaml()?;
        Ok(format!("{:x}", Sha256::digest(yaml.as_bytes())))
    }
}
