//! Instance config file naming
//!
//! Grammar: `{TypeFullName}.{InstanceSN}.{suffix}`. The type name may itself
//! contain dots; the SN is the last dot-separated segment before the suffix
//! and may not contain dots.

use std::path::Path;

use tracing::warn;

use crate::HostError;

/// Identity derived from a config file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFile {
    /// Fully qualified backend type name
    pub type_name: String,
    /// Instance serial taken from the file name
    pub sn: String,
}

impl InstanceFile {
    /// Parse `file_name` against `suffix` (e.g. `config.json`)
    pub fn parse(file_name: &str, suffix: &str) -> Result<Self, HostError> {
        let invalid = || HostError::InvalidFileName(file_name.to_string());

        let suffix = suffix.trim_start_matches('.');
        let stem = file_name
            .strip_suffix(suffix)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(invalid)?;
        let (type_name, sn) = stem.rsplit_once('.').ok_or_else(invalid)?;

        if type_name.is_empty() || sn.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            type_name: type_name.to_string(),
            sn: sn.to_string(),
        })
    }

    /// Parse the file-name component of a path
    pub fn from_path(path: &Path, suffix: &str) -> Result<Self, HostError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| HostError::InvalidFileName(path.display().to_string()))?;
        Self::parse(name, suffix)
    }

    /// Instance key, `{type}.{sn}`
    pub fn key(&self) -> String {
        instance_key(&self.type_name, &self.sn)
    }

    /// Reconcile the SN field inside the config object with the file name
    ///
    /// A missing field is filled in. A differing field is overwritten; the
    /// file name wins.
    pub fn bind_sn(&self, config: &mut serde_json::Value, sn_key: &str) {
        let Some(object) = config.as_object_mut() else {
            return;
        };
        match object.get(sn_key).map(sn_text) {
            Some(existing) if existing == self.sn => {}
            Some(existing) => {
                warn!(
                    file_sn = %self.sn,
                    config_sn = %existing,
                    "Config SN differs from file name, using file name"
                );
                object.insert(sn_key.to_string(), self.sn.clone().into());
            }
            None => {
                object.insert(sn_key.to_string(), self.sn.clone().into());
            }
        }
    }
}

/// Build an instance key
pub fn instance_key(type_name: &str, sn: &str) -> String {
    format!("{}.{}", type_name, sn)
}

fn sn_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
