//! Configuration fingerprints.

use crate::error::FingerprintError;
use kcache_common::ContentHash;
use kcache_config::CompileConfig;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A configuration object that can be fingerprinted.
pub trait FingerprintConfig: Serialize {
    /// Dotted field names that never affect generated code.
    fn volatile_fields(&self) -> &'static [&'static str] {
        &[]
    }
}

impl FingerprintConfig for CompileConfig {
    fn volatile_fields(&self) -> &'static [&'static str] {
        &["session_tag"]
    }
}

/// Digests configuration objects as sorted `name=value` lines.
///
/// Nested fields are flattened to dotted names. Any name with a segment
/// starting with `_` and any volatile field is skipped. String values, and
/// name segments other than plain identifiers, are written as JSON strings
/// so that no value can imitate another line.
pub struct ConfigFingerprinter;

impl ConfigFingerprinter {
    /// Returns the canonical text hashed by [`fingerprint`](Self::fingerprint).
    pub fn canonical_text<C: FingerprintConfig>(config: &C) -> Result<String, FingerprintError> {
        let value = serde_json::to_value(config)?;
        let mut lines = BTreeMap::new();
        flatten("", &value, &mut lines);
        let volatile = config.volatile_fields();
        let text = lines
            .into_iter()
            .filter(|(name, _)| !volatile.contains(&name.as_str()))
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }

    /// Digests `config`.
    pub fn fingerprint<C: FingerprintConfig>(config: &C) -> Result<ContentHash, FingerprintError> {
        Ok(ContentHash::from_str_content(&Self::canonical_text(config)?))
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) if !map.is_empty() || prefix.is_empty() => {
            for (key, child) in map {
                if key.starts_with('_') {
                    continue;
                }
                let segment = if is_plain(key) {
                    key.clone()
                } else {
                    Value::String(key.clone()).to_string()
                };
                let name = if prefix.is_empty() {
                    segment
                } else {
                    format!("{prefix}.{segment}")
                };
                flatten(&name, child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn is_plain(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
