//! Deterministic SHA-256 digest over a snapshot's staking data.

use crate::stake::WalletStakeSummary;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Normalize JSON for hashing: sort keys and no whitespace.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(m) => {
            let mut keys: Vec<_> = m.keys().collect();
            keys.sort();
            let out: std::collections::BTreeMap<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), normalize(&m[k])))
                .collect();
            Value::Object(serde_json::Map::from_iter(out))
        }
        Value::Array(arr) => Value::Array(arr.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 over the key-sorted, whitespace-free JSON of `staking_data`.
/// Two runs that reconstruct the same stakes produce the same digest, which
/// is what makes incremental idempotence directly checkable.
pub fn staking_data_digest(staking_data: &[WalletStakeSummary]) -> Result<String, DigestError> {
    let json = serde_json::to_value(staking_data)?;
    let normalized = serde_json::to_string(&normalize(&json))?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
