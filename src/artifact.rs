//! CollectionArtifact invariant checks and canonical-form hashing (spec §3,
//! §4.2 "Canonical identifier", §8 "Canonicalization").

use crate::domain::CollectionArtifact;
use crate::errors::ErrorCategory;
use eyre::{eyre, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// A violation of one of the §3 invariants, found at emit time. Fatal for
/// the emit step (spec §7: `INVARIANT_VIOLATION`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub match_id: String,
    pub detail: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.match_id, self.detail)
    }
}

/// Checks every invariant from spec §3/§8 over a fully-assembled artifact.
/// Returns every violation found (not just the first) so a report can list
/// them all.
pub fn check_invariants(artifact: &CollectionArtifact, window_start_ms: i64, window_end_ms: i64) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (match_id, m) in &artifact.matches {
        // Every participant puuid must appear in `players`.
        for p in &m.info.participants {
            if !artifact.players.contains_key(&p.puuid) {
                violations.push(InvariantViolation {
                    match_id: match_id.clone(),
                    detail: format!("participant puuid {} not present in players map", p.puuid),
                });
            }
        }

        // Placements: permutation of a subset of 1..=8, no duplicates.
        let mut seen = HashSet::new();
        for p in &m.info.participants {
            if p.placement < 1 || p.placement > 8 {
                violations.push(InvariantViolation {
                    match_id: match_id.clone(),
                    detail: format!("placement {} out of range 1..=8", p.placement),
                });
                continue;
            }
            if !seen.insert(p.placement) {
                violations.push(InvariantViolation {
                    match_id: match_id.clone(),
                    detail: format!("duplicate placement {}", p.placement),
                });
            }
        }

        // Time window.
        if m.info.game_datetime < window_start_ms || m.info.game_datetime >= window_end_ms {
            violations.push(InvariantViolation {
                match_id: match_id.clone(),
                detail: format!(
                    "game_datetime {} outside window [{}, {})",
                    m.info.game_datetime, window_start_ms, window_end_ms
                ),
            });
        }

        if match_id != &m.match_id {
            violations.push(InvariantViolation {
                match_id: match_id.clone(),
                detail: format!("map key {} does not match embedded matchId {}", match_id, m.match_id),
            });
        }
    }

    violations
}

/// Fails the emit step if any invariant is violated (spec §7). The engine
/// MUST NOT publish an artifact that violates §3.
pub fn ensure_emittable(artifact: &CollectionArtifact, window_start_ms: i64, window_end_ms: i64) -> Result<()> {
    let violations = check_invariants(artifact, window_start_ms, window_end_ms);
    if violations.is_empty() {
        return Ok(());
    }
    let sample: Vec<String> = violations.iter().take(5).map(|v| v.to_string()).collect();
    Err(eyre!(
        "{}: {} artifact invariant violation(s) detected at emit; sample: {}",
        ErrorCategory::InvariantViolation,
        violations.len(),
        sample.join("; ")
    ))
}

/// Recursively sorts a `serde_json::Value`'s object keys and returns the
/// canonical (no insignificant whitespace) serialization. `serde_json`
/// preserves insertion order for maps by default (no `preserve_order`
/// feature is enabled here), but we still normalize explicitly so the
/// canonical form doesn't depend on that feature flag ever being turned on
/// elsewhere in the dependency graph.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let sorted = sort_keys(value);
    serde_json::to_string(&sorted).expect("canonical JSON values are always serializable")
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// SHA-256 over the canonical JSON form of an artifact (spec §4.2, §8).
/// Identical logical content produces identical hashes across
/// serializations.
pub fn content_hash(artifact: &CollectionArtifact) -> Result<String> {
    let value = serde_json::to_value(artifact)?;
    let canon = canonical_json(&value);
    let mut hasher = Sha256::new();
    hasher.update(canon.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 over arbitrary file bytes (spec §4.6 "Checksum requirement").
pub fn hash_file_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
