//! Validator collaborator stage (spec §6, SPEC_FULL.md [SUPPLEMENT]): reruns
//! the §3 invariant checks plus a few field-presence checks over a raw
//! artifact, writes the artifact through unchanged when it holds, and
//! records a pass/fail report.

use crate::artifact::check_invariants;
use crate::domain::CollectionArtifact;
use eyre::{eyre, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub cycle_id: String,
    pub passed: bool,
    pub violations: Vec<String>,
    pub checked_matches: usize,
    pub checked_players: usize,
}

fn field_presence_violations(artifact: &CollectionArtifact) -> Vec<String> {
    let mut out = Vec::new();
    if artifact.collection_info.extraction_location.trim().is_empty() {
        out.push("collectionInfo.extractionLocation is empty".to_string());
    }
    if artifact.collection_info.data_version.trim().is_empty() {
        out.push("collectionInfo.dataVersion is empty".to_string());
    }
    for (puuid, player) in &artifact.players {
        if player.puuid != *puuid {
            out.push(format!("players map key {puuid} does not match embedded puuid {}", player.puuid));
        }
    }
    out
}

/// Reads `raw_path`, validates it, writes `validated_path` (unchanged) and
/// `report_path`. Returns the report for the caller (e.g. the quality gate).
pub fn run(cycle_id: &str, raw_path: &Path, window_start_ms: i64, window_end_ms: i64, validated_path: &Path, report_path: &Path) -> Result<ValidationReport> {
    let raw = std::fs::read_to_string(raw_path).map_err(|e| eyre!("failed to read raw artifact {}: {e}", raw_path.display()))?;
    let artifact: CollectionArtifact = serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse raw artifact: {e}"))?;

    let mut violations: Vec<String> = check_invariants(&artifact, window_start_ms, window_end_ms).into_iter().map(|v| v.to_string()).collect();
    violations.extend(field_presence_violations(&artifact));

    let report = ValidationReport {
        cycle_id: cycle_id.to_string(),
        passed: violations.is_empty(),
        violations,
        checked_matches: artifact.matches.len(),
        checked_players: artifact.players.len(),
    };

    if let Some(parent) = report_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(report_path, serde_json::to_string_pretty(&report)?)?;

    if report.passed {
        if let Some(parent) = validated_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(validated_path, &raw).map_err(|e| eyre!("failed to write validated artifact {}: {e}", validated_path.display()))?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn passing_artifact_is_copied_through() {
        let dir = tempdir().unwrap();
        let raw_path = dir.path().join("raw.json");
        let artifact = CollectionArtifact {
            context: default_context(),
            type_: "TFTDataCollection".to_string(),
            collection_info: CollectionInfo {
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                extraction_location: "NA1".to_string(),
                data_version: "1.0.0".to_string(),
                collection_method: CollectionMethod::Daily,
                incomplete_match_policy: IncompleteMatchPolicy::Mark,
            },
            players: BTreeMap::new(),
            matches: BTreeMap::new(),
            leaderboards: None,
            error_summary: ErrorSummary::default(),
        };
        std::fs::write(&raw_path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let validated_path = dir.path().join("validated.json");
        let report_path = dir.path().join("report.json");
        let report = run("20260101", &raw_path, 0, i64::MAX, &validated_path, &report_path).unwrap();

        assert!(report.passed);
        assert_eq!(report.cycle_id, "20260101");
        assert!(validated_path.exists());
    }
}
