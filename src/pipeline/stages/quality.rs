//! Quality collaborator stage (spec §4.5 `quality.quality_threshold`,
//! SPEC_FULL.md Open Question resolution #3): scores a validated artifact
//! on the four core-adjacent sub-metrics the source weights explicitly.
//! The fifth ("structure", 20 points) is out of this engine's boundary and
//! recorded as `null` with a note, per the resolution.

use crate::domain::CollectionArtifact;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const COMPLETENESS_WEIGHT: f64 = 25.0;
const CONSISTENCY_WEIGHT: f64 = 20.0;
const ACCURACY_WEIGHT: f64 = 20.0;
const INTEGRITY_WEIGHT: f64 = 15.0;
const CORE_METRIC_TOTAL: f64 = COMPLETENESS_WEIGHT + CONSISTENCY_WEIGHT + ACCURACY_WEIGHT + INTEGRITY_WEIGHT;

#[derive(Debug, Serialize, Deserialize)]
pub struct QualityReport {
    pub completeness: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub integrity: f64,
    /// Out of this engine's boundary (SPEC_FULL.md Open Question #3).
    pub structure: Option<f64>,
    /// Weighted sum over the four core metrics, out of 80.
    pub score: f64,
    /// `score / 80`, compared against `quality.quality_threshold`.
    pub normalized_score: f64,
    pub passed: bool,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn score_artifact(artifact: &CollectionArtifact, window_start_ms: i64, window_end_ms: i64) -> (f64, f64, f64, f64) {
    let total_matches = artifact.matches.len();
    let complete_matches = artifact.matches.values().filter(|m| !m.info.incomplete).count();
    let completeness = ratio(complete_matches, total_matches);

    let mut total_participants = 0usize;
    let mut known_participants = 0usize;
    for m in artifact.matches.values() {
        for p in &m.info.participants {
            total_participants += 1;
            if artifact.players.contains_key(&p.puuid) {
                known_participants += 1;
            }
        }
    }
    let consistency = ratio(known_participants, total_participants);

    let in_window = artifact
        .matches
        .values()
        .filter(|m| m.info.game_datetime >= window_start_ms && m.info.game_datetime < window_end_ms)
        .count();
    let accuracy = ratio(in_window, total_matches);

    let matching_keys = artifact.players.iter().filter(|(puuid, p)| *puuid == &p.puuid).count();
    let integrity = ratio(matching_keys, artifact.players.len());

    (completeness, consistency, accuracy, integrity)
}

/// Reads a previously written `report_path` back (spec §4.5 "Stage
/// contract" skip branch: the orchestrator still needs `passed`/
/// `normalized_score` to gate downstream stages without re-running this
/// stage).
pub fn load(report_path: &Path) -> Result<QualityReport> {
    let raw = std::fs::read_to_string(report_path)
        .map_err(|e| eyre!("failed to read quality report {}: {e}", report_path.display()))?;
    serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse quality report {}: {e}", report_path.display()))
}

pub fn run(
    validated_path: &Path,
    window_start_ms: i64,
    window_end_ms: i64,
    quality_threshold: f64,
    report_path: &Path,
) -> Result<QualityReport> {
    let raw = std::fs::read_to_string(validated_path)
        .map_err(|e| eyre!("failed to read validated artifact {}: {e}", validated_path.display()))?;
    let artifact: CollectionArtifact = serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse validated artifact: {e}"))?;

    let (completeness, consistency, accuracy, integrity) = score_artifact(&artifact, window_start_ms, window_end_ms);
    let score = completeness * COMPLETENESS_WEIGHT + consistency * CONSISTENCY_WEIGHT + accuracy * ACCURACY_WEIGHT + integrity * INTEGRITY_WEIGHT;
    let normalized_score = score / CORE_METRIC_TOTAL;

    let report = QualityReport {
        completeness,
        consistency,
        accuracy,
        integrity,
        structure: None,
        score,
        normalized_score,
        passed: normalized_score >= quality_threshold,
    };

    if let Some(parent) = report_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(report_path, serde_json::to_string_pretty(&report)?)
        .map_err(|e| eyre!("failed to write quality report {}: {e}", report_path.display()))?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn artifact_with_one_clean_match() -> CollectionArtifact {
        let mut players = BTreeMap::new();
        players.insert(
            "p1".to_string(),
            Player { puuid: "p1".to_string(), tier: Tier::Gold, rank: Some(Division::I), league_points: 10, summoner: SummonerMeta::default() },
        );
        let mut matches = BTreeMap::new();
        matches.insert(
            "NA1_1".to_string(),
            Match {
                match_id: "NA1_1".to_string(),
                info: MatchInfo { game_datetime: 500, game_length: 1800.0, game_version: "14.1".to_string(), participants: vec![Participant { puuid: "p1".to_string(), placement: 1, level: 9, units: vec![], traits: vec![], augments: vec![] }], incomplete: false },
            },
        );
        CollectionArtifact {
            context: default_context(),
            type_: "TFTDataCollection".to_string(),
            collection_info: CollectionInfo { timestamp: "2026-01-01T00:00:00Z".to_string(), extraction_location: "NA1".to_string(), data_version: "1.0.0".to_string(), collection_method: CollectionMethod::Daily, incomplete_match_policy: IncompleteMatchPolicy::Mark },
            players,
            matches,
            leaderboards: None,
            error_summary: ErrorSummary::default(),
        }
    }

    #[test]
    fn clean_artifact_scores_full_marks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("validated.json");
        std::fs::write(&path, serde_json::to_string(&artifact_with_one_clean_match()).unwrap()).unwrap();

        let report_path = dir.path().join("report.json");
        let report = run(&path, 0, 1000, 0.5, &report_path).unwrap();

        assert_eq!(report.score, CORE_METRIC_TOTAL);
        assert!(report.passed);
    }

    #[test]
    fn threshold_gate_rejects_below_cutoff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("validated.json");
        std::fs::write(&path, serde_json::to_string(&artifact_with_one_clean_match()).unwrap()).unwrap();

        let report_path = dir.path().join("report.json");
        // Window excludes the match's timestamp, tanking accuracy.
        let report = run(&path, 0, 100, 0.99, &report_path).unwrap();
        assert!(!report.passed);
    }
}
