//! Cross-cycle collaborator stage: diffs the current cycle's player/match
//! key sets against the immediately preceding cycle found in `data/raw/`.

use crate::domain::CollectionArtifact;
use eyre::{eyre, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Serialize, Default)]
pub struct CrossCycleReport {
    pub previous_cycle_id: Option<String>,
    pub new_players: Vec<String>,
    pub dropped_players: Vec<String>,
    pub new_matches: Vec<String>,
    pub dropped_matches: Vec<String>,
}

fn load_artifact(path: &Path) -> Result<CollectionArtifact> {
    let raw = std::fs::read_to_string(path).map_err(|e| eyre!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse {}: {e}", path.display()))
}

/// Finds the raw artifact for the most recent cycleId strictly before
/// `cycle_id` among the files in `raw_dir` matching
/// `tft_collection_<cycleId>.json`.
fn previous_raw_path(raw_dir: &Path, cycle_id: &str) -> Option<(String, std::path::PathBuf)> {
    let entries = std::fs::read_dir(raw_dir).ok()?;
    let mut candidates: Vec<(String, std::path::PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let stripped = name.strip_prefix("tft_collection_")?.strip_suffix(".json")?;
            if stripped.ends_with("_checkpoint") || stripped == cycle_id {
                return None;
            }
            Some((stripped.to_string(), e.path()))
        })
        .filter(|(id, _)| id.as_str() < cycle_id)
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates.pop()
}

pub fn run(raw_dir: &Path, cycle_id: &str, current_raw_path: &Path, report_path: &Path) -> Result<CrossCycleReport> {
    let current = load_artifact(current_raw_path)?;
    let current_players: BTreeSet<String> = current.players.keys().cloned().collect();
    let current_matches: BTreeSet<String> = current.matches.keys().cloned().collect();

    let report = match previous_raw_path(raw_dir, cycle_id) {
        Some((prev_id, prev_path)) => {
            let previous = load_artifact(&prev_path)?;
            let prev_players: BTreeSet<String> = previous.players.keys().cloned().collect();
            let prev_matches: BTreeSet<String> = previous.matches.keys().cloned().collect();

            CrossCycleReport {
                previous_cycle_id: Some(prev_id),
                new_players: current_players.difference(&prev_players).cloned().collect(),
                dropped_players: prev_players.difference(&current_players).cloned().collect(),
                new_matches: current_matches.difference(&prev_matches).cloned().collect(),
                dropped_matches: prev_matches.difference(&current_matches).cloned().collect(),
            }
        }
        None => CrossCycleReport {
            previous_cycle_id: None,
            new_players: current_players.into_iter().collect(),
            new_matches: current_matches.into_iter().collect(),
            ..Default::default()
        },
    };

    if let Some(parent) = report_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(report_path, serde_json::to_string_pretty(&report)?)
        .map_err(|e| eyre!("failed to write cross-cycle report {}: {e}", report_path.display()))?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn minimal_artifact(players: &[&str]) -> CollectionArtifact {
        let mut map = BTreeMap::new();
        for p in players {
            map.insert(
                p.to_string(),
                Player { puuid: p.to_string(), tier: Tier::Gold, rank: None, league_points: 0, summoner: SummonerMeta::default() },
            );
        }
        CollectionArtifact {
            context: default_context(),
            type_: "TFTDataCollection".to_string(),
            collection_info: CollectionInfo { timestamp: "2026-01-01T00:00:00Z".to_string(), extraction_location: "NA1".to_string(), data_version: "1.0.0".to_string(), collection_method: CollectionMethod::Daily, incomplete_match_policy: IncompleteMatchPolicy::Mark },
            players: map,
            matches: BTreeMap::new(),
            leaderboards: None,
            error_summary: ErrorSummary::default(),
        }
    }

    #[test]
    fn diffs_against_the_prior_cycle() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tft_collection_20260101.json"), serde_json::to_string(&minimal_artifact(&["a", "b"])).unwrap()).unwrap();
        let current_path = dir.path().join("tft_collection_20260102.json");
        std::fs::write(&current_path, serde_json::to_string(&minimal_artifact(&["b", "c"])).unwrap()).unwrap();

        let report_path = dir.path().join("report.json");
        let report = run(dir.path(), "20260102", &current_path, &report_path).unwrap();

        assert_eq!(report.previous_cycle_id.as_deref(), Some("20260101"));
        assert_eq!(report.new_players, vec!["c".to_string()]);
        assert_eq!(report.dropped_players, vec!["a".to_string()]);
    }

    #[test]
    fn no_prior_cycle_reports_everything_as_new() {
        let dir = tempdir().unwrap();
        let current_path = dir.path().join("tft_collection_20260101.json");
        std::fs::write(&current_path, serde_json::to_string(&minimal_artifact(&["a"])).unwrap()).unwrap();

        let report_path = dir.path().join("report.json");
        let report = run(dir.path(), "20260101", &current_path, &report_path).unwrap();
        assert!(report.previous_cycle_id.is_none());
        assert_eq!(report.new_players, vec!["a".to_string()]);
    }
}
