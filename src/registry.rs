//! Identifier & Status Registry (spec §2.2, §3 "MatchStatus", §4.2): a
//! durable key/value store mapping match-id → completion status and
//! player-id → last-seen cycle, with atomic "claim or skip" semantics.
//!
//! Backed by `sled` (embedded, crash-safe), chosen for durability without an
//! external database service. Row encoding is `serde_json` over `sled`'s
//! byte trees, matching the JSON-first style the rest of this crate uses
//! for on-disk state.

use crate::errors::ErrorCategory;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Unseen,
    InProgress,
    Complete,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRow {
    pub status: MatchStatus,
    pub first_seen_cycle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_cycle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_category: Option<ErrorCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    SkipComplete,
    SkipInFlight,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct PlayerRow {
    last_seen_cycle: String,
}

/// The durable Registry. Thread-safe: `sled::Tree` is `Send + Sync` and its
/// compare-and-swap primitive gives us the linearizable `claim` spec §5
/// requires without an additional lock.
pub struct Registry {
    matches: sled::Tree,
    players: sled::Tree,
}

impl Registry {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| eyre!("failed to open registry at {}: {e}", path.display()))?;
        let matches = db.open_tree("matches").map_err(|e| eyre!("failed to open matches tree: {e}"))?;
        let players = db.open_tree("players").map_err(|e| eyre!("failed to open players tree: {e}"))?;
        Ok(Self { matches, players })
    }

    fn get_match_row(&self, match_id: &str) -> Result<Option<MatchRow>> {
        match self.matches.get(match_id).map_err(|e| eyre!("registry read failed: {e}"))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn status(&self, match_id: &str) -> Result<MatchStatus> {
        Ok(self.get_match_row(match_id)?.map(|r| r.status).unwrap_or(MatchStatus::Unseen))
    }

    /// Atomic claim-or-skip (spec §4.2 "Dedup semantics"): `COMPLETE` rows
    /// are skipped without a detail fetch; `INCOMPLETE`/`UNSEEN`/`FAILED`
    /// rows are claimed (scheduled for a detail fetch). Uses sled's
    /// compare-and-swap loop so concurrent callers never both claim the
    /// same match-id.
    pub fn claim(&self, match_id: &str, cycle_id: &str) -> Result<ClaimOutcome> {
        loop {
            let current = self.matches.get(match_id).map_err(|e| eyre!("registry read failed: {e}"))?;
            let current_row: Option<MatchRow> = match &current {
                Some(bytes) => Some(serde_json::from_slice(bytes)?),
                None => None,
            };

            let outcome = match &current_row {
                Some(row) if row.status == MatchStatus::Complete => ClaimOutcome::SkipComplete,
                Some(row) if row.status == MatchStatus::InProgress => ClaimOutcome::SkipInFlight,
                _ => ClaimOutcome::Claimed,
            };

            if outcome != ClaimOutcome::Claimed {
                return Ok(outcome);
            }

            let new_row = MatchRow {
                status: MatchStatus::InProgress,
                first_seen_cycle: current_row.map(|r| r.first_seen_cycle).unwrap_or_else(|| cycle_id.to_string()),
                completed_cycle: None,
                last_error_category: None,
            };
            let new_bytes = serde_json::to_vec(&new_row)?;

            let cas = self
                .matches
                .compare_and_swap(match_id, current, Some(new_bytes))
                .map_err(|e| eyre!("registry CAS failed: {e}"))?;

            if cas.is_ok() {
                return Ok(ClaimOutcome::Claimed);
            }
            // Lost the race to a concurrent claimant; retry with fresh state.
        }
    }

    /// Marks a match `COMPLETE` (spec §4.4 stage 3). Frozen thereafter
    /// (spec §3 "Immutable once COMPLETE").
    pub fn complete(&self, match_id: &str, cycle_id: &str) -> Result<()> {
        self.upsert(match_id, cycle_id, |row| {
            row.status = MatchStatus::Complete;
            row.completed_cycle = Some(cycle_id.to_string());
            row.last_error_category = None;
        })
    }

    /// Marks a match `INCOMPLETE` (participant count below the expected
    /// threshold, spec §4.4 stage 3).
    pub fn mark_incomplete(&self, match_id: &str, cycle_id: &str) -> Result<()> {
        self.upsert(match_id, cycle_id, |row| {
            row.status = MatchStatus::Incomplete;
        })
    }

    /// Marks a match `FAILED` under `category` (spec §7).
    pub fn fail(&self, match_id: &str, cycle_id: &str, category: ErrorCategory) -> Result<()> {
        self.upsert(match_id, cycle_id, |row| {
            row.status = MatchStatus::Failed;
            row.last_error_category = Some(category);
        })
    }

    fn upsert(&self, match_id: &str, cycle_id: &str, mutate: impl FnOnce(&mut MatchRow)) -> Result<()> {
        let existing = self.get_match_row(match_id)?;
        // Frozen once COMPLETE (spec §3).
        if matches!(existing, Some(ref row) if row.status == MatchStatus::Complete) {
            return Ok(());
        }
        let mut row = existing.unwrap_or_else(|| MatchRow {
            status: MatchStatus::Unseen,
            first_seen_cycle: cycle_id.to_string(),
            completed_cycle: None,
            last_error_category: None,
        });
        mutate(&mut row);
        let bytes = serde_json::to_vec(&row)?;
        self.matches.insert(match_id, bytes).map_err(|e| eyre!("registry write failed: {e}"))?;
        Ok(())
    }

    /// Records that `puuid` was seen during `cycle_id` (spec §2.2).
    pub fn seen_player(&self, puuid: &str, cycle_id: &str) -> Result<()> {
        let row = PlayerRow { last_seen_cycle: cycle_id.to_string() };
        let bytes = serde_json::to_vec(&row)?;
        self.players.insert(puuid, bytes).map_err(|e| eyre!("registry write failed: {e}"))?;
        Ok(())
    }

    pub fn last_seen_cycle(&self, puuid: &str) -> Result<Option<String>> {
        match self.players.get(puuid).map_err(|e| eyre!("registry read failed: {e}"))? {
            Some(bytes) => {
                let row: PlayerRow = serde_json::from_slice(&bytes)?;
                Ok(Some(row.last_seen_cycle))
            }
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.matches.flush().map_err(|e| eyre!("registry flush failed: {e}"))?;
        self.players.flush().map_err(|e| eyre!("registry flush failed: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_registry() -> (tempfile::TempDir, Registry) {
        let dir = tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry")).unwrap();
        (dir, registry)
    }

    #[test]
    fn unseen_match_can_be_claimed() {
        let (_dir, registry) = open_test_registry();
        assert_eq!(registry.status("NA1_1").unwrap(), MatchStatus::Unseen);
        assert_eq!(registry.claim("NA1_1", "20260101").unwrap(), ClaimOutcome::Claimed);
    }

    #[test]
    fn in_flight_match_is_skipped_by_a_second_claimant() {
        let (_dir, registry) = open_test_registry();
        assert_eq!(registry.claim("NA1_1", "20260101").unwrap(), ClaimOutcome::Claimed);
        assert_eq!(registry.claim("NA1_1", "20260101").unwrap(), ClaimOutcome::SkipInFlight);
    }

    #[test]
    fn complete_match_is_skipped_on_rediscovery() {
        let (_dir, registry) = open_test_registry();
        registry.claim("NA1_1", "20260101").unwrap();
        registry.complete("NA1_1", "20260101").unwrap();
        assert_eq!(registry.claim("NA1_1", "20260102").unwrap(), ClaimOutcome::SkipComplete);
        assert_eq!(registry.status("NA1_1").unwrap(), MatchStatus::Complete);
    }

    #[test]
    fn complete_rows_are_frozen() {
        let (_dir, registry) = open_test_registry();
        registry.claim("NA1_1", "20260101").unwrap();
        registry.complete("NA1_1", "20260101").unwrap();
        registry.fail("NA1_1", "20260102", ErrorCategory::Transport).unwrap();
        assert_eq!(registry.status("NA1_1").unwrap(), MatchStatus::Complete);
    }

    #[test]
    fn failed_match_can_be_reclaimed_next_cycle() {
        let (_dir, registry) = open_test_registry();
        registry.claim("NA1_1", "20260101").unwrap();
        registry.fail("NA1_1", "20260101", ErrorCategory::NotFound).unwrap();
        assert_eq!(registry.claim("NA1_1", "20260102").unwrap(), ClaimOutcome::Claimed);
    }

    #[test]
    fn seen_player_round_trips() {
        let (_dir, registry) = open_test_registry();
        assert!(registry.last_seen_cycle("puuid-1").unwrap().is_none());
        registry.seen_player("puuid-1", "20260101").unwrap();
        assert_eq!(registry.last_seen_cycle("puuid-1").unwrap().as_deref(), Some("20260101"));
    }
}
