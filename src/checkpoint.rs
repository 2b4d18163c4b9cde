//! Checkpoint Store (spec §2.4, §3 "Checkpoint", §4.3): a periodic snapshot
//! of collector progress so an interrupted run resumes exactly where it left
//! off. Atomic save: serialize, write to a `.tmp` sibling, then rename over
//! the destination.

use crate::domain::{ErrorSummary, TierDivision};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

/// Checkpoint triggers (spec §4.3): every N completed matches, on
/// `ErrAuthExpired`, and on a termination signal.
pub const CHECKPOINT_EVERY_N_MATCHES: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub cycle_id: String,
    /// Index into the deterministic ranked-matrix ordering
    /// (`domain::ranked_matrix`); `None` means DISCOVER_PLAYERS hasn't
    /// started (or has finished) for this cycle.
    pub cursor_tier_division: Option<usize>,
    /// Cached string form of the cursor, purely for human-readable
    /// checkpoint files; not authoritative (the index is).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_tier_division_label: Option<String>,
    pub processed_player_set: BTreeSet<String>,
    pub pending_match_queue: VecDeque<String>,
    pub matches_collected: usize,
    pub error_summary: ErrorSummary,
}

impl Checkpoint {
    pub fn new(cycle_id: impl Into<String>) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            cursor_tier_division: None,
            cursor_tier_division_label: None,
            processed_player_set: BTreeSet::new(),
            pending_match_queue: VecDeque::new(),
            matches_collected: 0,
            error_summary: ErrorSummary::default(),
        }
    }

    pub fn set_cursor(&mut self, index: usize, td: TierDivision) {
        self.cursor_tier_division = Some(index);
        self.cursor_tier_division_label = Some(td.to_string());
    }
}

fn checkpoint_path(base_dir: &Path, cycle_id: &str) -> PathBuf {
    base_dir.join(format!("tft_collection_{cycle_id}_checkpoint.json"))
}

/// Atomic save: write-to-temp then rename (spec §4.3).
pub fn save(base_dir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    fs::create_dir_all(base_dir).map_err(|e| eyre!("failed to create checkpoint directory {}: {e}", base_dir.display()))?;

    let path = checkpoint_path(base_dir, &checkpoint.cycle_id);
    let json = serde_json::to_string_pretty(checkpoint).map_err(|e| eyre!("failed to serialize checkpoint: {e}"))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|e| eyre!("failed to write temp checkpoint file {}: {e}", tmp_path.display()))?;

    if let Err(err) = fs::rename(&tmp_path, &path) {
        if cfg!(windows) {
            let _ = fs::remove_file(&path);
            fs::rename(&tmp_path, &path).map_err(|e| eyre!("failed to replace checkpoint file {}: {e}", path.display()))?;
        } else {
            return Err(eyre!("failed to replace checkpoint file {}: {err}", path.display()));
        }
    }

    Ok(())
}

/// Loads the checkpoint for `cycle_id` if one exists.
pub fn load(base_dir: &Path, cycle_id: &str) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(base_dir, cycle_id);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|e| eyre!("failed to read checkpoint file {}: {e}", path.display()))?;
    let checkpoint: Checkpoint =
        serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse checkpoint file {}: {e}", path.display()))?;
    Ok(Some(checkpoint))
}

/// Deletes the checkpoint on successful cycle completion (spec §4.3).
pub fn clear(base_dir: &Path, cycle_id: &str) -> Result<()> {
    let path = checkpoint_path(base_dir, cycle_id);
    if path.exists() {
        fs::remove_file(&path).map_err(|e| eyre!("failed to remove checkpoint file {}: {e}", path.display()))?;
    }
    Ok(())
}

/// Builds a `Checkpoint` snapshot from engine-side live state, ready to be
/// persisted. Kept separate from `ErrorAccount` itself so checkpoint
/// construction stays synchronous at the call site; the caller awaits
/// `ErrorAccount::snapshot()` once and passes the result in.
pub fn snapshot(
    cycle_id: &str,
    cursor: Option<(usize, TierDivision)>,
    processed_player_set: BTreeSet<String>,
    pending_match_queue: VecDeque<String>,
    matches_collected: usize,
    error_summary: ErrorSummary,
) -> Checkpoint {
    let mut checkpoint = Checkpoint::new(cycle_id);
    if let Some((index, td)) = cursor {
        checkpoint.set_cursor(index, td);
    }
    checkpoint.processed_player_set = processed_player_set;
    checkpoint.pending_match_queue = pending_match_queue;
    checkpoint.matches_collected = matches_collected;
    checkpoint.error_summary = error_summary;
    checkpoint
}
