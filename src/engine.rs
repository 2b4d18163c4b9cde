//! Collection Engine (spec §4.4): the orchestrator core. Runs one cycle's
//! state machine — `DISCOVER_PLAYERS → FETCH_MATCH_HISTORIES →
//! FETCH_MATCH_DETAILS → EMIT` — against a region, checkpointing on the
//! triggers spec §4.3 names and resuming from a prior checkpoint when one
//! exists for the same `cycleId`.
//!
//! The detail-fetch fan-out uses
//! `futures::stream::for_each_concurrent` bounded by a worker count, with
//! `Arc`-shared accumulators drained once the stream completes. Cancellation
//! is cooperative via `tokio_util::sync::CancellationToken`, checked at each
//! loop head, matching spec §5's grace-window requirement.

use crate::artifact;
use crate::checkpoint::{self, Checkpoint, CHECKPOINT_EVERY_N_MATCHES};
use crate::domain::{
    ranked_matrix, CollectionArtifact, CollectionInfo, CollectionMethod, IncompleteMatchPolicy, Match, Player, Tier,
};
use crate::error_account::ErrorAccount;
use crate::errors::{ErrorCategory, EXIT_RESUMABLE};
use crate::registry::{ClaimOutcome, Registry};
use crate::riot_api::RiotApiClient;
use eyre::{eyre, Result};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Parameters resolved from `Config` that the Engine needs for one cycle
/// (spec §4.4, §4.5 "Recognized configuration options").
#[derive(Debug, Clone)]
pub struct CycleParams {
    pub cycle_id: String,
    pub region: String,
    pub tiers: Vec<Tier>,
    pub collection_method: CollectionMethod,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub incomplete_match_policy: IncompleteMatchPolicy,
    pub max_concurrency: usize,
    pub data_version: String,
    pub checkpoint_dir: PathBuf,
    pub raw_output_dir: PathBuf,
}

/// Outcome of running one cycle (spec §6 exit codes).
pub enum EngineOutcome {
    /// EMIT succeeded; the artifact was written to `path`.
    Completed { path: PathBuf },
    /// A checkpoint was written and the cycle must be resumed later
    /// (`AUTH_EXPIRED` or cancellation, spec §4.4 "Failure handling").
    Checkpointed { exit_code: i32 },
}

/// Cursor/player-set context fixed by the time stage 3 starts (stages 1 and
/// 2 are already done), cloned cheaply into each fan-out task so a periodic
/// checkpoint can be assembled without touching the sequential `checkpoint`
/// local.
struct CheckpointBase {
    cycle_id: String,
    checkpoint_dir: PathBuf,
    cursor_tier_division: Option<usize>,
    cursor_tier_division_label: Option<String>,
    processed_player_set: BTreeSet<String>,
}

/// Persists a `Checkpoint` reflecting in-flight `FETCH_MATCH_DETAILS`
/// progress (spec §4.3 "every N completed matches" trigger).
async fn save_periodic_checkpoint(
    base: &CheckpointBase,
    remaining: &[String],
    processed_ids: &Mutex<BTreeSet<String>>,
    errors: &ErrorAccount,
    count: usize,
) {
    let processed_snapshot = processed_ids.lock().await.clone();
    let pending: VecDeque<String> = remaining.iter().filter(|id| !processed_snapshot.contains(*id)).cloned().collect();
    let error_summary = errors.snapshot().await;

    let mut periodic = checkpoint::snapshot(&base.cycle_id, None, base.processed_player_set.clone(), pending, count, error_summary);
    periodic.cursor_tier_division = base.cursor_tier_division;
    periodic.cursor_tier_division_label = base.cursor_tier_division_label.clone();

    match checkpoint::save(&base.checkpoint_dir, &periodic) {
        Ok(()) => tracing::info!(count, "periodic checkpoint saved"),
        Err(e) => tracing::warn!(error = %e, count, "periodic checkpoint save failed"),
    }
}

pub struct Engine {
    api: Arc<dyn RiotApiClient>,
    registry: Arc<Registry>,
    errors: Arc<ErrorAccount>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(api: Arc<dyn RiotApiClient>, registry: Arc<Registry>, errors: Arc<ErrorAccount>, cancel: CancellationToken) -> Self {
        Self { api, registry, errors, cancel }
    }

    /// Runs one full cycle, resuming from an existing checkpoint if present.
    pub async fn run_cycle(&self, params: &CycleParams) -> Result<EngineOutcome> {
        let mut checkpoint = checkpoint::load(&params.checkpoint_dir, &params.cycle_id)?
            .unwrap_or_else(|| Checkpoint::new(&params.cycle_id));

        let matrix = ranked_matrix(&params.tiers);
        let start_index = checkpoint.cursor_tier_division.unwrap_or(0);

        // Stage 1: DISCOVER_PLAYERS, resumable from the checkpoint cursor.
        let mut players: BTreeMap<String, Player> = BTreeMap::new();
        for (index, td) in matrix.iter().enumerate().skip(start_index) {
            if self.cancel.is_cancelled() {
                checkpoint.set_cursor(index, *td);
                checkpoint::save(&params.checkpoint_dir, &checkpoint)?;
                return Ok(EngineOutcome::Checkpointed { exit_code: EXIT_RESUMABLE });
            }

            match self.api.league_entries(td.tier, td.division).await {
                Ok(entries) => {
                    for player in entries {
                        if !checkpoint.processed_player_set.contains(&player.puuid) {
                            players.insert(player.puuid.clone(), player);
                        }
                    }
                }
                Err((ErrorCategory::AuthExpired, detail)) => {
                    tracing::warn!(bucket = %td, detail, "auth expired during player discovery");
                    checkpoint.set_cursor(index, *td);
                    checkpoint::save(&params.checkpoint_dir, &checkpoint)?;
                    return Ok(EngineOutcome::Checkpointed { exit_code: EXIT_RESUMABLE });
                }
                Err((category, detail)) => {
                    self.errors.record(category, None, None).await;
                    tracing::warn!(bucket = %td, %category, detail, "league entries fetch failed; skipping bucket");
                }
            }

            checkpoint.set_cursor(index + 1, *td);
        }

        // Stage 2: FETCH_MATCH_HISTORIES. Claim every discovered match-id
        // through the Registry; COMPLETE rows are skipped (spec §4.2 dedup).
        let mut claimed_match_ids: Vec<String> = checkpoint.pending_match_queue.iter().cloned().collect();

        for (puuid, _player) in &players {
            if self.cancel.is_cancelled() {
                return self.checkpoint_and_exit(params, &mut checkpoint, &claimed_match_ids).await;
            }

            match self.api.match_ids_by_puuid(puuid, params.window_start_ms, params.window_end_ms).await {
                Ok(match_ids) => {
                    for match_id in match_ids {
                        match self.registry.claim(&match_id, &params.cycle_id)? {
                            ClaimOutcome::Claimed => claimed_match_ids.push(match_id),
                            ClaimOutcome::SkipComplete | ClaimOutcome::SkipInFlight => {}
                        }
                    }
                    self.registry.seen_player(puuid, &params.cycle_id)?;
                    checkpoint.processed_player_set.insert(puuid.clone());
                }
                Err((ErrorCategory::AuthExpired, detail)) => {
                    tracing::warn!(puuid, detail, "auth expired during match history fetch");
                    return self.checkpoint_and_exit(params, &mut checkpoint, &claimed_match_ids).await;
                }
                Err((category, detail)) => {
                    self.errors.record(category, None, Some(puuid)).await;
                    tracing::warn!(puuid, %category, detail, "match history fetch failed; skipping player");
                }
            }
        }

        claimed_match_ids.sort();
        claimed_match_ids.dedup();
        checkpoint.pending_match_queue = claimed_match_ids.iter().cloned().collect();

        // Stage 3: FETCH_MATCH_DETAILS, bounded-concurrency fan-out.
        let matches: Arc<Mutex<BTreeMap<String, Match>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let matches_collected = Arc::new(AtomicUsize::new(checkpoint.matches_collected));
        let auth_expired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        // Every match-id the registry has already resolved this cycle (inserted
        // into the artifact or excluded by the time window) so a checkpoint
        // taken mid-fan-out doesn't re-queue a match that's already settled.
        let processed_ids: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));

        let remaining: Vec<String> = checkpoint.pending_match_queue.iter().cloned().collect();
        let checkpoint_base = Arc::new(CheckpointBase {
            cycle_id: params.cycle_id.clone(),
            checkpoint_dir: params.checkpoint_dir.clone(),
            cursor_tier_division: checkpoint.cursor_tier_division,
            cursor_tier_division_label: checkpoint.cursor_tier_division_label.clone(),
            processed_player_set: checkpoint.processed_player_set.clone(),
        });
        let remaining_for_checkpoint = Arc::new(remaining.clone());

        stream::iter(remaining.clone())
            .for_each_concurrent(params.max_concurrency, |match_id| {
                let api = self.api.clone();
                let registry = self.registry.clone();
                let errors = self.errors.clone();
                let matches = matches.clone();
                let matches_collected = matches_collected.clone();
                let processed_ids = processed_ids.clone();
                let auth_expired = auth_expired.clone();
                let cancel = self.cancel.clone();
                let cycle_id = params.cycle_id.clone();
                let policy = params.incomplete_match_policy;
                let window_start_ms = params.window_start_ms;
                let window_end_ms = params.window_end_ms;
                let checkpoint_base = checkpoint_base.clone();
                let remaining_for_checkpoint = remaining_for_checkpoint.clone();

                async move {
                    if cancel.is_cancelled() || auth_expired.load(Ordering::Relaxed) {
                        return;
                    }

                    match api.match_detail(&match_id).await {
                        Ok(mut m) => {
                            if m.info.participants.len() < crate::domain::EXPECTED_PARTICIPANTS {
                                match policy {
                                    IncompleteMatchPolicy::Filter => {
                                        let _ = registry.mark_incomplete(&match_id, &cycle_id);
                                        processed_ids.lock().await.insert(match_id.clone());
                                        return;
                                    }
                                    IncompleteMatchPolicy::Mark => m.info.incomplete = true,
                                    IncompleteMatchPolicy::Identify => {}
                                }
                                let _ = registry.mark_incomplete(&match_id, &cycle_id);
                            } else {
                                let _ = registry.complete(&match_id, &cycle_id);
                            }

                            // Time-window policy (spec §4.4): a match outside the cycle's
                            // window is excluded from the artifact even though its
                            // match-id already updated the Registry above.
                            if m.info.game_datetime < window_start_ms || m.info.game_datetime >= window_end_ms {
                                tracing::debug!(match_id, game_datetime = m.info.game_datetime, "match outside cycle window; excluded from artifact");
                                processed_ids.lock().await.insert(match_id.clone());
                                let count = matches_collected.fetch_add(1, Ordering::Relaxed) + 1;
                                if count % CHECKPOINT_EVERY_N_MATCHES == 0 {
                                    save_periodic_checkpoint(&checkpoint_base, &remaining_for_checkpoint, &processed_ids, &errors, count).await;
                                }
                                return;
                            }

                            matches.lock().await.insert(match_id.clone(), m);
                            processed_ids.lock().await.insert(match_id.clone());
                            let count = matches_collected.fetch_add(1, Ordering::Relaxed) + 1;
                            if count % CHECKPOINT_EVERY_N_MATCHES == 0 {
                                save_periodic_checkpoint(&checkpoint_base, &remaining_for_checkpoint, &processed_ids, &errors, count).await;
                            }
                        }
                        Err((ErrorCategory::AuthExpired, detail)) => {
                            tracing::warn!(match_id, detail, "auth expired during detail fetch");
                            auth_expired.store(true, Ordering::Relaxed);
                            cancel.cancel();
                        }
                        Err((category, detail)) => {
                            let _ = registry.fail(&match_id, &cycle_id, category);
                            errors.record(category, Some(&match_id), None).await;
                            tracing::warn!(match_id, %category, detail, "match detail fetch failed");
                        }
                    }
                }
            })
            .await;

        checkpoint.matches_collected = matches_collected.load(Ordering::Relaxed);
        let processed: BTreeSet<String> = processed_ids.lock().await.clone();
        checkpoint.pending_match_queue = remaining.into_iter().filter(|id| !processed.contains(id)).collect();

        if auth_expired.load(Ordering::Relaxed) || self.cancel.is_cancelled() {
            checkpoint::save(&params.checkpoint_dir, &checkpoint)?;
            return Ok(EngineOutcome::Checkpointed { exit_code: EXIT_RESUMABLE });
        }

        // Stage 4: EMIT.
        let error_summary = self.errors.snapshot().await;
        let artifact = CollectionArtifact {
            context: crate::domain::default_context(),
            type_: "TFTDataCollection".to_string(),
            collection_info: CollectionInfo {
                timestamp: now_iso8601(),
                extraction_location: params.region.to_uppercase(),
                data_version: params.data_version.clone(),
                collection_method: params.collection_method,
                incomplete_match_policy: params.incomplete_match_policy,
            },
            players,
            matches: Arc::try_unwrap(matches).map(|m| m.into_inner()).unwrap_or_default(),
            leaderboards: None,
            error_summary,
        };

        artifact::ensure_emittable(&artifact, params.window_start_ms, params.window_end_ms)
            .map_err(|e| eyre!("{e}"))?;

        let path = write_artifact(&params.raw_output_dir, &params.cycle_id, &artifact)?;
        checkpoint::clear(&params.checkpoint_dir, &params.cycle_id)?;
        self.registry.flush()?;

        Ok(EngineOutcome::Completed { path })
    }

    async fn checkpoint_and_exit(
        &self,
        params: &CycleParams,
        checkpoint: &mut Checkpoint,
        claimed_match_ids: &[String],
    ) -> Result<EngineOutcome> {
        checkpoint.pending_match_queue = claimed_match_ids.iter().cloned().collect();
        checkpoint::save(&params.checkpoint_dir, checkpoint)?;
        Ok(EngineOutcome::Checkpointed { exit_code: EXIT_RESUMABLE })
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn write_artifact(dir: &Path, cycle_id: &str, artifact: &CollectionArtifact) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| eyre!("failed to create raw output directory {}: {e}", dir.display()))?;
    let path = dir.join(format!("tft_collection_{cycle_id}.json"));
    let json = serde_json::to_string_pretty(artifact).map_err(|e| eyre!("failed to serialize artifact: {e}"))?;
    std::fs::write(&path, json).map_err(|e| eyre!("failed to write artifact {}: {e}", path.display()))?;
    Ok(path)
}

/// Daily window `[00:00Z, 24:00Z)` for `cycle_id` (`YYYYMMDD`), spec §4.4.
pub fn daily_window_ms(cycle_id: &str) -> Result<(i64, i64)> {
    let date = chrono::NaiveDate::parse_from_str(cycle_id, "%Y%m%d")
        .map_err(|e| eyre!("cycleId {cycle_id} is not a YYYYMMDD date: {e}"))?;
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
    let end = start + 24 * 60 * 60 * 1000;
    Ok((start, end))
}

/// Weekly window: the seven UTC days ending at `cycle_id`'s date, inclusive
/// of the full last day (spec §4.4).
pub fn weekly_window_ms(cycle_id: &str) -> Result<(i64, i64)> {
    let (_, end) = daily_window_ms(cycle_id)?;
    let start = end - 7 * 24 * 60 * 60 * 1000;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_window_is_24_hours() {
        let (start, end) = daily_window_ms("20260101").unwrap();
        assert_eq!(end - start, 24 * 60 * 60 * 1000);
    }

    #[test]
    fn weekly_window_is_seven_days_ending_at_cycle() {
        let (start, end) = weekly_window_ms("20260107").unwrap();
        assert_eq!(end - start, 7 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn rejects_malformed_cycle_id() {
        assert!(daily_window_ms("not-a-date").is_err());
    }
}
