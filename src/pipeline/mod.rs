//! Pipeline Orchestrator (spec §4.5): declares the DAG
//! `collect → validate → transform → quality → {cross_cycle, provenance,
//! parquet, backup}` with deterministic per-cycle paths, skips a stage when
//! all its declared outputs exist and are newer than all its inputs, and
//! fails the DAG if a stage errors or is missing a declared output after
//! running.
//!
//! Skip logic is plain `std::fs::metadata(..).modified()` comparison — no
//! workflow-engine crate, favoring explicit control flow over a framework
//! (SPEC_FULL.md §4.5 implementation detail).

pub mod stages;

use crate::config::Config;
use crate::engine::{self, CycleParams, Engine, EngineOutcome};
use crate::error_account::ErrorAccount;
use crate::registry::Registry;
use crate::riot_api::RiotApiClient;
use eyre::{eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    Ran,
    Skipped,
}

/// Per-cycle deterministic paths (spec §6).
pub struct CyclePaths {
    pub raw: PathBuf,
    pub checkpoint: PathBuf,
    pub validated: PathBuf,
    pub transformed: PathBuf,
    pub matches_parquet: PathBuf,
    pub participants_parquet: PathBuf,
    pub validation_report: PathBuf,
    pub quality_report: PathBuf,
    pub cross_cycle_report: PathBuf,
    pub provenance: PathBuf,
    pub backup_archive: PathBuf,
    pub backup_metadata: PathBuf,
    pub log_file: PathBuf,
}

impl CyclePaths {
    pub fn new(root: &Path, cycle_id: &str) -> Self {
        Self {
            raw: root.join("data/raw").join(format!("tft_collection_{cycle_id}.json")),
            checkpoint: root.join("data/raw").join(format!("tft_collection_{cycle_id}_checkpoint.json")),
            validated: root.join("data/validated").join(format!("tft_collection_{cycle_id}.json")),
            transformed: root.join("data/transformed").join(format!("tft_collection_{cycle_id}.jsonld")),
            matches_parquet: root.join("data/parquet").join(cycle_id).join("matches.parquet"),
            participants_parquet: root.join("data/parquet").join(cycle_id).join("participants.parquet"),
            validation_report: root.join("reports").join(format!("validation_{cycle_id}.json")),
            quality_report: root.join("reports").join(format!("quality_{cycle_id}.json")),
            cross_cycle_report: root.join("reports").join(format!("cross_cycle_{cycle_id}.json")),
            provenance: root.join("provenance").join(format!("workflow_{cycle_id}.prov.json")),
            backup_archive: root.join("backups").join(format!("backup_{cycle_id}.tar.gz")),
            backup_metadata: root.join("backups").join(format!("backup_{cycle_id}_metadata.json")),
            log_file: root.join("logs").join(format!("collection_{cycle_id}.log")),
        }
    }
}

/// A stage is skipped if every output exists and is newer than every input
/// (spec §4.5 "Stage contract").
fn should_skip(inputs: &[&Path], outputs: &[&Path]) -> bool {
    if outputs.iter().any(|p| !p.exists()) {
        return false;
    }
    let Some(oldest_output) = outputs.iter().filter_map(|p| std::fs::metadata(p).ok()?.modified().ok()).min() else {
        return false;
    };
    let newest_input = inputs.iter().filter_map(|p| std::fs::metadata(p).ok()?.modified().ok()).max();
    match newest_input {
        Some(newest_input) => oldest_output > newest_input,
        None => true,
    }
}

fn ensure_outputs_exist(stage: &str, outputs: &[&Path]) -> Result<()> {
    for output in outputs {
        if !output.exists() {
            return Err(eyre!("stage {stage} completed but declared output {} is missing", output.display()));
        }
    }
    Ok(())
}

/// Runs the full DAG for one `cycleId`. Returns the process exit code the
/// caller (`main`) should use (spec §6 exit codes).
///
/// `cancel` is owned by the caller (spec §5: external signal is one of three
/// independent cancellation sources) so a single Ctrl-C can cooperatively
/// cancel whichever cycle is currently running; the Collection Engine also
/// cancels it internally on authentication expiry.
pub async fn run_cycle(config: &Config, api: Arc<dyn RiotApiClient>, registry: Arc<Registry>, cycle_id: &str, cancel: CancellationToken) -> Result<i32> {
    let paths = CyclePaths::new(&config.data_root, cycle_id);
    let (window_start_ms, window_end_ms) = match config.collection_mode {
        crate::domain::CollectionMethod::Weekly => engine::weekly_window_ms(cycle_id)?,
        _ => engine::daily_window_ms(cycle_id)?,
    };

    // --- collect ---
    let collect_inputs: [&Path; 0] = [];
    if !should_skip(&collect_inputs, &[paths.raw.as_path()]) {
        let errors = Arc::new(ErrorAccount::new());
        let engine = Engine::new(api.clone(), registry.clone(), errors, cancel.clone());

        let params = CycleParams {
            cycle_id: cycle_id.to_string(),
            region: config.region.clone(),
            tiers: config.tiers.clone(),
            collection_method: config.collection_mode,
            window_start_ms,
            window_end_ms,
            incomplete_match_policy: config.incomplete_match_policy,
            max_concurrency: config.max_concurrency,
            data_version: config.data_version.clone(),
            checkpoint_dir: paths.raw.parent().unwrap_or(Path::new(".")).to_path_buf(),
            raw_output_dir: paths.raw.parent().unwrap_or(Path::new(".")).to_path_buf(),
        };

        match engine.run_cycle(&params).await? {
            EngineOutcome::Completed { .. } => {}
            EngineOutcome::Checkpointed { exit_code } => return Ok(exit_code),
        }
        ensure_outputs_exist("collect", &[paths.raw.as_path()])?;
    } else {
        tracing::info!(cycle_id, "collect stage skipped: raw artifact up to date");
    }

    // --- validate ---
    if !should_skip(&[paths.raw.as_path()], &[paths.validated.as_path(), paths.validation_report.as_path()]) {
        let report = stages::validate::run(cycle_id, &paths.raw, window_start_ms, window_end_ms, &paths.validated, &paths.validation_report)?;
        if !report.passed {
            return Err(eyre!("validate stage found {} invariant violation(s)", report.violations.len()));
        }
        ensure_outputs_exist("validate", &[paths.validated.as_path(), paths.validation_report.as_path()])?;
    } else {
        tracing::info!(cycle_id, "validate stage skipped");
    }

    // --- transform ---
    if !should_skip(&[paths.validated.as_path()], &[paths.transformed.as_path()]) {
        stages::transform::run(&paths.validated, &paths.transformed)?;
        ensure_outputs_exist("transform", &[paths.transformed.as_path()])?;
    } else {
        tracing::info!(cycle_id, "transform stage skipped");
    }

    // --- quality (gates cross_cycle/parquet/backup) ---
    let quality_report = if !should_skip(&[paths.validated.as_path()], &[paths.quality_report.as_path()]) {
        let report = stages::quality::run(
            &paths.validated,
            window_start_ms,
            window_end_ms,
            config.quality_threshold,
            &paths.quality_report,
        )?;
        ensure_outputs_exist("quality", &[paths.quality_report.as_path()])?;
        report
    } else {
        tracing::info!(cycle_id, "quality stage skipped");
        stages::quality::load(&paths.quality_report)?
    };

    if !quality_report.passed {
        tracing::warn!(cycle_id, score = quality_report.normalized_score, "quality gate failed; skipping downstream stages");
        return Ok(0);
    }

    // --- cross_cycle ---
    if let Some(raw_dir) = paths.raw.parent() {
        if !should_skip(&[paths.raw.as_path()], &[paths.cross_cycle_report.as_path()]) {
            stages::cross_cycle::run(raw_dir, cycle_id, &paths.raw, &paths.cross_cycle_report)?;
        }
    }

    // --- parquet ---
    if !should_skip(
        &[paths.validated.as_path()],
        &[paths.matches_parquet.as_path(), paths.participants_parquet.as_path()],
    ) {
        stages::parquet::run(&paths.validated, &paths.matches_parquet, &paths.participants_parquet)?;
        ensure_outputs_exist("parquet", &[paths.matches_parquet.as_path(), paths.participants_parquet.as_path()])?;
    }

    // --- backup ---
    if config.auto_backup && !should_skip(&[paths.validated.as_path(), paths.transformed.as_path()], &[paths.backup_archive.as_path()]) {
        let inputs = vec![paths.validated.clone(), paths.transformed.clone(), paths.validation_report.clone(), paths.quality_report.clone()];
        stages::backup::run(cycle_id, &inputs, &paths.backup_archive, config.backup_retention_days)?;
        let backup_dir = paths.backup_archive.parent().unwrap_or(Path::new("."));
        stages::backup::sweep_expired(backup_dir, config.backup_retention_days)?;
    }

    // --- provenance ---
    let mut stage_ios = vec![
        crate::provenance::StageIo { stage: "collect", inputs: vec![], outputs: vec![("raw".to_string(), paths.raw.clone())] },
        crate::provenance::StageIo {
            stage: "validate",
            inputs: vec![paths.raw.clone()],
            outputs: vec![("validated".to_string(), paths.validated.clone()), ("validation_report".to_string(), paths.validation_report.clone())],
        },
        crate::provenance::StageIo {
            stage: "transform",
            inputs: vec![paths.validated.clone()],
            outputs: vec![("transformed".to_string(), paths.transformed.clone())],
        },
        crate::provenance::StageIo {
            stage: "quality",
            inputs: vec![paths.validated.clone()],
            outputs: vec![("quality_report".to_string(), paths.quality_report.clone())],
        },
    ];
    if paths.backup_archive.exists() {
        stage_ios.push(crate::provenance::StageIo {
            stage: "backup",
            inputs: vec![paths.validated.clone(), paths.transformed.clone()],
            outputs: vec![("backup".to_string(), paths.backup_archive.clone())],
        });
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = hostname_best_effort();
    let error_categories = error_category_counts(&paths.raw)?;
    let mut doc = crate::provenance::assemble(cycle_id, &user, &host, &stage_ios, config.config_path.as_deref(), &error_categories)?;
    crate::provenance::write(&paths.provenance, &mut doc)?;

    Ok(0)
}

fn hostname_best_effort() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Reads the raw artifact's `error_summary.errors_by_category` counts for
/// the Provenance Assembler's per-category error entities (spec §4.6).
fn error_category_counts(raw_path: &Path) -> Result<std::collections::BTreeMap<String, u64>> {
    let raw = std::fs::read_to_string(raw_path).map_err(|e| eyre!("failed to read {} for provenance: {e}", raw_path.display()))?;
    let artifact: crate::domain::CollectionArtifact = serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse {} for provenance: {e}", raw_path.display()))?;
    Ok(artifact.error_summary.errors_by_category.iter().map(|(k, v)| (k.clone(), v.count)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn skip_is_false_when_output_missing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.json");
        std::fs::write(&input, "x").unwrap();
        let output = dir.path().join("out.json");
        assert!(!should_skip(&[&input], &[&output]));
    }

    #[test]
    fn skip_is_true_when_output_newer_than_input() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.json");
        std::fs::write(&input, "x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let output = dir.path().join("out.json");
        std::fs::File::create(&output).unwrap().write_all(b"y").unwrap();
        assert!(should_skip(&[&input], &[&output]));
    }

    #[test]
    fn skip_is_false_when_input_newer_than_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.json");
        std::fs::write(&output, "y").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let input = dir.path().join("in.json");
        std::fs::File::create(&input).unwrap().write_all(b"x").unwrap();
        assert!(!should_skip(&[&input], &[&output]));
    }
}
