//! Backup collaborator stage: tars and gzips a cycle's validated/transformed
//! outputs and reports into a single archive, with a checksum sidecar and a
//! retention sweep. Intentionally the full extent of "backup" per the
//! "archive bundling" non-goal — no incremental archival, no remote upload.

use eyre::{eyre, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct BackupMetadata {
    pub cycle_id: String,
    pub byte_size: u64,
    pub sha256: String,
    pub retention_days: u32,
}

/// Archives `inputs` (each a path relative to nothing in particular — the
/// archive entry name is the file's own name) into `archive_path`, then
/// writes a `_metadata.json` sidecar next to it.
pub fn run(cycle_id: &str, inputs: &[PathBuf], archive_path: &Path, retention_days: u32) -> Result<BackupMetadata> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(archive_path).map_err(|e| eyre!("failed to create archive {}: {e}", archive_path.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for input in inputs {
        if !input.exists() {
            continue;
        }
        let name = input.file_name().ok_or_else(|| eyre!("backup input {} has no file name", input.display()))?;
        builder
            .append_path_with_name(input, name)
            .map_err(|e| eyre!("failed to append {} to archive: {e}", input.display()))?;
    }
    builder.into_inner().map_err(|e| eyre!("failed to finish archive: {e}"))?.finish().map_err(|e| eyre!("failed to flush gzip stream: {e}"))?;

    let bytes = std::fs::read(archive_path).map_err(|e| eyre!("failed to read back archive {}: {e}", archive_path.display()))?;
    let metadata = BackupMetadata {
        cycle_id: cycle_id.to_string(),
        byte_size: bytes.len() as u64,
        sha256: crate::artifact::hash_file_bytes(&bytes),
        retention_days,
    };

    let sidecar_path = sidecar_path(archive_path);
    std::fs::write(&sidecar_path, serde_json::to_string_pretty(&metadata)?)
        .map_err(|e| eyre!("failed to write backup metadata {}: {e}", sidecar_path.display()))?;

    Ok(metadata)
}

fn sidecar_path(archive_path: &Path) -> PathBuf {
    let stem = archive_path.file_stem().and_then(|s| s.to_str()).unwrap_or("backup");
    let stem = stem.strip_suffix(".tar").unwrap_or(stem);
    archive_path.with_file_name(format!("{stem}_metadata.json"))
}

/// Deletes archives in `backup_dir` older than `retention_days`
/// (spec §4.5 `backup.retention_days`).
pub fn sweep_expired(backup_dir: &Path, retention_days: u32) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let Ok(entries) = std::fs::read_dir(backup_dir) else {
        return Ok(removed);
    };
    let cutoff = Duration::from_secs(retention_days as u64 * 24 * 60 * 60);

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("gz") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if modified.elapsed().unwrap_or_default() > cutoff {
            std::fs::remove_file(&path).map_err(|e| eyre!("failed to remove expired backup {}: {e}", path.display()))?;
            let sidecar = sidecar_path(&path);
            let _ = std::fs::remove_file(sidecar);
            removed.push(path);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archives_inputs_and_writes_sidecar() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("validated.json");
        std::fs::write(&input, "{}").unwrap();

        let archive_path = dir.path().join("backup_20260101.tar.gz");
        let metadata = run("20260101", &[input], &archive_path, 30).unwrap();

        assert!(archive_path.exists());
        assert!(sidecar_path(&archive_path).exists());
        assert_eq!(metadata.sha256.len(), 64);
    }

    #[test]
    fn sweep_on_empty_dir_is_a_noop() {
        let dir = tempdir().unwrap();
        let removed = sweep_expired(dir.path(), 30).unwrap();
        assert!(removed.is_empty());
    }
}
