//! Parquet collaborator stage: flattens `matches` and `participants` into
//! two Arrow `RecordBatch`es and writes them as Parquet files, for
//! downstream analytics tooling outside this repository's scope.

use crate::domain::CollectionArtifact;
use arrow::array::{BooleanArray, Float64Array, Int64Array, StringArray, UInt8Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use eyre::{eyre, Result};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

fn matches_batch(artifact: &CollectionArtifact) -> Result<RecordBatch> {
    let mut match_ids = Vec::new();
    let mut game_datetimes = Vec::new();
    let mut game_lengths = Vec::new();
    let mut game_versions = Vec::new();
    let mut incomplete = Vec::new();

    for (match_id, m) in &artifact.matches {
        match_ids.push(match_id.clone());
        game_datetimes.push(m.info.game_datetime);
        game_lengths.push(m.info.game_length);
        game_versions.push(m.info.game_version.clone());
        incomplete.push(m.info.incomplete);
    }

    let schema = Schema::new(vec![
        Field::new("match_id", DataType::Utf8, false),
        Field::new("game_datetime", DataType::Int64, false),
        Field::new("game_length", DataType::Float64, false),
        Field::new("game_version", DataType::Utf8, false),
        Field::new("incomplete", DataType::Boolean, false),
    ]);

    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(StringArray::from(match_ids)),
            Arc::new(Int64Array::from(game_datetimes)),
            Arc::new(Float64Array::from(game_lengths)),
            Arc::new(StringArray::from(game_versions)),
            Arc::new(BooleanArray::from(incomplete)),
        ],
    )
    .map_err(|e| eyre!("failed to build matches record batch: {e}"))
}

fn participants_batch(artifact: &CollectionArtifact) -> Result<RecordBatch> {
    let mut match_ids = Vec::new();
    let mut puuids = Vec::new();
    let mut placements = Vec::new();
    let mut levels = Vec::new();

    for (match_id, m) in &artifact.matches {
        for p in &m.info.participants {
            match_ids.push(match_id.clone());
            puuids.push(p.puuid.clone());
            placements.push(p.placement);
            levels.push(p.level);
        }
    }

    let schema = Schema::new(vec![
        Field::new("match_id", DataType::Utf8, false),
        Field::new("puuid", DataType::Utf8, false),
        Field::new("placement", DataType::UInt8, false),
        Field::new("level", DataType::UInt8, false),
    ]);

    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(StringArray::from(match_ids)),
            Arc::new(StringArray::from(puuids)),
            Arc::new(UInt8Array::from(placements)),
            Arc::new(UInt8Array::from(levels)),
        ],
    )
    .map_err(|e| eyre!("failed to build participants record batch: {e}"))
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).map_err(|e| eyre!("failed to create {}: {e}", path.display()))?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| eyre!("failed to build parquet writer for {}: {e}", path.display()))?;
    writer.write(batch).map_err(|e| eyre!("failed to write parquet batch to {}: {e}", path.display()))?;
    writer.close().map_err(|e| eyre!("failed to close parquet writer for {}: {e}", path.display()))?;
    Ok(())
}

pub fn run(validated_path: &Path, matches_out: &Path, participants_out: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(validated_path)
        .map_err(|e| eyre!("failed to read validated artifact {}: {e}", validated_path.display()))?;
    let artifact: CollectionArtifact = serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse validated artifact: {e}"))?;

    write_batch(matches_out, &matches_batch(&artifact)?)?;
    write_batch(participants_out, &participants_batch(&artifact)?)?;
    Ok(())
}
