//! Transformer collaborator stage: wraps the validated artifact in an
//! explicit JSON-LD envelope (the `@context`/`@type` fields the core
//! artifact already carries are hoisted to the top and the payload nested
//! under `@graph`, the conventional JSON-LD multi-node shape).

use eyre::{eyre, Result};
use std::path::Path;

pub fn run(validated_path: &Path, transformed_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(validated_path)
        .map_err(|e| eyre!("failed to read validated artifact {}: {e}", validated_path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| eyre!("failed to parse validated artifact: {e}"))?;

    let context = value.get("@context").cloned().unwrap_or_else(|| serde_json::json!({}));
    let envelope = serde_json::json!({
        "@context": context,
        "@graph": [value],
    });

    if let Some(parent) = transformed_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(transformed_path, serde_json::to_string_pretty(&envelope)?)
        .map_err(|e| eyre!("failed to write transformed artifact {}: {e}", transformed_path.display()))?;
    Ok(())
}
