//! Layered configuration (SPEC_FULL.md [AMBIENT] "Configuration layering",
//! spec §4.5 "Recognized configuration options"): CLI flags override a TOML
//! file which overrides built-in defaults, resolved once and eagerly
//! validated with a "warn and clamp" style for out-of-range values.

use crate::domain::{CollectionMethod, IncompleteMatchPolicy, Tier};
use crate::http_client::RateLimitBudget;
use eyre::{eyre, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// The subset of recognized options (§4.5) that may be set in a TOML config
/// file. Every field optional: only CLI-unset, file-set values are used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiSection>,
    pub collection: Option<CollectionSection>,
    pub quality: Option<QualitySection>,
    pub backup: Option<BackupSection>,
    pub data_root: Option<PathBuf>,
    pub data_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSection {
    pub region: Option<String>,
    pub rate_limit: Option<u32>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionSection {
    pub mode: Option<String>,
    pub tiers: Option<Vec<String>>,
    pub incomplete_match_policy: Option<String>,
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QualitySection {
    pub quality_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupSection {
    pub auto_backup: Option<bool>,
    pub retention_days: Option<u32>,
}

impl ConfigFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| eyre!("failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| eyre!("failed to parse config file {}: {e}", path.display()))
    }
}

/// The fully resolved configuration the orchestrator and Engine consume.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_root: PathBuf,
    /// The TOML config file this `Config` was resolved from, if any existed
    /// on disk (spec §4.6 "config" provenance entity).
    pub config_path: Option<PathBuf>,
    pub region: String,
    pub base_url: String,
    pub riot_api_key: String,
    pub rate_limit_budget: RateLimitBudget,
    pub tiers: Vec<Tier>,
    pub collection_mode: CollectionMethod,
    pub incomplete_match_policy: IncompleteMatchPolicy,
    pub max_concurrency: usize,
    pub data_version: String,
    pub quality_threshold: f64,
    pub auto_backup: bool,
    pub backup_retention_days: u32,
}

fn parse_tier(raw: &str) -> Option<Tier> {
    Tier::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(raw))
}

fn parse_collection_mode(raw: &str) -> Option<CollectionMethod> {
    match raw.to_ascii_lowercase().as_str() {
        "daily" => Some(CollectionMethod::Daily),
        "weekly" => Some(CollectionMethod::Weekly),
        "incremental" => Some(CollectionMethod::Incremental),
        _ => None,
    }
}

fn parse_incomplete_policy(raw: &str) -> Option<IncompleteMatchPolicy> {
    match raw.to_ascii_lowercase().as_str() {
        "identify" => Some(IncompleteMatchPolicy::Identify),
        "filter" => Some(IncompleteMatchPolicy::Filter),
        "mark" => Some(IncompleteMatchPolicy::Mark),
        _ => None,
    }
}

/// CLI overrides, resolved against a config file and defaults (spec §4.5).
/// All fields optional except those with no sensible default at all; the
/// clap-facing `Args` struct in `main.rs` maps onto these 1:1.
#[allow(clippy::too_many_arguments)]
pub fn resolve(
    config_file: ConfigFile,
    config_path: Option<PathBuf>,
    region_override: Option<String>,
    base_url_override: Option<String>,
    rate_limit_override: Option<u32>,
    mode_override: Option<String>,
    tiers_override: Option<Vec<String>>,
    incomplete_policy_override: Option<String>,
    max_concurrency_override: Option<usize>,
    data_root_override: Option<PathBuf>,
    data_version_override: Option<String>,
    quality_threshold_override: Option<f64>,
    auto_backup_override: Option<bool>,
    retention_days_override: Option<u32>,
) -> Result<Config> {
    let region = region_override
        .or_else(|| config_file.api.as_ref().and_then(|a| a.region.clone()))
        .ok_or_else(|| eyre!("no region configured. pass --region or set api.region in the config file"))?;

    let base_url = base_url_override
        .or_else(|| config_file.api.as_ref().and_then(|a| a.base_url.clone()))
        .unwrap_or_else(|| format!("https://{}.api.riotgames.com", region.to_lowercase()));

    let rate_limit = rate_limit_override.or_else(|| config_file.api.as_ref().and_then(|a| a.rate_limit)).unwrap_or(100);
    let rate_limit_budget = RateLimitBudget { long_window_requests: rate_limit, ..RateLimitBudget::default() };

    let mode_raw = mode_override
        .or_else(|| config_file.collection.as_ref().and_then(|c| c.mode.clone()))
        .unwrap_or_else(|| "daily".to_string());
    let collection_mode = parse_collection_mode(&mode_raw)
        .ok_or_else(|| eyre!("unrecognized collection.mode '{mode_raw}'; expected daily, weekly, or incremental"))?;

    let tiers_raw = tiers_override.or_else(|| config_file.collection.as_ref().and_then(|c| c.tiers.clone()));
    let tiers = match tiers_raw {
        Some(raw) if !raw.is_empty() => raw
            .iter()
            .map(|t| parse_tier(t).ok_or_else(|| eyre!("unrecognized tier '{t}' in collection.tiers")))
            .collect::<Result<Vec<_>>>()?,
        _ => Tier::ALL.to_vec(),
    };

    let policy_raw = incomplete_policy_override
        .or_else(|| config_file.collection.as_ref().and_then(|c| c.incomplete_match_policy.clone()))
        .unwrap_or_else(|| "mark".to_string());
    let incomplete_match_policy = parse_incomplete_policy(&policy_raw)
        .ok_or_else(|| eyre!("unrecognized collection.incomplete_match_policy '{policy_raw}'"))?;

    let max_concurrency = max_concurrency_override
        .or_else(|| config_file.collection.as_ref().and_then(|c| c.max_concurrency))
        .unwrap_or(8);
    if max_concurrency == 0 {
        return Err(eyre!("collection.max_concurrency must be > 0"));
    }

    let data_root = data_root_override.or(config_file.data_root).unwrap_or_else(|| PathBuf::from("."));
    let data_version = data_version_override.or(config_file.data_version).unwrap_or_else(|| "1.0.0".to_string());

    let mut quality_threshold = quality_threshold_override
        .or_else(|| config_file.quality.as_ref().and_then(|q| q.quality_threshold))
        .unwrap_or(0.8);
    if !(0.0..=1.0).contains(&quality_threshold) {
        tracing::warn!(quality_threshold, "quality.quality_threshold outside [0, 1]; clamping");
        quality_threshold = quality_threshold.clamp(0.0, 1.0);
    }

    let auto_backup = auto_backup_override.or_else(|| config_file.backup.as_ref().and_then(|b| b.auto_backup)).unwrap_or(true);
    let backup_retention_days =
        retention_days_override.or_else(|| config_file.backup.as_ref().and_then(|b| b.retention_days)).unwrap_or(30);

    let riot_api_key = load_riot_api_key()?;

    Ok(Config {
        data_root,
        config_path: config_path.filter(|p| p.exists()),
        region: region.to_uppercase(),
        base_url,
        riot_api_key,
        rate_limit_budget,
        tiers,
        collection_mode,
        incomplete_match_policy,
        max_concurrency,
        data_version,
        quality_threshold,
        auto_backup,
        backup_retention_days,
    })
}

/// Reads `RIOT_API_KEY` from the environment, falling back to a `.env` file
/// in the working directory (spec §6 "Environment inputs").
fn load_riot_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("RIOT_API_KEY") {
        return Ok(key);
    }
    dotenvy::dotenv().ok();
    std::env::var("RIOT_API_KEY")
        .map_err(|_| eyre!("RIOT_API_KEY is not set and no .env file provides it; the collect stage cannot authenticate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `resolve` reads `RIOT_API_KEY` from the process environment, which is
    // global state; serialize the tests that touch it so they don't race
    // under the default multi-threaded test runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn parses_known_tiers_case_insensitively() {
        assert_eq!(parse_tier("gold"), Some(Tier::Gold));
        assert_eq!(parse_tier("CHALLENGER"), Some(Tier::Challenger));
        assert_eq!(parse_tier("nonsense"), None);
    }

    #[test]
    fn resolve_requires_a_region() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RIOT_API_KEY", "test-key");
        let result = resolve(ConfigFile::default(), None, None, None, None, None, None, None, None, None, None, None, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_clamps_out_of_range_quality_threshold() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RIOT_API_KEY", "test-key");
        let config = resolve(
            ConfigFile::default(),
            None,
            Some("na1".to_string()),
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            Some(1.5),
            None,
            None,
        )
        .unwrap();
        assert_eq!(config.quality_threshold, 1.0);
        assert_eq!(config.region, "NA1");
    }
}
