//! End-to-end Pipeline Orchestrator run (spec §8 "orchestrator idempotence",
//! §4.5 DAG): collect → validate → transform → quality → {cross_cycle,
//! parquet, backup} → provenance, then a second `run_cycle` over the same
//! `cycleId` to confirm every stage is skipped (spec §4.5 "Stage contract").

mod support;

use std::sync::Arc;
use support::FixtureApi;
use tft_collector::config::Config;
use tft_collector::domain::{CollectionMethod, Division, IncompleteMatchPolicy, MatchInfo, Match, Participant, Player, SummonerMeta, Tier};
use tft_collector::http_client::RateLimitBudget;
use tft_collector::registry::Registry;
use tokio_util::sync::CancellationToken;

fn gold_player(puuid: &str) -> Player {
    Player { puuid: puuid.to_string(), tier: Tier::Gold, rank: Some(Division::II), league_points: 50, summoner: SummonerMeta::default() }
}

fn full_match(match_id: &str, game_datetime: i64) -> Match {
    let participants = (1..=8)
        .map(|i| Participant { puuid: format!("p{i}"), placement: i as u8, level: 9, units: vec![], traits: vec![], augments: vec![] })
        .collect();
    Match { match_id: match_id.to_string(), info: MatchInfo { game_datetime, game_length: 1800.0, game_version: "14.1".to_string(), participants, incomplete: false } }
}

/// Registers `p1`..`p8` as discovered league-entries players, so a full
/// eight-participant match satisfies the §3 "participant puuid must appear
/// in players" invariant.
fn with_full_lobby(mut api: FixtureApi) -> FixtureApi {
    for i in 1..=8 {
        api = api.with_league_entry(Tier::Gold, Some(Division::II), gold_player(&format!("p{i}")));
    }
    api
}

fn cycle_midpoint_ms(cycle_id: &str) -> i64 {
    let (start, end) = tft_collector::engine::daily_window_ms(cycle_id).unwrap();
    start + (end - start) / 2
}

fn config_for(data_root: &std::path::Path) -> Config {
    Config {
        data_root: data_root.to_path_buf(),
        config_path: None,
        region: "NA1".to_string(),
        base_url: "https://na1.api.riotgames.com".to_string(),
        riot_api_key: "test-key".to_string(),
        rate_limit_budget: RateLimitBudget::default(),
        tiers: vec![Tier::Gold],
        collection_mode: CollectionMethod::Daily,
        incomplete_match_policy: IncompleteMatchPolicy::Mark,
        max_concurrency: 4,
        data_version: "1.0.0".to_string(),
        quality_threshold: 0.5,
        auto_backup: true,
        backup_retention_days: 30,
    }
}

#[tokio::test]
async fn full_dag_produces_every_declared_output() {
    let dir = tempfile::tempdir().unwrap();
    let api: Arc<dyn tft_collector::riot_api::RiotApiClient> = Arc::new(
        with_full_lobby(FixtureApi::new())
            .with_match_ids("p1", vec!["NA1_1".to_string()])
            .with_match_detail(full_match("NA1_1", cycle_midpoint_ms("20260101"))),
    );
    let registry = Arc::new(Registry::open(&dir.path().join("registry")).unwrap());
    let config = config_for(dir.path());

    let exit_code = tft_collector::pipeline::run_cycle(&config, api.clone(), registry.clone(), "20260101", CancellationToken::new()).await.unwrap();
    assert_eq!(exit_code, 0);

    let paths = tft_collector::pipeline::CyclePaths::new(dir.path(), "20260101");
    assert!(paths.raw.exists());
    assert!(paths.validated.exists());
    assert!(paths.transformed.exists());
    assert!(paths.validation_report.exists());
    assert!(paths.quality_report.exists());
    assert!(paths.matches_parquet.exists());
    assert!(paths.participants_parquet.exists());
    assert!(paths.backup_archive.exists());
    assert!(paths.provenance.exists());

    let prov_raw = std::fs::read_to_string(&paths.provenance).unwrap();
    let prov: serde_json::Value = serde_json::from_str(&prov_raw).unwrap();
    assert!(!prov["entities"].as_array().unwrap().is_empty());
    assert!(!prov["relations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rerunning_the_same_cycle_skips_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let api: Arc<dyn tft_collector::riot_api::RiotApiClient> = Arc::new(
        with_full_lobby(FixtureApi::new())
            .with_match_ids("p1", vec!["NA1_1".to_string()])
            .with_match_detail(full_match("NA1_1", cycle_midpoint_ms("20260101"))),
    );
    let registry = Arc::new(Registry::open(&dir.path().join("registry")).unwrap());
    let config = config_for(dir.path());

    tft_collector::pipeline::run_cycle(&config, api.clone(), registry.clone(), "20260101", CancellationToken::new()).await.unwrap();
    let paths = tft_collector::pipeline::CyclePaths::new(dir.path(), "20260101");
    let raw_mtime_first = std::fs::metadata(&paths.raw).unwrap().modified().unwrap();
    let quality_mtime_first = std::fs::metadata(&paths.quality_report).unwrap().modified().unwrap();

    // Re-running must not re-collect (the Registry would reject a second
    // `claim` on an already-COMPLETE match) and every later stage should
    // see its outputs already newer than its inputs.
    let exit_code = tft_collector::pipeline::run_cycle(&config, api, registry, "20260101", CancellationToken::new()).await.unwrap();
    assert_eq!(exit_code, 0);
    let raw_mtime_second = std::fs::metadata(&paths.raw).unwrap().modified().unwrap();
    assert_eq!(raw_mtime_first, raw_mtime_second, "collect stage should have been skipped, not re-run");
    let quality_mtime_second = std::fs::metadata(&paths.quality_report).unwrap().modified().unwrap();
    assert_eq!(quality_mtime_first, quality_mtime_second, "quality stage should have been skipped, not re-run");
}
