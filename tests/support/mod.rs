//! Shared fixture `RiotApiClient` for integration tests (spec §9's seam):
//! a fully in-memory stand-in for the upstream API so the Collection
//! Engine and Pipeline Orchestrator can be exercised end to end without a
//! network call.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tft_collector::domain::{Division, Match, Player, Tier};
use tft_collector::errors::ErrorCategory;
use tft_collector::riot_api::RiotApiClient;

#[derive(Default)]
pub struct FixtureApi {
    league_entries: Mutex<BTreeMap<(Tier, Option<Division>), Vec<Player>>>,
    match_ids: Mutex<BTreeMap<String, Vec<String>>>,
    match_details: Mutex<BTreeMap<String, Match>>,
    /// When set, the Nth call (1-indexed) to `match_detail` returns
    /// `AUTH_EXPIRED` instead of the fixture row.
    auth_expires_on_detail_call: Option<usize>,
    detail_calls: AtomicUsize,
}

impl FixtureApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_league_entry(self, tier: Tier, division: Option<Division>, player: Player) -> Self {
        self.league_entries.lock().unwrap().entry((tier, division)).or_default().push(player);
        self
    }

    pub fn with_match_ids(self, puuid: &str, match_ids: Vec<String>) -> Self {
        self.match_ids.lock().unwrap().insert(puuid.to_string(), match_ids);
        self
    }

    pub fn with_match_detail(self, m: Match) -> Self {
        self.match_details.lock().unwrap().insert(m.match_id.clone(), m);
        self
    }

    pub fn with_auth_expiry_on_detail_call(mut self, call: usize) -> Self {
        self.auth_expires_on_detail_call = Some(call);
        self
    }

    pub fn detail_call_count(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiotApiClient for FixtureApi {
    async fn league_entries(&self, tier: Tier, division: Option<Division>) -> Result<Vec<Player>, (ErrorCategory, String)> {
        Ok(self.league_entries.lock().unwrap().get(&(tier, division)).cloned().unwrap_or_default())
    }

    async fn match_ids_by_puuid(&self, puuid: &str, _window_start_ms: i64, _window_end_ms: i64) -> Result<Vec<String>, (ErrorCategory, String)> {
        Ok(self.match_ids.lock().unwrap().get(puuid).cloned().unwrap_or_default())
    }

    async fn match_detail(&self, match_id: &str) -> Result<Match, (ErrorCategory, String)> {
        let call = self.detail_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.auth_expires_on_detail_call == Some(call) {
            return Err((ErrorCategory::AuthExpired, "fixture-triggered auth expiry".to_string()));
        }
        self.match_details
            .lock()
            .unwrap()
            .get(match_id)
            .cloned()
            .ok_or_else(|| (ErrorCategory::NotFound, format!("no fixture match detail for {match_id}")))
    }
}
