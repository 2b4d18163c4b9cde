//! Error Accounting (spec §2.3, §3 "ErrorAccount"): an in-memory, thread-safe
//! tally of failures by category with bounded samples of affected
//! match/player ids. Concurrent worker outcomes fold into atomics for
//! counts and a `Mutex`-guarded map for the bounded sample lists.

use crate::domain::{CategoryErrorRecord, ErrorSummary};
use crate::errors::ErrorCategory;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Sampling bound K (spec §3, design default 100).
pub const SAMPLE_BOUND: usize = 100;

#[derive(Debug, Default)]
struct CategoryTally {
    count: AtomicU64,
    match_ids: Mutex<Vec<String>>,
    player_puuids: Mutex<Vec<String>>,
}

/// Shared across all Collection Engine workers via `Arc`.
#[derive(Debug, Default)]
pub struct ErrorAccount {
    total: AtomicU64,
    by_category: Mutex<BTreeMap<ErrorCategory, std::sync::Arc<CategoryTally>>>,
}

impl ErrorAccount {
    pub fn new() -> Self {
        Self::default()
    }

    async fn tally_for(&self, category: ErrorCategory) -> std::sync::Arc<CategoryTally> {
        let mut map = self.by_category.lock().await;
        map.entry(category).or_insert_with(|| std::sync::Arc::new(CategoryTally::default())).clone()
    }

    /// Records one failure under `category`, optionally sampling a
    /// match-id and/or player-puuid (bounded to `SAMPLE_BOUND` each).
    pub async fn record(&self, category: ErrorCategory, match_id: Option<&str>, player_puuid: Option<&str>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let tally = self.tally_for(category).await;
        tally.count.fetch_add(1, Ordering::Relaxed);

        if let Some(id) = match_id {
            let mut ids = tally.match_ids.lock().await;
            if ids.len() < SAMPLE_BOUND {
                ids.push(id.to_string());
            }
        }
        if let Some(puuid) = player_puuid {
            let mut puuids = tally.player_puuids.lock().await;
            if puuids.len() < SAMPLE_BOUND {
                puuids.push(puuid.to_string());
            }
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Snapshots the current tallies into the serializable `ErrorSummary`
    /// shape embedded in the CollectionArtifact (spec §3, §6 excerpt).
    pub async fn snapshot(&self) -> ErrorSummary {
        let map = self.by_category.lock().await;
        let mut errors_by_category = BTreeMap::new();
        for (category, tally) in map.iter() {
            let match_ids = tally.match_ids.lock().await.clone();
            let player_puuids = tally.player_puuids.lock().await.clone();
            errors_by_category.insert(
                category.to_string(),
                CategoryErrorRecord {
                    count: tally.count.load(Ordering::Relaxed),
                    match_ids,
                    player_puuids,
                },
            );
        }
        ErrorSummary { total_errors: self.total_errors(), errors_by_category }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_snapshots() {
        let acc = ErrorAccount::new();
        acc.record(ErrorCategory::NotFound, Some("NA1_1"), None).await;
        acc.record(ErrorCategory::NotFound, Some("NA1_2"), None).await;
        acc.record(ErrorCategory::Transport, None, Some("puuid-a")).await;

        assert_eq!(acc.total_errors(), 3);
        let snap = acc.snapshot().await;
        assert_eq!(snap.total_errors, 3);
        let not_found = &snap.errors_by_category["NOT_FOUND"];
        assert_eq!(not_found.count, 2);
        assert_eq!(not_found.match_ids, vec!["NA1_1", "NA1_2"]);
        let transport = &snap.errors_by_category["TRANSPORT"];
        assert_eq!(transport.player_puuids, vec!["puuid-a"]);
    }

    #[tokio::test]
    async fn sample_lists_are_bounded() {
        let acc = ErrorAccount::new();
        for i in 0..(SAMPLE_BOUND + 10) {
            acc.record(ErrorCategory::ServerError, Some(&format!("NA1_{i}")), None).await;
        }
        let snap = acc.snapshot().await;
        let rec = &snap.errors_by_category["SERVER_5xx"];
        assert_eq!(rec.count, (SAMPLE_BOUND + 10) as u64);
        assert_eq!(rec.match_ids.len(), SAMPLE_BOUND);
    }
}
