//! Domain types shared across the Collection Engine, Registry, and
//! collaborator stages: the ranked tier/division matrix, and the
//! Player/Participant/Match/CollectionArtifact shapes from spec §3.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ranked tier (spec GLOSSARY). Ordered low to high for stable enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Iron,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Master,
    Grandmaster,
    Challenger,
}

impl Tier {
    pub const ALL: [Tier; 9] = [
        Tier::Iron,
        Tier::Bronze,
        Tier::Silver,
        Tier::Gold,
        Tier::Platinum,
        Tier::Diamond,
        Tier::Master,
        Tier::Grandmaster,
        Tier::Challenger,
    ];

    /// Apex tiers are flat leagues with no division (spec §4.4.1).
    pub fn is_apex(self) -> bool {
        matches!(self, Tier::Master | Tier::Grandmaster | Tier::Challenger)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Iron => "IRON",
            Tier::Bronze => "BRONZE",
            Tier::Silver => "SILVER",
            Tier::Gold => "GOLD",
            Tier::Platinum => "PLATINUM",
            Tier::Diamond => "DIAMOND",
            Tier::Master => "MASTER",
            Tier::Grandmaster => "GRANDMASTER",
            Tier::Challenger => "CHALLENGER",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Division within a non-apex tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Division {
    I,
    II,
    III,
    IV,
}

impl Division {
    pub const ALL: [Division; 4] = [Division::I, Division::II, Division::III, Division::IV];

    pub fn as_str(self) -> &'static str {
        match self {
            Division::I => "I",
            Division::II => "II",
            Division::III => "III",
            Division::IV => "IV",
        }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bucket of the ranked matrix the engine enumerates during
/// `DISCOVER_PLAYERS` (spec §4.4, stage 1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierDivision {
    pub tier: Tier,
    pub division: Option<Division>,
}

impl fmt::Display for TierDivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.division {
            Some(d) => write!(f, "{}_{}", self.tier, d),
            None => write!(f, "{}", self.tier),
        }
    }
}

/// The full, deterministically ordered ranked matrix: tiers in `tiers`'
/// order, apex tiers (§4.4.1) as a single flat-league bucket and every other
/// tier crossed with divisions I..IV. Resumability (`cursorTierDivision`,
/// spec §3 Checkpoint) is an index into this fixed ordering.
pub fn ranked_matrix(tiers: &[Tier]) -> Vec<TierDivision> {
    let mut out = Vec::new();
    for &tier in tiers {
        if tier.is_apex() {
            out.push(TierDivision { tier, division: None });
        } else {
            for &division in &Division::ALL {
                out.push(TierDivision { tier, division: Some(division) });
            }
        }
    }
    out
}

/// Summoner/account metadata attached to a player, when available from the
/// upstream API. Optional per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummonerMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summoner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summoner_name: Option<String>,
}

/// Player (spec §3). Keyed by `puuid` wherever it appears in a map. League
/// fields follow the upstream league-v1 API's camelCase convention (spec §6
/// artifact excerpt: `leaguePoints`), unlike the match-v1 fields below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub puuid: String,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<Division>,
    pub league_points: u32,
    #[serde(flatten)]
    pub summoner: SummonerMeta,
}

/// A unit fielded by a participant, with its items and star level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub character_id: String,
    #[serde(default)]
    pub items: Vec<String>,
    /// Star level, 1..=3 (spec §3).
    pub tier: u8,
}

/// An active trait and its activation tier (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraitInfo {
    pub name: String,
    pub tier_current: u32,
    pub num_units: u32,
}

/// Participant (spec §3). Keyed by `(matchId, puuid)`; embedded inline
/// under `Match.info.participants` as the upstream API returns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub puuid: String,
    /// 1..=8, unique within a match (spec §3, §8 invariants).
    pub placement: u8,
    /// 1..=10.
    pub level: u8,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub traits: Vec<TraitInfo>,
    #[serde(default)]
    pub augments: Vec<String>,
}

/// Expected participant count for a complete match (spec §4.4, design
/// default).
pub const EXPECTED_PARTICIPANTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchInfo {
    /// Milliseconds since epoch.
    pub game_datetime: i64,
    pub game_length: f64,
    pub game_version: String,
    pub participants: Vec<Participant>,
    /// Set by the engine when `incompleteMatchPolicy == mark` and this match
    /// had fewer than `EXPECTED_PARTICIPANTS` participants (spec §4.4).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

/// Match (spec §3). Keyed by `matchId`, pattern `<REGION>_<NUM>`. The
/// envelope field is camelCase (`matchId`, spec §6 excerpt) while `info`'s
/// own fields stay snake_case, matching the upstream match-v1 API's mixed
/// casing (metadata wrapper camelCase, game data snake_case).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub match_id: String,
    pub info: MatchInfo,
}

/// How the engine treats a match with fewer than `EXPECTED_PARTICIPANTS`
/// participants (spec §4.4 "Incomplete-match policy").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IncompleteMatchPolicy {
    /// Report only: retained, unflagged, listed in the validation report.
    Identify,
    /// Dropped from the artifact entirely.
    Filter,
    /// Retained with `info.incomplete = true`.
    #[default]
    Mark,
}

impl fmt::Display for IncompleteMatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncompleteMatchPolicy::Identify => "identify",
            IncompleteMatchPolicy::Filter => "filter",
            IncompleteMatchPolicy::Mark => "mark",
        };
        f.write_str(s)
    }
}

/// Daily vs weekly time-window policy (spec §4.4 stage 2, §4.5). `Incremental`
/// is recorded on `collectionMethod` for a cycle resumed from a checkpoint
/// rather than started fresh (see SPEC_FULL.md Open Question resolution #1);
/// it does not introduce a third time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMethod {
    Daily,
    Weekly,
    Incremental,
}

impl fmt::Display for CollectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionMethod::Daily => "daily",
            CollectionMethod::Weekly => "weekly",
            CollectionMethod::Incremental => "incremental",
        };
        f.write_str(s)
    }
}

/// Envelope metadata (spec §6 excerpt: `collectionInfo`), camelCase like the
/// rest of the envelope and unlike the match-internal fields it sits beside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub timestamp: String,
    pub extraction_location: String,
    pub data_version: String,
    pub collection_method: CollectionMethod,
    pub incomplete_match_policy: IncompleteMatchPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CategoryErrorRecord {
    pub count: u64,
    pub match_ids: Vec<String>,
    pub player_puuids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ErrorSummary {
    pub total_errors: u64,
    pub errors_by_category: BTreeMap<String, CategoryErrorRecord>,
}

/// CollectionArtifact (spec §3), the core's sole authoritative output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionArtifact {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    #[serde(rename = "@type")]
    pub type_: String,
    #[serde(rename = "collectionInfo")]
    pub collection_info: CollectionInfo,
    pub players: BTreeMap<String, Player>,
    pub matches: BTreeMap<String, Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaderboards: Option<serde_json::Value>,
    pub error_summary: ErrorSummary,
}

pub fn default_context() -> serde_json::Value {
    serde_json::json!({
        "@vocab": "https://tft-curation.example/vocab#",
        "puuid": "@id",
        "matchId": "@id",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apex_tiers_have_no_division() {
        assert!(Tier::Challenger.is_apex());
        assert!(Tier::Grandmaster.is_apex());
        assert!(Tier::Master.is_apex());
        assert!(!Tier::Diamond.is_apex());
    }

    #[test]
    fn ranked_matrix_ordering_and_size() {
        let matrix = ranked_matrix(&Tier::ALL);
        // 3 apex (flat) + 6 non-apex tiers * 4 divisions.
        assert_eq!(matrix.len(), 3 + 6 * 4);
        assert_eq!(matrix[0].tier, Tier::Iron);
        assert_eq!(matrix[0].division, Some(Division::I));
        let apex: Vec<_> = matrix.iter().filter(|td| td.division.is_none()).collect();
        assert_eq!(apex.len(), 3);
    }

    #[test]
    fn tier_division_display() {
        let td = TierDivision { tier: Tier::Gold, division: Some(Division::III) };
        assert_eq!(td.to_string(), "GOLD_III");
        let apex = TierDivision { tier: Tier::Challenger, division: None };
        assert_eq!(apex.to_string(), "CHALLENGER");
    }
}
