//! Typed upstream API endpoints (spec §4.4, §9 "Dynamic payloads from the
//! upstream API"): league entries per tier/division, a player's match-id
//! list for a time window, and match detail by match-id. Each endpoint maps
//! its JSON response onto a concrete shape with explicit decoding; fields
//! this crate doesn't need are simply absent from the DTO and dropped by
//! `serde_json::from_value`, matching spec §9's "unknown fields ... not
//! relied upon".
//!
//! A `RiotApiClient` trait sits in front of `RateLimitedClient` so the
//! Collection Engine can be exercised against a fixture implementation in
//! tests without a live network call.

use crate::domain::{Division, Match, MatchInfo, Player, SummonerMeta, Tier, TraitInfo, Unit};
use crate::errors::ErrorCategory;
use crate::http_client::RateLimitedClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// One row of a league-entries response for a tier/division bucket.
#[derive(Debug, Clone, Deserialize)]
struct LeagueEntryDto {
    puuid: String,
    #[serde(rename = "leaguePoints")]
    league_points: u32,
    #[serde(default)]
    rank: Option<String>,
    #[serde(default)]
    summoner_id: Option<String>,
    #[serde(default)]
    summoner_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchIdsDto(Vec<String>);

#[derive(Debug, Clone, Deserialize)]
struct ParticipantDto {
    puuid: String,
    placement: u8,
    level: u8,
    #[serde(default)]
    units: Vec<UnitDto>,
    #[serde(default)]
    traits: Vec<TraitDto>,
    #[serde(default)]
    augments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UnitDto {
    character_id: String,
    #[serde(default)]
    items: Vec<String>,
    tier: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct TraitDto {
    name: String,
    tier_current: u32,
    num_units: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchInfoDto {
    game_datetime: i64,
    game_length: f64,
    game_version: String,
    participants: Vec<ParticipantDto>,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchDetailDto {
    metadata: MatchMetadataDto,
    info: MatchInfoDto,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchMetadataDto {
    match_id: String,
}

impl From<ParticipantDto> for crate::domain::Participant {
    fn from(dto: ParticipantDto) -> Self {
        Self {
            puuid: dto.puuid,
            placement: dto.placement,
            level: dto.level,
            units: dto.units.into_iter().map(Into::into).collect(),
            traits: dto.traits.into_iter().map(Into::into).collect(),
            augments: dto.augments,
        }
    }
}

impl From<UnitDto> for Unit {
    fn from(dto: UnitDto) -> Self {
        Self { character_id: dto.character_id, items: dto.items, tier: dto.tier }
    }
}

impl From<TraitDto> for TraitInfo {
    fn from(dto: TraitDto) -> Self {
        Self { name: dto.name, tier_current: dto.tier_current, num_units: dto.num_units }
    }
}

fn parse_division(raw: &str) -> Option<Division> {
    match raw {
        "I" => Some(Division::I),
        "II" => Some(Division::II),
        "III" => Some(Division::III),
        "IV" => Some(Division::IV),
        _ => None,
    }
}

/// Seam between the Collection Engine and the real upstream API, so tests
/// can supply a fixture implementation (spec §9).
#[async_trait]
pub trait RiotApiClient: Send + Sync {
    async fn league_entries(&self, tier: Tier, division: Option<Division>) -> Result<Vec<Player>, (ErrorCategory, String)>;

    async fn match_ids_by_puuid(
        &self,
        puuid: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Result<Vec<String>, (ErrorCategory, String)>;

    async fn match_detail(&self, match_id: &str) -> Result<Match, (ErrorCategory, String)>;
}

/// Production binding over a `RateLimitedClient` (spec §4.1/§4.4).
pub struct RiotApi {
    client: Arc<RateLimitedClient>,
}

impl RiotApi {
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RiotApiClient for RiotApi {
    async fn league_entries(&self, tier: Tier, division: Option<Division>) -> Result<Vec<Player>, (ErrorCategory, String)> {
        let endpoint = match division {
            Some(d) => format!("/tft/league/v1/entries/{}/{}", tier.as_str(), d.as_str()),
            None => format!("/tft/league/v1/{}", tier.as_str().to_lowercase()),
        };

        let body = self.client.request(&endpoint, &[]).await?;
        let rows: Vec<LeagueEntryDto> = serde_json::from_value(body)
            .map_err(|e| (ErrorCategory::Parse, format!("league entries for {endpoint}: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|row| Player {
                puuid: row.puuid,
                tier,
                rank: row.rank.as_deref().and_then(parse_division),
                league_points: row.league_points,
                summoner: SummonerMeta { summoner_id: row.summoner_id, summoner_name: row.summoner_name },
            })
            .collect())
    }

    async fn match_ids_by_puuid(
        &self,
        puuid: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Result<Vec<String>, (ErrorCategory, String)> {
        let endpoint = format!("/tft/match/v1/matches/by-puuid/{puuid}/ids");
        let params = [
            ("startTime", (window_start_ms / 1000).to_string()),
            ("endTime", (window_end_ms / 1000).to_string()),
        ];
        let body = self.client.request(&endpoint, &params).await?;
        let ids: MatchIdsDto =
            serde_json::from_value(body).map_err(|e| (ErrorCategory::Parse, format!("match ids for {puuid}: {e}")))?;
        Ok(ids.0)
    }

    async fn match_detail(&self, match_id: &str) -> Result<Match, (ErrorCategory, String)> {
        let endpoint = format!("/tft/match/v1/matches/{match_id}");
        let body = self.client.request(&endpoint, &[]).await?;
        let dto: MatchDetailDto =
            serde_json::from_value(body).map_err(|e| (ErrorCategory::Parse, format!("match detail for {match_id}: {e}")))?;

        Ok(Match {
            match_id: dto.metadata.match_id,
            info: MatchInfo {
                game_datetime: dto.info.game_datetime,
                game_length: dto.info.game_length,
                game_version: dto.info.game_version,
                participants: dto.info.participants.into_iter().map(Into::into).collect(),
                incomplete: false,
            },
        })
    }
}
