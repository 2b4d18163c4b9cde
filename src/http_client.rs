//! Rate-Limited HTTP Client (spec §4.1): a dual-window token-bucket budget
//! guarding every outbound request, plus response classification and
//! retry/backoff. The bucket itself is hand-rolled `Instant` refill math;
//! the retry loop wraps each request with exponential backoff and jitter
//! on retryable categories.

use crate::errors::ErrorCategory;
use eyre::{eyre, Result};
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Backoff ceiling for 429 responses without a usable `Retry-After`
/// (spec §4.1, design default 120s).
const RATE_LIMIT_BACKOFF_CEILING: Duration = Duration::from_secs(120);
/// Retry cap for 5xx/transport failures (spec §4.1, design default 3).
const RETRY_CAP: u32 = 3;
/// Hard per-request timeout (spec §5, design default 30s).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A single token bucket: capacity tokens, refilled continuously at
/// `refill_rate` tokens/second, never exceeding `capacity`.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let refill_rate = capacity as f64 / window.as_secs_f64().max(0.001);
        Self { capacity: capacity as f64, tokens: capacity as f64, refill_rate, last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Seconds to wait until at least `margin` tokens are available, or
    /// `None` if that many are already available.
    fn time_until(&mut self, margin: f64) -> Option<Duration> {
        self.refill();
        if self.tokens >= margin {
            return None;
        }
        let deficit = margin - self.tokens;
        Some(Duration::from_secs_f64(deficit / self.refill_rate))
    }

    fn take_one(&mut self) {
        self.refill();
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

/// Dual-window rate limit budget (spec §4.1): a short window (e.g. 20
/// req/s) and a long window (e.g. 100 req / 2min), both configurable.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitBudget {
    pub short_window_requests: u32,
    pub short_window: Duration,
    pub long_window_requests: u32,
    pub long_window: Duration,
}

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self {
            short_window_requests: 20,
            short_window: Duration::from_secs(1),
            long_window_requests: 100,
            long_window: Duration::from_secs(120),
        }
    }
}

/// Safety margin (in tokens) the proactive long-window check reserves
/// before admitting a request (spec §4.1 "Proactive window check").
const LONG_WINDOW_SAFETY_MARGIN: f64 = 1.0;

struct Buckets {
    short: TokenBucket,
    long: TokenBucket,
}

/// Guards every outbound request to the upstream API. One instance per
/// region, shared by all Collection Engine workers (spec §5).
pub struct RateLimitedClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    buckets: Mutex<Buckets>,
}

/// Outcome of a classified HTTP response (spec §4.1).
pub enum Classified {
    Ok(serde_json::Value),
    Retry { after: Option<Duration>, category: ErrorCategory },
    Terminal(ErrorCategory, String),
}

impl RateLimitedClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, budget: RateLimitBudget) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| eyre!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            buckets: Mutex::new(Buckets {
                short: TokenBucket::new(budget.short_window_requests, budget.short_window),
                long: TokenBucket::new(budget.long_window_requests, budget.long_window),
            }),
        })
    }

    /// Blocks until both buckets admit the request (spec §4.1 "Proactive
    /// window check").
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let short_wait = buckets.short.time_until(1.0);
                let long_wait = buckets.long.time_until(LONG_WINDOW_SAFETY_MARGIN);
                match (short_wait, long_wait) {
                    (None, None) => {
                        buckets.short.take_one();
                        buckets.long.take_one();
                        None
                    }
                    (s, l) => Some(s.into_iter().chain(l).max().unwrap_or(Duration::from_millis(10))),
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }

    /// Issues a GET request against `endpoint` with the proactive rate
    /// limit check, transparent 429 handling, and retry/backoff for 5xx
    /// and transport errors (spec §4.1).
    pub async fn request(&self, endpoint: &str, params: &[(&str, String)]) -> Result<serde_json::Value, (ErrorCategory, String)> {
        let mut attempt: u32 = 0;

        loop {
            self.acquire().await;

            let url = format!("{}{}", self.base_url, endpoint);
            let response = self
                .http
                .get(&url)
                .header("X-Riot-Token", &self.api_key)
                .query(params)
                .send()
                .await;

            let classified = match response {
                Ok(resp) => classify_response(resp).await,
                Err(err) => {
                    if err.is_timeout() || err.is_connect() || err.is_request() {
                        Classified::Retry { after: None, category: ErrorCategory::Transport }
                    } else {
                        Classified::Terminal(ErrorCategory::Transport, err.to_string())
                    }
                }
            };

            match classified {
                Classified::Ok(body) => return Ok(body),
                Classified::Terminal(category, detail) => return Err((category, detail)),
                Classified::Retry { after, category } => {
                    attempt += 1;
                    if attempt > RETRY_CAP {
                        // Spec §7: RATE_LIMITED retry-cap exhaustion escalates to
                        // TRANSPORT; other retryable categories (SERVER_5xx) keep
                        // their own classification.
                        let escalated = if category == ErrorCategory::RateLimited { ErrorCategory::Transport } else { category };
                        return Err((escalated, format!("retry cap ({RETRY_CAP}) exceeded for {endpoint}")));
                    }
                    let delay = after.unwrap_or_else(|| exponential_backoff_with_jitter(attempt));
                    let delay = delay.min(RATE_LIMIT_BACKOFF_CEILING);
                    tracing::warn!(endpoint, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                    sleep(delay).await;
                }
            }
        }
    }
}

async fn classify_response(response: reqwest::Response) -> Classified {
    let status = response.status();

    if status.is_success() {
        return match response.json::<serde_json::Value>().await {
            Ok(body) => Classified::Ok(body),
            Err(err) => Classified::Terminal(ErrorCategory::Parse, err.to_string()),
        };
    }

    match status.as_u16() {
        401 | 403 => Classified::Terminal(ErrorCategory::AuthExpired, format!("status {status}")),
        404 => Classified::Terminal(ErrorCategory::NotFound, format!("status {status}")),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            Classified::Retry { after: retry_after, category: ErrorCategory::RateLimited }
        }
        500..=599 => Classified::Retry { after: None, category: ErrorCategory::ServerError },
        _ => Classified::Terminal(ErrorCategory::Transport, format!("unexpected status {status}")),
    }
}

/// Exponential backoff with jitter, capped by the caller at
/// `RATE_LIMIT_BACKOFF_CEILING` (spec §4.1).
fn exponential_backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 200u64.saturating_mul(1u64 << attempt.min(10));
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4 + 1);
    Duration::from_millis(base_ms + jitter_ms)
}
