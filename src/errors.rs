use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy used by Error Accounting, the Registry, and the HTTP
/// client's response classification (spec §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    AuthExpired,
    RateLimited,
    NotFound,
    ServerError,
    Transport,
    Parse,
    InvariantViolation,
}

// Spec §7 lists exactly seven categories; `Transport` is the catch-all bucket
// used when a failure needs a category but predates any classification (e.g.
// a freshly-initialized `RetryInfo`).
impl Default for ErrorCategory {
    fn default() -> Self {
        ErrorCategory::Transport
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::AuthExpired => "AUTH_EXPIRED",
            ErrorCategory::RateLimited => "RATE_LIMITED",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::ServerError => "SERVER_5xx",
            ErrorCategory::Transport => "TRANSPORT",
            ErrorCategory::Parse => "PARSE",
            ErrorCategory::InvariantViolation => "INVARIANT_VIOLATION",
        };
        f.write_str(s)
    }
}

impl ErrorCategory {
    /// Whether the HTTP client should retry transparently (spec §4.1/§7).
    /// `RateLimited` is handled inline by the client itself and never
    /// escalates to the caller unless the retry cap is exceeded, at which
    /// point it is reclassified as `Transport` before it ever reaches here.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorCategory::ServerError | ErrorCategory::Transport)
    }

    /// Whether this category is ever written to the Registry as a terminal
    /// `FAILED` outcome for a given match/player id (spec §7).
    pub fn fails_registry_row(self) -> bool {
        matches!(
            self,
            ErrorCategory::NotFound | ErrorCategory::ServerError | ErrorCategory::Transport | ErrorCategory::Parse
        )
    }
}

/// The exit code a fatal `AUTH_EXPIRED` interruption uses so the orchestrator
/// (or a calling shell script) can recognize "checkpointed, resumable" rather
/// than an ordinary failure.
pub const EXIT_RESUMABLE: i32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_registry_category_strings() {
        assert_eq!(ErrorCategory::AuthExpired.to_string(), "AUTH_EXPIRED");
        assert_eq!(ErrorCategory::ServerError.to_string(), "SERVER_5xx");
    }

    #[test]
    fn retryable_categories() {
        assert!(ErrorCategory::ServerError.retryable());
        assert!(ErrorCategory::Transport.retryable());
        assert!(!ErrorCategory::NotFound.retryable());
        assert!(!ErrorCategory::AuthExpired.retryable());
    }

    #[test]
    fn serde_round_trip() {
        let cat = ErrorCategory::InvariantViolation;
        let json = serde_json::to_string(&cat).unwrap();
        assert_eq!(json, "\"INVARIANT_VIOLATION\"");
        let back: ErrorCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cat);
    }
}
