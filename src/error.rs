// =============================================================================
// Error taxonomy — behavioral classification for retry / skip / abort
// =============================================================================
//
// Categories:
//   Transient  — HTTP 5xx, timeouts, 429, pool exhaustion. Retried with
//                exponential backoff (base 1 s, cap 15 s, 3 attempts).
//   Permanent  — 4xx (other than 429), malformed payloads. The item is
//                logged and skipped; it never poisons the batch.
//   DataGap    — missing quotes, NULL indicators. Consumers degrade to
//                HOLD / skip.
//   Policy     — risk-limit veto, surfaced as a structured verdict.
//   Config     — missing DB URL, schema mismatch. The process refuses to
//                start (exit code 3).
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeridianError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("data gap: {0}")]
    DataGap(String),

    #[error("policy: {0}")]
    Policy(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MeridianError>;

impl MeridianError {
    /// Whether the retry helper should attempt this operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for MeridianError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return Self::Transient(e.to_string());
        }
        if let Some(status) = e.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                return Self::Transient(format!("HTTP {status}: {e}"));
            }
            return Self::Permanent(format!("HTTP {status}: {e}"));
        }
        // Decode/body errors are malformed payloads.
        Self::Permanent(e.to_string())
    }
}

impl From<sqlx::Error> for MeridianError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Transient(e.to_string()),
            sqlx::Error::Configuration(_) | sqlx::Error::Migrate(_) => {
                Self::Config(e.to_string())
            }
            _ => Self::Permanent(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(e: serde_json::Error) -> Self {
        Self::Permanent(format!("malformed JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MeridianError::Transient("timeout".into()).is_transient());
        assert!(!MeridianError::Permanent("404".into()).is_transient());
        assert!(!MeridianError::Config("no db url".into()).is_transient());
    }
}
