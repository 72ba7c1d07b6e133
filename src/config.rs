// =============================================================================
// Settings — layered key/value configuration
// =============================================================================
//
// Two files are consulted: `meridian.conf` (the fallback, usually checked in
// with sane defaults) and `meridian.local.conf` (operator overrides, never
// checked in). Local keys win. Secrets may instead come from the
// environment; `database_url` falls back to the DATABASE_URL env var.
//
// Format: one `key = value` per line, `#` starts a comment, whitespace is
// trimmed. Lists are comma separated.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::MeridianError;

pub const FALLBACK_FILE: &str = "meridian.conf";
pub const LOCAL_FILE: &str = "meridian.local.conf";

#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load the layered configuration from the working directory. Missing
    /// files are fine; missing keys fall back to accessor defaults.
    pub fn load() -> Self {
        Self::load_from(FALLBACK_FILE, LOCAL_FILE)
    }

    pub fn load_from(fallback: impl AsRef<Path>, local: impl AsRef<Path>) -> Self {
        let mut values = BTreeMap::new();

        for (layer, path) in [("fallback", fallback.as_ref()), ("local", local.as_ref())] {
            match std::fs::read_to_string(path) {
                Ok(text) => {
                    let parsed = Self::parse(&text);
                    info!(layer, path = %path.display(), keys = parsed.len(), "config layer loaded");
                    values.extend(parsed);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(layer, path = %path.display(), error = %e, "config layer unreadable — skipped");
                }
            }
        }

        Self { values }
    }

    /// Parse `key = value` text into a map. Later duplicates win.
    pub fn parse(text: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    out.insert(key.to_string(), value.trim().to_string());
                }
            }
        }
        out
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    // ── Typed accessors ─────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Comma-separated list, entries trimmed, empties dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Well-known options ──────────────────────────────────────────────

    /// The database URL is the one setting without which the process cannot
    /// run; its absence is a fatal configuration error (exit code 3).
    pub fn database_url(&self) -> std::result::Result<String, MeridianError> {
        if let Some(url) = self.get("database_url") {
            return Ok(url.to_string());
        }
        std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                MeridianError::Config(
                    "database_url is not set (config file or DATABASE_URL env)".into(),
                )
            })
    }

    pub fn tickers_fast(&self) -> Vec<String> {
        self.get_list("tickers_fast")
    }

    pub fn tickers_medium(&self) -> Vec<String> {
        self.get_list("tickers_medium")
    }

    pub fn tickers_long(&self) -> Vec<String> {
        self.get_list("tickers_long")
    }

    pub fn trading_cycle_tickers(&self) -> Vec<String> {
        self.get_list("trading_cycle_tickers")
    }

    pub fn initial_cash_usd(&self) -> f64 {
        self.get_f64("initial_cash_usd", 10_000.0)
    }

    pub fn commission_rate(&self) -> f64 {
        self.get_f64("commission_rate", 0.001)
    }

    pub fn sandbox_slippage_sell_pct(&self) -> f64 {
        self.get_f64("sandbox_slippage_sell_pct", 0.0)
    }

    pub fn use_llm(&self) -> bool {
        self.get_bool("use_llm", false)
    }

    pub fn sentiment_auto_calculate(&self) -> bool {
        self.get_bool("sentiment_auto_calculate", true)
    }

    pub fn llm_news_cooldown_hours(&self) -> u64 {
        self.get_u64("llm_news_cooldown_hours", 12)
    }

    pub fn llm_compare_models(&self) -> Vec<String> {
        self.get_list("llm_compare_models")
    }

    pub fn risk_config_path(&self) -> &str {
        self.get_or("risk_config_path", "risk_config.json")
    }

    pub fn game_5m_cooldown_minutes(&self) -> u64 {
        self.get_u64("game_5m_cooldown_minutes", 30)
    }

    pub fn premarket_alert(&self) -> bool {
        self.get_bool("premarket_alert", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let text = "# comment\n\n  llm_model = gpt-4o-mini \nuse_llm=true\nbad line\n";
        let map = Settings::parse(text);
        assert_eq!(map.get("llm_model").unwrap(), "gpt-4o-mini");
        assert_eq!(map.get("use_llm").unwrap(), "true");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn local_layer_overrides_fallback() {
        let dir = std::env::temp_dir().join(format!("meridian-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let fallback = dir.join("meridian.conf");
        let local = dir.join("meridian.local.conf");
        std::fs::write(&fallback, "llm_model = base\ncommission_rate = 0.002\n").unwrap();
        std::fs::write(&local, "llm_model = override\n").unwrap();

        let settings = Settings::load_from(&fallback, &local);
        assert_eq!(settings.get("llm_model"), Some("override"));
        assert!((settings.commission_rate() - 0.002).abs() < f64::EPSILON);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn typed_accessors_fall_back() {
        let settings = Settings::from_pairs(&[("use_llm", "yes"), ("initial_cash_usd", "2500")]);
        assert!(settings.use_llm());
        assert!((settings.initial_cash_usd() - 2500.0).abs() < f64::EPSILON);
        assert!((settings.commission_rate() - 0.001).abs() < f64::EPSILON);
        assert_eq!(settings.llm_news_cooldown_hours(), 12);
    }

    #[test]
    fn lists_are_trimmed() {
        let settings = Settings::from_pairs(&[("tickers_fast", "MSFT, AAPL ,, EURUSD=X")]);
        assert_eq!(settings.tickers_fast(), vec!["MSFT", "AAPL", "EURUSD=X"]);
        assert!(settings.tickers_long().is_empty());
    }

    #[test]
    fn missing_database_url_is_a_config_error() {
        let settings = Settings::from_pairs(&[]);
        // Only meaningful when the env var is absent, as in the test env.
        if std::env::var("DATABASE_URL").is_err() {
            assert!(matches!(
                settings.database_url(),
                Err(MeridianError::Config(_))
            ));
        }
    }
}
