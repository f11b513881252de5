// =============================================================================
// Client Configuration — JSON file + environment overrides, atomic save
// =============================================================================
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. Persistence uses an atomic tmp + rename.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::PricePolicy;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_leaderboard_url() -> String {
    "http://localhost:5000/leaderboard".to_string()
}

fn default_nickname() -> String {
    "Player".to_string()
}

fn default_speed() -> f64 {
    0.5
}

fn default_max_candles() -> Option<usize> {
    Some(500)
}

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_starting_cash() -> f64 {
    10_000.0
}

fn default_http_timeout_secs() -> u64 {
    10
}

// =============================================================================
// ClientConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the game server (http/https; converted to ws/wss).
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Read-only leaderboard endpoint.
    #[serde(default = "default_leaderboard_url")]
    pub leaderboard_url: String,

    #[serde(default = "default_nickname")]
    pub nickname: String,

    /// Symbols to play with. Empty means "everything the server offers".
    #[serde(default)]
    pub coins: Vec<String>,

    /// Replay speed in seconds per candle.
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Start a game as soon as the symbol catalog arrives.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Cap on candles kept per symbol. `null` keeps everything.
    #[serde(default = "default_max_candles")]
    pub max_candles: Option<usize>,

    #[serde(default)]
    pub price_policy: PricePolicy,

    /// Symbol assigned to history/candle pushes that carry no symbol.
    #[serde(default = "default_symbol")]
    pub default_symbol: String,

    /// Capital every game starts with, used for PnL display.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Older servers expect `select_coins` ahead of `start_game`.
    #[serde(default)]
    pub select_before_start: bool,

    /// Offline mode: ingest this CSV instead of connecting.
    #[serde(default)]
    pub replay_csv: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            leaderboard_url: default_leaderboard_url(),
            nickname: default_nickname(),
            coins: Vec::new(),
            speed: default_speed(),
            auto_start: true,
            max_candles: default_max_candles(),
            price_policy: PricePolicy::default(),
            default_symbol: default_symbol(),
            starting_cash: default_starting_cash(),
            http_timeout_secs: default_http_timeout_secs(),
            select_before_start: false,
            replay_csv: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read client config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse client config from {}", path.display()))?;

        info!(
            path = %path.display(),
            server = %config.server_url,
            coins = ?config.coins,
            "client config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration with an atomic write (tmp file, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise client config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "client config saved (atomic)");
        Ok(())
    }

    /// Apply `COINDUEL_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("COINDUEL_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(url) = lookup("COINDUEL_LEADERBOARD_URL") {
            self.leaderboard_url = url;
        }
        if let Some(nick) = lookup("COINDUEL_NICKNAME") {
            self.nickname = nick;
        }
        if let Some(coins) = lookup("COINDUEL_COINS") {
            self.coins = parse_symbol_list(&coins);
        }
        if let Some(speed) = lookup("COINDUEL_SPEED") {
            match speed.trim().parse::<f64>() {
                Ok(s) if s.is_finite() && s > 0.0 => self.speed = s,
                _ => warn!(value = %speed, "ignoring invalid COINDUEL_SPEED"),
            }
        }
        if let Some(path) = lookup("COINDUEL_REPLAY_CSV") {
            self.replay_csv = Some(PathBuf::from(path));
        }
    }
}

/// Split a comma-separated symbol list, trimming and upper-casing entries.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.server_url, "http://localhost:5000");
        assert_eq!(cfg.max_candles, Some(500));
        assert_eq!(cfg.price_policy, PricePolicy::Reject);
        assert!(cfg.coins.is_empty());
        assert!(cfg.auto_start);
        assert!((cfg.starting_cash - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.nickname, "Player");
        assert_eq!(cfg.default_symbol, "BTC");
        assert_eq!(cfg.max_candles, Some(500));
        assert!(cfg.replay_csv.is_none());
    }

    #[test]
    fn null_max_candles_disables_cap() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{ "max_candles": null, "price_policy": "propagate" }"#)
                .unwrap();
        assert_eq!(cfg.max_candles, None);
        assert_eq!(cfg.price_policy, PricePolicy::Propagate);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("COINDUEL_NICKNAME", "Tester"),
            ("COINDUEL_COINS", " btc, eth ,,"),
            ("COINDUEL_SPEED", "0.1"),
        ]
        .into_iter()
        .collect();

        let mut cfg = ClientConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.nickname, "Tester");
        assert_eq!(cfg.coins, vec!["BTC", "ETH"]);
        assert!((cfg.speed - 0.1).abs() < f64::EPSILON);
        assert_eq!(cfg.server_url, "http://localhost:5000");
    }

    #[test]
    fn invalid_speed_override_is_ignored() {
        let mut cfg = ClientConfig::default();
        cfg.apply_overrides(|k| (k == "COINDUEL_SPEED").then(|| "fast".to_string()));
        assert!((cfg.speed - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!(
            "coinduel_config_{}.json",
            uuid::Uuid::new_v4()
        ));
        let mut cfg = ClientConfig::default();
        cfg.coins = vec!["SOL".into()];
        cfg.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.coins, vec!["SOL"]);
        let _ = std::fs::remove_file(&path);
    }
}
