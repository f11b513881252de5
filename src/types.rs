// =============================================================================
// Shared types used across the CoinDuel client
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Direction of a trade intent. Serialised in upper case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Whether the real-time channel to the game server is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// A single holding inside a portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    #[serde(default, alias = "quantity")]
    pub amount: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default, alias = "profit_pct", alias = "pnl_pct")]
    pub profit_percent: Option<f64>,
}

/// Server-authoritative portfolio state. Never computed or mutated locally;
/// replaced wholesale on every `portfolio_state` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(default)]
    pub cash: f64,
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub coins: BTreeMap<String, Holding>,
    /// Fields this client does not interpret, kept untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PortfolioSnapshot {
    /// Absolute profit relative to the capital the player started with.
    pub fn pnl(&self, starting_cash: f64) -> f64 {
        self.total_value - starting_cash
    }

    /// Profit as a percentage of the starting capital.
    pub fn pnl_percent(&self, starting_cash: f64) -> f64 {
        if starting_cash == 0.0 {
            return 0.0;
        }
        self.pnl(starting_cash) / starting_cash * 100.0
    }
}

/// Final result pushed by the server when a game ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GameResult {
    /// `score`, else the first of `final_value` / `total_value` the server sent.
    pub fn final_score(&self) -> Option<f64> {
        self.score.or_else(|| {
            ["final_value", "total_value"]
                .iter()
                .find_map(|k| self.extra.get(*k).and_then(serde_json::Value::as_f64))
        })
    }
}

/// One row of the leaderboard endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub username: String,
    pub score: f64,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub assets: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_serialises_upper_case() {
        assert_eq!(serde_json::to_string(&TradeDirection::Buy).unwrap(), "\"BUY\"");
        let d: TradeDirection = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(d, TradeDirection::Sell);
    }

    #[test]
    fn portfolio_keeps_unknown_fields() {
        let json = r#"{
            "cash": 0.0,
            "total_value": 10000.0,
            "coins": { "BTC": { "amount": 0.2, "value": 10000.0 } },
            "round": 7
        }"#;
        let p: PortfolioSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(p.coins["BTC"].amount, 0.2);
        assert_eq!(p.coins["BTC"].profit_percent, None);
        assert_eq!(p.extra["round"], serde_json::json!(7));
    }

    #[test]
    fn pnl_against_starting_cash() {
        let p: PortfolioSnapshot =
            serde_json::from_str(r#"{ "cash": 500.0, "total_value": 11000.0 }"#).unwrap();
        assert!((p.pnl(10_000.0) - 1000.0).abs() < f64::EPSILON);
        assert!((p.pnl_percent(10_000.0) - 10.0).abs() < 1e-9);
        assert_eq!(p.pnl_percent(0.0), 0.0);
    }

    #[test]
    fn game_result_prefers_score_over_other_totals() {
        let r: GameResult =
            serde_json::from_str(r#"{ "score": 12000.0, "total_value": 11000.0 }"#).unwrap();
        assert_eq!(r.final_score(), Some(12000.0));
        assert_eq!(r.extra["total_value"], serde_json::json!(11000.0));

        let r: GameResult = serde_json::from_str(r#"{ "final_value": 9500.0 }"#).unwrap();
        assert_eq!(r.score, None);
        assert_eq!(r.final_score(), Some(9500.0));
    }

    #[test]
    fn holding_accepts_quantity_alias() {
        let h: Holding =
            serde_json::from_str(r#"{ "quantity": 1.5, "value": 30.0, "profit_pct": -2.5 }"#)
                .unwrap();
        assert_eq!(h.amount, 1.5);
        assert_eq!(h.profit_percent, Some(-2.5));
    }
}
