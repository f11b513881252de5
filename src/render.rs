// =============================================================================
// Rendering surface — where republished series end up
// =============================================================================

use tracing::info;

use crate::market_data::Candle;
use crate::types::{LeaderboardEntry, PortfolioSnapshot};

/// Receives the full series of a symbol every time it changes.
pub trait SeriesSink: Send + Sync {
    fn publish(&self, symbol: &str, candles: &[Candle]);
}

/// Terminal surface: logs the newest bar of each republished series.
#[derive(Debug, Default)]
pub struct LogSink;

impl SeriesSink for LogSink {
    fn publish(&self, symbol: &str, candles: &[Candle]) {
        if let Some(last) = candles.last() {
            info!(
                symbol = %symbol,
                bars = candles.len(),
                time = last.time,
                open = last.open,
                high = last.high,
                low = last.low,
                close = last.close,
                "chart"
            );
        }
    }
}

/// One-line portfolio summary.
pub fn portfolio_line(p: &PortfolioSnapshot, starting_cash: f64) -> String {
    let mut line = format!(
        "value ${:.2} | cash ${:.2} | PnL {:+.2}$ ({:+.2}%)",
        p.total_value,
        p.cash,
        p.pnl(starting_cash),
        p.pnl_percent(starting_cash)
    );
    for (coin, h) in &p.coins {
        line.push_str(&format!(" | {coin} {:.6} (${:.2})", h.amount, h.value));
        if let Some(pct) = h.profit_percent {
            line.push_str(&format!(" {pct:+.2}%"));
        }
    }
    line
}

/// Plain numbered leaderboard listing.
pub fn leaderboard_lines(entries: &[LeaderboardEntry]) -> Vec<String> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{:>2}. {:<20} {:>12.2}  {}", i + 1, e.username, e.score, e.date))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portfolio_line_shows_pnl_and_holdings() {
        let p: PortfolioSnapshot = serde_json::from_str(
            r#"{ "cash": 5000.0, "total_value": 10500.0,
                 "coins": { "BTC": { "amount": 0.1, "value": 5500.0, "profit_percent": 10.0 } } }"#,
        )
        .unwrap();
        let line = portfolio_line(&p, 10_000.0);
        assert!(line.starts_with("value $10500.00 | cash $5000.00 | PnL +500.00$ (+5.00%)"));
        assert!(line.contains("BTC 0.100000 ($5500.00) +10.00%"));
    }

    #[test]
    fn leaderboard_is_numbered() {
        let entries = vec![LeaderboardEntry {
            username: "Tester".into(),
            score: 12.5,
            date: "2025-01-01 10:00".into(),
            assets: None,
        }];
        let lines = leaderboard_lines(&entries);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(" 1. Tester"));
        assert!(lines[0].ends_with("12.50  2025-01-01 10:00"));
    }
}
