// =============================================================================
// Game Session — the screen state of one CoinDuel client
// =============================================================================
//
// Single source of truth for what the player sees: connectivity, symbol
// catalog, per-symbol candle series, the server-pushed portfolio, the game
// result and leaderboard, and error notices.
//
// Inbound messages are applied serially by `apply`, an exhaustive match over
// the closed message enum. Every applied change bumps `state_version`.
//
// Each started game gets a fresh session id. Asynchronous results (the
// leaderboard fetch) carry the id they were started for and are dropped when
// a newer game has begun since.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared fields.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::market_data::{Candle, SeriesStore};
use crate::protocol::{InboundMessage, OutboundIntent};
use crate::render::SeriesSink;
use crate::runtime_config::ClientConfig;
use crate::types::{
    ConnectionStatus, GameResult, LeaderboardEntry, PortfolioSnapshot, TradeDirection,
};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// RFC 3339 timestamp.
    pub at: String,
}

/// What the caller must do after a message was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    None,
    /// The symbol catalog arrived and no game is running.
    CatalogReady(Vec<String>),
    /// The game ended; fetch the leaderboard for this session.
    FetchLeaderboard(Uuid),
}

/// Serializable view of the whole session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state_version: u64,
    pub connection: ConnectionStatus,
    pub session_id: Option<Uuid>,
    pub available_coins: Vec<String>,
    pub series_lengths: HashMap<String, usize>,
    pub last_candles: HashMap<String, Candle>,
    pub portfolio: Option<PortfolioSnapshot>,
    pub game_over: Option<GameResult>,
    pub game_finished: bool,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub notice: Option<String>,
    pub recent_errors: Vec<ErrorRecord>,
    pub server_time: i64,
}

pub struct GameSession {
    state_version: AtomicU64,
    starting_cash: f64,

    series: SeriesStore,
    sink: Arc<dyn SeriesSink>,

    connection: RwLock<ConnectionStatus>,
    session_id: RwLock<Option<Uuid>>,
    available_coins: RwLock<Vec<String>>,
    portfolio: RwLock<Option<PortfolioSnapshot>>,
    game_finished: RwLock<bool>,
    game_over: RwLock<Option<GameResult>>,
    leaderboard: RwLock<Vec<LeaderboardEntry>>,

    /// Blocking notice shown until acknowledged.
    notice: RwLock<Option<String>>,
    recent_errors: RwLock<Vec<ErrorRecord>>,
}

impl GameSession {
    pub fn new(config: &ClientConfig, sink: Arc<dyn SeriesSink>) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            starting_cash: config.starting_cash,
            series: SeriesStore::new(config.max_candles, config.price_policy),
            sink,
            connection: RwLock::new(ConnectionStatus::Disconnected),
            session_id: RwLock::new(None),
            available_coins: RwLock::new(Vec::new()),
            portfolio: RwLock::new(None),
            game_finished: RwLock::new(false),
            game_over: RwLock::new(None),
            leaderboard: RwLock::new(Vec::new()),
            notice: RwLock::new(None),
            recent_errors: RwLock::new(Vec::new()),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Game lifecycle ──────────────────────────────────────────────────

    /// Start a new game: fresh session id, all per-game state cleared.
    /// Returns the id and the intent to send.
    pub fn begin_game(
        &self,
        nickname: &str,
        coins: Vec<String>,
        speed: f64,
    ) -> Result<(Uuid, OutboundIntent)> {
        if coins.is_empty() {
            bail!("cannot start a game without symbols");
        }
        if !speed.is_finite() || speed <= 0.0 {
            bail!("speed must be a positive number of seconds, got {speed}");
        }

        let id = Uuid::new_v4();
        *self.session_id.write() = Some(id);
        self.reset_game_state();
        self.increment_version();

        info!(session = %id, coins = ?coins, speed, "starting game");
        Ok((
            id,
            OutboundIntent::StartGame {
                nickname: nickname.to_string(),
                coins,
                speed,
            },
        ))
    }

    /// Leave the current game; portfolio and series are cleared.
    pub fn end_game(&self) {
        *self.session_id.write() = None;
        self.reset_game_state();
        self.increment_version();
    }

    fn reset_game_state(&self) {
        self.series.clear();
        *self.portfolio.write() = None;
        *self.game_over.write() = None;
        *self.game_finished.write() = false;
        self.leaderboard.write().clear();
    }

    pub fn session_id(&self) -> Option<Uuid> {
        *self.session_id.read()
    }

    pub fn is_playing(&self) -> bool {
        self.session_id().is_some() && !*self.game_finished.read()
    }

    // ── Intents ─────────────────────────────────────────────────────────

    pub fn trade(
        &self,
        coin: &str,
        direction: TradeDirection,
        amount: f64,
    ) -> Result<OutboundIntent> {
        if !amount.is_finite() || amount <= 0.0 {
            bail!("enter a valid amount (got {amount})");
        }
        if coin.trim().is_empty() {
            bail!("no symbol selected");
        }
        Ok(OutboundIntent::Trade {
            coin: coin.trim().to_uppercase(),
            direction,
            amount,
        })
    }

    pub fn update_speed(&self, speed: f64) -> Result<OutboundIntent> {
        if !speed.is_finite() || speed <= 0.0 {
            bail!("speed must be a positive number of seconds, got {speed}");
        }
        Ok(OutboundIntent::UpdateSpeed { speed })
    }

    // ── Inbound dispatch ────────────────────────────────────────────────

    /// Apply one inbound message.
    pub fn apply(&self, msg: InboundMessage) -> FollowUp {
        let follow_up = match msg {
            InboundMessage::Connected => {
                *self.connection.write() = ConnectionStatus::Connected;
                info!("connected to game server");
                FollowUp::None
            }
            InboundMessage::Disconnected => {
                *self.connection.write() = ConnectionStatus::Disconnected;
                warn!("disconnected from game server");
                FollowUp::None
            }
            InboundMessage::AvailableCoins(coins) => {
                info!(coins = ?coins, "symbol catalog received");
                *self.available_coins.write() = coins.clone();
                if self.session_id().is_none() {
                    FollowUp::CatalogReady(coins)
                } else {
                    FollowUp::None
                }
            }
            InboundMessage::History { symbol, candles } => {
                let series = self.series.replace_history(&symbol, &candles);
                info!(symbol = %symbol, received = candles.len(), kept = series.len(), "history loaded");
                self.sink.publish(&symbol, &series);
                FollowUp::None
            }
            InboundMessage::Candle { symbol, candle } => {
                if let Some((outcome, Some(series))) = self.series.apply_tick(&symbol, &candle) {
                    debug!(symbol = %symbol, ?outcome, "candle merged");
                    self.sink.publish(&symbol, &series);
                }
                FollowUp::None
            }
            InboundMessage::Portfolio(snapshot) => {
                *self.portfolio.write() = Some(snapshot);
                FollowUp::None
            }
            InboundMessage::GameOver(result) => {
                info!(score = ?result.as_ref().and_then(GameResult::final_score), "game over");
                *self.game_over.write() = result;
                *self.game_finished.write() = true;
                *self.portfolio.write() = None;
                match self.session_id() {
                    Some(id) => FollowUp::FetchLeaderboard(id),
                    None => FollowUp::None,
                }
            }
            InboundMessage::Error(message) => {
                warn!(error = %message, "game server reported an error");
                self.push_error(message.clone());
                *self.notice.write() = Some(message);
                FollowUp::None
            }
            InboundMessage::Unknown { name } => {
                debug!(event = %name, "ignoring unknown event");
                return FollowUp::None;
            }
        };
        self.increment_version();
        follow_up
    }

    /// Store a fetched leaderboard unless a newer game has started.
    /// Returns whether it was applied.
    pub fn apply_leaderboard(&self, session: Uuid, entries: Vec<LeaderboardEntry>) -> bool {
        if self.session_id() != Some(session) {
            debug!(session = %session, "dropping stale leaderboard response");
            return false;
        }
        *self.leaderboard.write() = entries;
        self.increment_version();
        true
    }

    // ── Notices & errors ────────────────────────────────────────────────

    pub fn pending_notice(&self) -> Option<String> {
        self.notice.read().clone()
    }

    /// Dismiss the blocking notice, returning it.
    pub fn acknowledge_notice(&self) -> Option<String> {
        let taken = self.notice.write().take();
        if taken.is_some() {
            self.increment_version();
        }
        taken
    }

    /// Record an error message; oldest entries are evicted past
    /// [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, message: String) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        });
        if errors.len() > MAX_RECENT_ERRORS {
            let excess = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(..excess);
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn connection(&self) -> ConnectionStatus {
        *self.connection.read()
    }

    pub fn available_coins(&self) -> Vec<String> {
        self.available_coins.read().clone()
    }

    pub fn series(&self, symbol: &str) -> Vec<Candle> {
        self.series.get(symbol)
    }

    pub fn portfolio(&self) -> Option<PortfolioSnapshot> {
        self.portfolio.read().clone()
    }

    pub fn starting_cash(&self) -> f64 {
        self.starting_cash
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.leaderboard.read().clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let counts = self.series.counts();
        let last_candles = counts
            .keys()
            .filter_map(|sym| self.series.last(sym).map(|c| (sym.clone(), c)))
            .collect();

        SessionSnapshot {
            state_version: self.current_state_version(),
            connection: self.connection(),
            session_id: self.session_id(),
            available_coins: self.available_coins(),
            series_lengths: counts,
            last_candles,
            portfolio: self.portfolio(),
            game_over: self.game_over.read().clone(),
            game_finished: *self.game_finished.read(),
            leaderboard: self.leaderboard(),
            notice: self.notice.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
            server_time: Utc::now().timestamp_millis(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::RawCandle;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(String, Vec<Candle>)>>,
    }

    impl SeriesSink for RecordingSink {
        fn publish(&self, symbol: &str, candles: &[Candle]) {
            self.published
                .lock()
                .push((symbol.to_string(), candles.to_vec()));
        }
    }

    fn session() -> (GameSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let s = GameSession::new(&ClientConfig::default(), sink.clone());
        (s, sink)
    }

    fn tick(symbol: &str, time: i64, close: f64) -> InboundMessage {
        InboundMessage::Candle {
            symbol: symbol.into(),
            candle: RawCandle(json!({
                "time": time, "open": close, "high": close, "low": close, "close": close
            })),
        }
    }

    #[test]
    fn catalog_before_game_asks_to_start() {
        let (s, _) = session();
        let f = s.apply(InboundMessage::AvailableCoins(vec!["BTC".into()]));
        assert_eq!(f, FollowUp::CatalogReady(vec!["BTC".into()]));

        s.begin_game("P", vec!["BTC".into()], 0.5).unwrap();
        let f = s.apply(InboundMessage::AvailableCoins(vec!["BTC".into()]));
        assert_eq!(f, FollowUp::None);
    }

    #[test]
    fn ticks_coalesce_and_republish() {
        let (s, sink) = session();
        s.apply(tick("BTC", 1000, 10.0));
        s.apply(tick("BTC", 1000, 12.0));
        s.apply(tick("BTC", 900, 9.0));

        let series = s.series("BTC");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, 12.0);

        // The late candle changed nothing and was not republished.
        let published = sink.published.lock();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].1[0].close, 12.0);
    }

    #[test]
    fn malformed_tick_is_dropped_without_publishing() {
        let (s, sink) = session();
        s.apply(InboundMessage::Candle {
            symbol: "BTC".into(),
            candle: RawCandle(json!({ "close": 1 })),
        });
        assert!(s.series("BTC").is_empty());
        assert!(sink.published.lock().is_empty());
    }

    #[test]
    fn history_replaces_and_publishes() {
        let (s, sink) = session();
        s.apply(tick("ETH", 5000, 1.0));
        s.apply(InboundMessage::History {
            symbol: "ETH".into(),
            candles: vec![
                RawCandle(json!({ "Date": "2018-12-23", "Open": 1, "High": 2, "Low": 0.5, "Close": 1.5 })),
                RawCandle(json!({ "Date": "2018-12-22", "Open": 1, "High": 2, "Low": 0.5, "Close": 1.2 })),
            ],
        });
        let series = s.series("ETH");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].time, 1_545_436_800);
        assert_eq!(sink.published.lock().last().unwrap().1, series);
    }

    #[test]
    fn portfolio_replaced_wholesale_and_cleared_on_game_over() {
        let (s, _) = session();
        let (id, _) = s.begin_game("P", vec!["BTC".into()], 0.5).unwrap();

        let p1: PortfolioSnapshot =
            serde_json::from_value(json!({ "cash": 1.0, "total_value": 2.0, "coins": { "BTC": { "amount": 1.0 } } }))
                .unwrap();
        let p2: PortfolioSnapshot =
            serde_json::from_value(json!({ "cash": 3.0, "total_value": 3.0 })).unwrap();
        s.apply(InboundMessage::Portfolio(p1));
        s.apply(InboundMessage::Portfolio(p2.clone()));
        assert_eq!(s.portfolio(), Some(p2));

        let f = s.apply(InboundMessage::GameOver(None));
        assert_eq!(f, FollowUp::FetchLeaderboard(id));
        assert!(s.portfolio().is_none());
        assert!(!s.is_playing());
    }

    #[test]
    fn stale_leaderboard_is_ignored() {
        let (s, _) = session();
        let (old, _) = s.begin_game("P", vec!["BTC".into()], 0.5).unwrap();
        s.apply(InboundMessage::GameOver(None));
        let (new, _) = s.begin_game("P", vec!["BTC".into()], 0.5).unwrap();
        assert_ne!(old, new);

        let entry = LeaderboardEntry {
            username: "A".into(),
            score: 1.0,
            date: String::new(),
            assets: None,
        };
        assert!(!s.apply_leaderboard(old, vec![entry.clone()]));
        assert!(s.leaderboard().is_empty());
        assert!(s.apply_leaderboard(new, vec![entry]));
        assert_eq!(s.leaderboard().len(), 1);
    }

    #[test]
    fn begin_game_clears_previous_series() {
        let (s, _) = session();
        s.begin_game("P", vec!["BTC".into()], 0.5).unwrap();
        s.apply(tick("BTC", 1000, 1.0));
        s.begin_game("P", vec!["BTC".into()], 0.5).unwrap();
        assert!(s.series("BTC").is_empty());
    }

    #[test]
    fn begin_game_validates_input() {
        let (s, _) = session();
        assert!(s.begin_game("P", vec![], 0.5).is_err());
        assert!(s.begin_game("P", vec!["BTC".into()], 0.0).is_err());
        assert!(s.session_id().is_none());
    }

    #[test]
    fn error_sets_blocking_notice() {
        let (s, _) = session();
        s.apply(InboundMessage::Error("Insufficient funds".into()));
        assert_eq!(s.snapshot().notice.as_deref(), Some("Insufficient funds"));
        assert_eq!(s.acknowledge_notice().as_deref(), Some("Insufficient funds"));
        assert!(s.acknowledge_notice().is_none());
        assert_eq!(s.snapshot().recent_errors.len(), 1);
    }

    #[test]
    fn recent_errors_are_capped() {
        let (s, _) = session();
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            s.push_error(format!("e{i}"));
        }
        let errors = s.snapshot().recent_errors;
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "e5");
    }

    #[test]
    fn trade_validation() {
        let (s, _) = session();
        assert!(s.trade("BTC", TradeDirection::Buy, 0.0).is_err());
        assert!(s.trade("BTC", TradeDirection::Buy, f64::NAN).is_err());
        assert!(s.trade(" ", TradeDirection::Sell, 5.0).is_err());
        assert_eq!(
            s.trade("eth", TradeDirection::Sell, 5.0).unwrap(),
            OutboundIntent::Trade {
                coin: "ETH".into(),
                direction: TradeDirection::Sell,
                amount: 5.0
            }
        );
        assert!(s.update_speed(-1.0).is_err());
        assert_eq!(s.update_speed(0.2).unwrap(), OutboundIntent::UpdateSpeed { speed: 0.2 });
    }

    #[test]
    fn connectivity_and_version_tracking() {
        let (s, _) = session();
        let v0 = s.current_state_version();
        s.apply(InboundMessage::Connected);
        assert_eq!(s.connection(), ConnectionStatus::Connected);
        s.apply(InboundMessage::Unknown { name: "chat".into() });
        assert_eq!(s.current_state_version(), v0 + 1);
        s.apply(InboundMessage::Disconnected);
        assert_eq!(s.snapshot().connection, ConnectionStatus::Disconnected);
    }
}
