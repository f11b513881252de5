// =============================================================================
// Screen Controller — wires connection, session and terminal together
// =============================================================================
//
// Owns the connection for the lifetime of the screen. One loop applies, in
// arrival order, inbound messages, typed-in commands and leaderboard results;
// the leaderboard fetch is the only work spawned off the loop. Whatever ends
// the loop (quit, stdin EOF, Ctrl+C, server gone) the connection is released
// before `run` returns.
// =============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::command::{Command, HELP};
use crate::leaderboard::LeaderboardClient;
use crate::market_data::csv_replay;
use crate::protocol::{InboundMessage, OutboundIntent};
use crate::render::{leaderboard_lines, portfolio_line, SeriesSink};
use crate::runtime_config::ClientConfig;
use crate::session::{FollowUp, GameSession};
use crate::transport::GameConnection;
use crate::types::LeaderboardEntry;

/// Why the controller loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    InputClosed,
    ServerGone,
    Interrupted,
}

pub struct Controller {
    config: ClientConfig,
    session: Arc<GameSession>,
    leaderboard: LeaderboardClient,
    connection: GameConnection,
    inbound: mpsc::UnboundedReceiver<InboundMessage>,
}

impl Controller {
    /// Connect to the game server and build the screen state.
    pub async fn connect(config: ClientConfig, sink: Arc<dyn SeriesSink>) -> Result<Self> {
        let session = Arc::new(GameSession::new(&config, sink));
        let leaderboard = LeaderboardClient::new(
            config.leaderboard_url.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )?;
        let (connection, inbound) =
            GameConnection::connect(&config.server_url, config.default_symbol.clone()).await?;

        Ok(Self {
            config,
            session,
            leaderboard,
            connection,
            inbound,
        })
    }

    #[cfg(test)]
    pub fn session(&self) -> Arc<GameSession> {
        self.session.clone()
    }

    /// Run until quit, end of input, interrupt, or loss of the server. The
    /// connection is always released before returning.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<String>,
        interrupt: impl std::future::Future<Output = ()>,
    ) -> Result<ExitReason> {
        let (board_tx, mut board_rx) =
            mpsc::unbounded_channel::<(Uuid, Vec<LeaderboardEntry>)>();
        tokio::pin!(interrupt);

        let reason = loop {
            tokio::select! {
                msg = self.inbound.recv() => {
                    let Some(msg) = msg else {
                        break ExitReason::ServerGone;
                    };
                    let follow_up = self.session.apply(msg);
                    self.follow_up(follow_up, &board_tx);
                }

                line = commands.recv() => {
                    let Some(line) = line else {
                        break ExitReason::InputClosed;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(Command::Quit) => break ExitReason::Quit,
                        Ok(cmd) => self.execute(cmd),
                        Err(e) => println!("{e}\n{HELP}"),
                    }
                }

                Some((session, entries)) = board_rx.recv() => {
                    if self.session.apply_leaderboard(session, entries) {
                        println!("── leaderboard ──");
                        for line in leaderboard_lines(&self.session.leaderboard()) {
                            println!("{line}");
                        }
                    }
                }

                _ = &mut interrupt => {
                    warn!("interrupt received — leaving the game");
                    break ExitReason::Interrupted;
                }
            }
        };

        self.session.end_game();
        if let Err(e) = self.connection.disconnect().await {
            warn!(error = %e, "connection did not close cleanly");
        }
        info!(?reason, "screen closed");
        Ok(reason)
    }

    fn follow_up(&self, follow_up: FollowUp, board_tx: &mpsc::UnboundedSender<(Uuid, Vec<LeaderboardEntry>)>) {
        match follow_up {
            FollowUp::None => {}
            FollowUp::CatalogReady(available) => {
                if self.config.auto_start {
                    let coins = pick_coins(&self.config.coins, &available);
                    self.start(coins);
                } else {
                    println!("available: {}  (type `start` to play)", available.join(", "));
                }
            }
            FollowUp::FetchLeaderboard(session) => {
                if let Some(result) = self.session.snapshot().game_over {
                    println!("game over — final score {:?}", result.final_score());
                }
                let client = self.leaderboard.clone();
                let tx = board_tx.clone();
                tokio::spawn(async move {
                    let entries = client.fetch_or_empty().await;
                    let _ = tx.send((session, entries));
                });
            }
        }
    }

    fn execute(&self, cmd: Command) {
        if let Some(notice) = self.session.pending_notice() {
            if !matches!(cmd, Command::Ack | Command::Help | Command::Status) {
                println!("! {notice}  (type `ack` to dismiss)");
                return;
            }
        }

        match cmd {
            Command::Trade {
                coin,
                direction,
                amount,
            } => match self.session.trade(&coin, direction, amount) {
                Ok(intent) => self.send(intent),
                Err(e) => println!("{e}"),
            },
            Command::Speed(secs) => match self.session.update_speed(secs) {
                Ok(intent) => self.send(intent),
                Err(e) => println!("{e}"),
            },
            Command::Start(requested) => {
                let available = self.session.available_coins();
                self.start(pick_coins(&requested, &available));
            }
            Command::Coins => println!("{}", self.session.available_coins().join(", ")),
            Command::Status => self.print_status(),
            Command::Leaderboard => {
                for line in leaderboard_lines(&self.session.leaderboard()) {
                    println!("{line}");
                }
            }
            Command::Ack => {
                if self.session.acknowledge_notice().is_none() {
                    println!("nothing to acknowledge");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    fn start(&self, coins: Vec<String>) {
        if self.config.select_before_start && !coins.is_empty() {
            self.send(OutboundIntent::SelectCoins {
                coins: coins.clone(),
            });
        }
        match self
            .session
            .begin_game(&self.config.nickname, coins, self.config.speed)
        {
            Ok((_, intent)) => self.send(intent),
            Err(e) => println!("cannot start: {e}"),
        }
    }

    fn send(&self, intent: OutboundIntent) {
        if let Err(e) = self.connection.send(intent) {
            warn!(error = %e, "intent not sent");
            println!("not connected");
        }
    }

    fn print_status(&self) {
        let snap = self.session.snapshot();
        println!(
            "connection: {}{}",
            snap.connection,
            if self.connection.is_open() { "" } else { " (closed)" }
        );
        println!(
            "game: {}",
            if self.session.is_playing() {
                "running"
            } else if snap.game_finished {
                "over"
            } else {
                "not started"
            }
        );
        if let Some(p) = &snap.portfolio {
            println!("{}", portfolio_line(p, self.session.starting_cash()));
        }
        let mut symbols: Vec<_> = snap.last_candles.iter().collect();
        symbols.sort_by(|a, b| a.0.cmp(b.0));
        for (symbol, c) in symbols {
            println!(
                "{symbol}: {} bars, last close {:.4} @ {}",
                snap.series_lengths.get(symbol).copied().unwrap_or(0),
                c.close,
                c.time
            );
        }
        if let Some(notice) = snap.notice {
            println!("! {notice}");
        }
    }
}

/// Configured symbols that the server offers; everything offered when none
/// are configured or none of them is available.
pub fn pick_coins(wanted: &[String], available: &[String]) -> Vec<String> {
    let chosen: Vec<String> = wanted
        .iter()
        .filter(|w| available.iter().any(|a| a.eq_ignore_ascii_case(w)))
        .map(|w| w.to_uppercase())
        .collect();
    if chosen.is_empty() {
        available.to_vec()
    } else {
        chosen
    }
}

/// Offline mode: feed a CSV through bulk ingestion and publish the series.
/// Returns the number of candles kept.
pub fn replay_csv(path: &Path, config: &ClientConfig, sink: Arc<dyn SeriesSink>) -> Result<usize> {
    let candles = csv_replay::read_raw_candles(path)?;
    let session = GameSession::new(config, sink);
    session.apply(InboundMessage::History {
        symbol: config.default_symbol.clone(),
        candles,
    });
    let kept = session.series(&config.default_symbol).len();
    info!(symbol = %config.default_symbol, kept, "replay finished");
    Ok(kept)
}

/// Forward stdin lines onto a channel until EOF.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await.context("failed to read stdin") {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    break;
                }
            }
        }
    });
    rx
}

// =============================================================================
// Tests
// =============================================================================
