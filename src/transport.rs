// =============================================================================
// Game Connection — owned Socket.IO-over-WebSocket handle
// =============================================================================
//
// One connection per game screen. `GameConnection::connect` opens the socket
// and spawns a single I/O task that multiplexes, via `tokio::select!`:
//   1. frames from the server (handshake, heartbeat, events),
//   2. outbound intents queued through `send`,
//   3. the local shutdown signal,
//   4. the heartbeat deadline (server pings must keep arriving).
//
// Decoded events reach the caller serially on an unbounded channel. Intents
// queued before the namespace handshake completes are held and flushed once
// the server acknowledges the connect.
//
// `disconnect` leaves the namespace, closes the socket and waits for the task.
// Dropping the handle aborts the task. Either way the inbound channel closes
// and no further events are delivered.
// =============================================================================

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::protocol::packet;
use crate::protocol::{decode_event, EnginePacket, InboundMessage, OutboundIntent, SocketPacket};

/// How long `disconnect` waits for the I/O task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the Engine.IO WebSocket URL from the server base URL.
pub fn socket_url(server_url: &str) -> Result<String> {
    let base = server_url.trim().trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        bail!("unsupported server URL scheme: {server_url}");
    };
    Ok(format!("{ws_base}/socket.io/?EIO=4&transport=websocket"))
}

/// Owned handle to the game server connection.
pub struct GameConnection {
    outbound: mpsc::UnboundedSender<OutboundIntent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl GameConnection {
    /// Connect to `server_url` and start the I/O task. Pushes that carry no
    /// symbol are attributed to `default_symbol`.
    pub async fn connect(
        server_url: &str,
        default_symbol: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundMessage>)> {
        let url = socket_url(server_url)?;
        info!(url = %url, "connecting to game server");

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect to {url}"))?;

        info!("game server WebSocket connected");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let io = IoTask {
            default_symbol: default_symbol.into(),
            inbound: inbound_tx,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(io.run(ws_stream));

        Ok((
            Self {
                outbound: outbound_tx,
                shutdown: Some(shutdown_tx),
                task: Some(task),
            },
            inbound_rx,
        ))
    }

    /// Queue an intent for the server.
    pub fn send(&self, intent: OutboundIntent) -> Result<()> {
        debug!(event = intent.event_name(), "queueing outbound intent");
        self.outbound
            .send(intent)
            .map_err(|_| anyhow::anyhow!("game connection is closed"))
    }

    /// Whether the I/O task is still running.
    pub fn is_open(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Leave the game namespace, close the socket and wait for the I/O task.
    pub async fn disconnect(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(joined) => {
                info!("game connection released");
                joined.context("connection task panicked")?
            }
            Err(_) => {
                warn!("connection task did not stop in time — aborting");
                task.abort();
                Ok(())
            }
        }
    }
}

impl Drop for GameConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// I/O task
// =============================================================================

struct IoTask {
    default_symbol: String,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    outbound: mpsc::UnboundedReceiver<OutboundIntent>,
    shutdown: oneshot::Receiver<()>,
}

/// What the read side asks the loop to do next.
enum Flow {
    Continue,
    Stop,
}

impl IoTask {
    async fn run<S>(mut self, ws_stream: S) -> Result<()>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();

        let mut joined = false;
        let mut pending: Vec<OutboundIntent> = Vec::new();
        // Armed once the handshake tells us the heartbeat period.
        let mut heartbeat: Option<(Duration, Instant)> = None;

        let result: Result<()> = loop {
            let deadline = heartbeat.map(|(_, at)| at);

            tokio::select! {
                // ── Local shutdown (explicit or handle dropped) ────────────
                _ = &mut self.shutdown => {
                    debug!("shutdown requested — leaving namespace");
                    let _ = write.send(text(&packet::disconnect())).await;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                // ── Outbound intents ───────────────────────────────────────
                intent = self.outbound.recv() => {
                    let Some(intent) = intent else {
                        return Ok(());
                    };
                    if !joined {
                        debug!(event = intent.event_name(), "holding intent until namespace joined");
                        pending.push(intent);
                        continue;
                    }
                    if let Err(e) = write.send(text(&intent.to_packet())).await {
                        break Err(anyhow::Error::new(e).context("failed to send intent"));
                    }
                }

                // ── Heartbeat deadline ─────────────────────────────────────
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    warn!("no ping from game server within the heartbeat window");
                    break Err(anyhow::anyhow!("heartbeat timeout"));
                }

                // ── Frames from the server ─────────────────────────────────
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(frame))) => {
                            let decoded = match packet::decode(&frame) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, frame = %frame, "skipping malformed frame");
                                    continue;
                                }
                            };
                            let mut replies: Vec<EnginePacket> = Vec::new();
                            let flow = self.handle_packet(
                                decoded,
                                &mut joined,
                                &mut heartbeat,
                                &mut replies,
                            );
                            if joined && !pending.is_empty() {
                                replies.extend(pending.drain(..).map(|i| i.to_packet()));
                            }
                            for reply in &replies {
                                if let Err(e) = write.send(text(reply)).await {
                                    error!(error = %e, "failed to write to game server");
                                    break;
                                }
                            }
                            if matches!(flow, Flow::Stop) {
                                break Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("game server closed the WebSocket");
                            break Ok(());
                        }
                        Some(Ok(_)) => {
                            // Ping / Pong / Binary frames -- tungstenite answers pings itself.
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "game server WebSocket read error");
                            break Err(e.into());
                        }
                        None => {
                            warn!("game server WebSocket stream ended");
                            break Ok(());
                        }
                    }
                }
            }
        };

        let _ = self.inbound.send(InboundMessage::Disconnected);
        result
    }

    /// React to one decoded packet. Frames to write back are pushed to
    /// `replies`; decoded events go to the inbound channel.
    fn handle_packet(
        &self,
        packet: EnginePacket,
        joined: &mut bool,
        heartbeat: &mut Option<(Duration, Instant)>,
        replies: &mut Vec<EnginePacket>,
    ) -> Flow {
        match packet {
            EnginePacket::Open(handshake) => {
                info!(
                    sid = %handshake.sid,
                    ping_interval_ms = handshake.ping_interval,
                    upgrades = ?handshake.upgrades,
                    "engine.io handshake"
                );
                let window =
                    Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
                if !window.is_zero() {
                    *heartbeat = Some((window, Instant::now() + window));
                }
                replies.push(packet::connect());
                Flow::Continue
            }
            EnginePacket::Ping(payload) => {
                if let Some((window, at)) = heartbeat.as_mut() {
                    *at = Instant::now() + *window;
                }
                replies.push(EnginePacket::Pong(payload));
                Flow::Continue
            }
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Flow::Continue,
            EnginePacket::Close => {
                info!("game server sent engine.io close");
                Flow::Stop
            }
            EnginePacket::Message(SocketPacket::Connect { .. }) => {
                *joined = true;
                self.deliver(InboundMessage::Connected)
            }
            EnginePacket::Message(SocketPacket::Disconnect { namespace }) => {
                info!(namespace = %namespace, "game server left the namespace");
                Flow::Stop
            }
            EnginePacket::Message(SocketPacket::ConnectError { payload, .. }) => {
                warn!(payload = %payload, "game server refused the connection");
                let reason = payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| payload.to_string());
                let _ = self.deliver(InboundMessage::Error(reason));
                Flow::Stop
            }
            EnginePacket::Message(SocketPacket::Ack { id, .. }) => {
                debug!(id, "ack received");
                Flow::Continue
            }
            EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                match decode_event(&name, &args, &self.default_symbol) {
                    Some(msg) => self.deliver(msg),
                    None => Flow::Continue,
                }
            }
        }
    }

    fn deliver(&self, msg: InboundMessage) -> Flow {
        if self.inbound.send(msg).is_err() {
            debug!("inbound receiver dropped — stopping");
            return Flow::Stop;
        }
        Flow::Continue
    }
}

fn text(packet: &EnginePacket) -> Message {
    Message::Text(packet::encode(packet))
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

// =============================================================================
// Tests
// =============================================================================
