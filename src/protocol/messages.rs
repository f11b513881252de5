// =============================================================================
// Typed game messages — decoded at the transport boundary
// =============================================================================
//
// Inbound events from the game server become one closed enum so that the
// session controller dispatches with an exhaustive `match`. Outbound intents
// are likewise a closed enum encoded to `42["name",{...}]` frames.
//
// Payload shapes differ between server generations:
//   history  {coin, data:[...]}   or a bare [...]
//   candle   {coin, candle:{..}}  or a bare {...}
//   error    {msg:"..."}          or a bare "..."
// Pushes without a symbol are attributed to the caller-supplied default.
// =============================================================================

use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::market_data::RawCandle;
use crate::types::{GameResult, PortfolioSnapshot, TradeDirection};

use super::packet::{self, EnginePacket};

/// Everything the game server can tell us, plus transport connectivity.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Connected,
    Disconnected,
    AvailableCoins(Vec<String>),
    History {
        symbol: String,
        candles: Vec<RawCandle>,
    },
    Candle {
        symbol: String,
        candle: RawCandle,
    },
    Portfolio(PortfolioSnapshot),
    GameOver(Option<GameResult>),
    Error(String),
    /// An event name this client does not know. Logged and ignored.
    Unknown {
        name: String,
    },
}

/// Everything the client can ask the server to do.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundIntent {
    StartGame {
        nickname: String,
        coins: Vec<String>,
        speed: f64,
    },
    /// Earlier protocol variant: pick symbols without starting.
    SelectCoins { coins: Vec<String> },
    Trade {
        coin: String,
        direction: TradeDirection,
        amount: f64,
    },
    UpdateSpeed { speed: f64 },
}

#[derive(Serialize)]
struct TradePayload<'a> {
    coin: &'a str,
    action: TradeDirection,
    amount: f64,
}

impl OutboundIntent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StartGame { .. } => "start_game",
            Self::SelectCoins { .. } => "select_coins",
            Self::Trade { .. } => "trade",
            Self::UpdateSpeed { .. } => "update_speed",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::StartGame {
                nickname,
                coins,
                speed,
            } => json!({ "username": nickname, "coins": coins, "speed": speed }),
            Self::SelectCoins { coins } => json!({ "coins": coins }),
            Self::Trade {
                coin,
                direction,
                amount,
            } => serde_json::to_value(TradePayload {
                coin,
                action: *direction,
                amount: *amount,
            })
            .unwrap_or(Value::Null),
            Self::UpdateSpeed { speed } => json!({ "speed": speed }),
        }
    }

    /// The Engine.IO frame carrying this intent.
    pub fn to_packet(&self) -> EnginePacket {
        packet::event(self.event_name(), self.payload())
    }
}

// ---------------------------------------------------------------------------
// Inbound decoding
// ---------------------------------------------------------------------------

/// Turn a Socket.IO event into a typed message. Payloads that do not have
/// the expected shape yield `None` after a warning.
pub fn decode_event(name: &str, args: &[Value], default_symbol: &str) -> Option<InboundMessage> {
    let first = args.first().cloned().unwrap_or(Value::Null);

    let msg = match name {
        "available_coins" => InboundMessage::AvailableCoins(decode_symbols(&first)?),
        "history" => {
            let (symbol, batch) = split_symbol(first, &["data", "candles", "history"]);
            let candles = match batch {
                Value::Array(items) => items.into_iter().map(RawCandle).collect(),
                other => {
                    warn!(payload = %other, "history push is not an array");
                    return None;
                }
            };
            InboundMessage::History {
                symbol: symbol.unwrap_or_else(|| default_symbol.to_string()),
                candles,
            }
        }
        "candle" => {
            let (symbol, candle) = split_symbol(first, &["candle", "data"]);
            InboundMessage::Candle {
                symbol: symbol.unwrap_or_else(|| default_symbol.to_string()),
                candle: RawCandle(candle),
            }
        }
        "portfolio_state" => match serde_json::from_value::<PortfolioSnapshot>(first) {
            Ok(p) => InboundMessage::Portfolio(p),
            Err(e) => {
                warn!(error = %e, "portfolio_state payload has unexpected shape");
                return None;
            }
        },
        "game_over" => match first {
            Value::Null => InboundMessage::GameOver(None),
            other => match serde_json::from_value::<GameResult>(other) {
                Ok(r) => InboundMessage::GameOver(Some(r)),
                Err(e) => {
                    warn!(error = %e, "game_over payload has unexpected shape");
                    InboundMessage::GameOver(None)
                }
            },
        },
        "error" => InboundMessage::Error(error_text(&first)),
        other => InboundMessage::Unknown {
            name: other.to_string(),
        },
    };
    Some(msg)
}

fn decode_symbols(v: &Value) -> Option<Vec<String>> {
    let items = match v {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("coins") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!(payload = %v, "available_coins push has no coin list");
                return None;
            }
        },
        _ => {
            warn!(payload = %v, "available_coins push is not a list");
            return None;
        }
    };
    Some(
        items
            .iter()
            .filter_map(|s| s.as_str())
            .map(str::to_string)
            .collect(),
    )
}

/// `{coin|symbol, <body key>: ...}` -> (symbol, body). Anything else is a
/// bare body.
fn split_symbol(v: Value, body_keys: &[&str]) -> (Option<String>, Value) {
    let mut obj = match v {
        Value::Object(obj) => obj,
        other => return (None, other),
    };
    let symbol = ["coin", "symbol"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string));
    if symbol.is_none() {
        return (None, Value::Object(obj));
    }
    for key in body_keys {
        if let Some(body) = obj.remove(*key) {
            return (symbol, body);
        }
    }
    // Symbol tag sitting directly on a candle object.
    (symbol, Value::Object(obj))
}

fn error_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(obj) => ["msg", "message", "error"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| v.to_string()),
        Value::Null => "unknown server error".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::encode;

    fn decode_one(name: &str, payload: Value) -> InboundMessage {
        decode_event(name, &[payload], "BTC").expect("decodes")
    }

    #[test]
    fn available_coins_list() {
        assert_eq!(
            decode_one("available_coins", json!(["BTC", "ETH", 3])),
            InboundMessage::AvailableCoins(vec!["BTC".into(), "ETH".into()])
        );
        assert!(decode_event("available_coins", &[json!(42)], "BTC").is_none());
    }

    #[test]
    fn history_with_symbol() {
        let msg = decode_one("history", json!({ "coin": "ETH", "data": [{ "time": 1 }, { "time": 2 }] }));
        match msg {
            InboundMessage::History { symbol, candles } => {
                assert_eq!(symbol, "ETH");
                assert_eq!(candles.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_history_uses_default_symbol() {
        let msg = decode_one("history", json!([{ "time": 1 }]));
        assert!(matches!(msg, InboundMessage::History { ref symbol, .. } if symbol == "BTC"));
        assert!(decode_event("history", &[json!("nope")], "BTC").is_none());
    }

    #[test]
    fn candle_shapes() {
        let tagged = decode_one("candle", json!({ "coin": "SOL", "candle": { "time": 5, "close": 1 } }));
        assert_eq!(
            tagged,
            InboundMessage::Candle {
                symbol: "SOL".into(),
                candle: RawCandle(json!({ "time": 5, "close": 1 })),
            }
        );

        let bare = decode_one("candle", json!({ "time": 5, "close": 1 }));
        assert_eq!(
            bare,
            InboundMessage::Candle {
                symbol: "BTC".into(),
                candle: RawCandle(json!({ "time": 5, "close": 1 })),
            }
        );

        let inline = decode_one("candle", json!({ "symbol": "XRP", "time": 5, "close": 1 }));
        assert!(matches!(inline, InboundMessage::Candle { ref symbol, .. } if symbol == "XRP"));
    }

    #[test]
    fn error_shapes() {
        assert_eq!(
            decode_one("error", json!({ "msg": "Insufficient funds" })),
            InboundMessage::Error("Insufficient funds".into())
        );
        assert_eq!(decode_one("error", json!("boom")), InboundMessage::Error("boom".into()));
        assert_eq!(
            decode_event("error", &[], "BTC").unwrap(),
            InboundMessage::Error("unknown server error".into())
        );
    }

    #[test]
    fn game_over_with_and_without_result() {
        assert_eq!(decode_event("game_over", &[], "BTC").unwrap(), InboundMessage::GameOver(None));
        match decode_one("game_over", json!({ "score": 12345.5, "username": "Tester" })) {
            InboundMessage::GameOver(Some(r)) => {
                assert_eq!(r.score, Some(12345.5));
                assert_eq!(r.extra["username"], json!("Tester"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match decode_one("game_over", json!({ "score": 12000.0, "total_value": 11000.0 })) {
            InboundMessage::GameOver(Some(r)) => assert_eq!(r.final_score(), Some(12000.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn portfolio_state_decodes() {
        let msg = decode_one(
            "portfolio_state",
            json!({ "cash": 0.0, "total_value": 10000.0, "coins": { "BTC": { "amount": 0.2, "value": 10000.0 } } }),
        );
        match msg {
            InboundMessage::Portfolio(p) => assert_eq!(p.coins["BTC"].amount, 0.2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_reported() {
        assert_eq!(
            decode_one("chat", json!("hi")),
            InboundMessage::Unknown { name: "chat".into() }
        );
    }

    #[test]
    fn outbound_frames() {
        let trade = OutboundIntent::Trade {
            coin: "BTC".into(),
            direction: TradeDirection::Buy,
            amount: 10000.0,
        };
        assert_eq!(
            encode(&trade.to_packet()),
            r#"42["trade",{"action":"BUY","amount":10000.0,"coin":"BTC"}]"#
        );

        let start = OutboundIntent::StartGame {
            nickname: "Tester".into(),
            coins: vec!["BTC".into(), "ETH".into()],
            speed: 0.1,
        };
        assert_eq!(start.event_name(), "start_game");
        assert_eq!(
            start.payload(),
            json!({ "username": "Tester", "coins": ["BTC", "ETH"], "speed": 0.1 })
        );

        let select = OutboundIntent::SelectCoins { coins: vec!["ETH".into()] };
        assert_eq!(encode(&select.to_packet()), r#"42["select_coins",{"coins":["ETH"]}]"#);

        let speed = OutboundIntent::UpdateSpeed { speed: 0.25 };
        assert_eq!(encode(&speed.to_packet()), r#"42["update_speed",{"speed":0.25}]"#);
    }
}
