// =============================================================================
// Wire Codec — Engine.IO v4 / Socket.IO v5 text frames
// =============================================================================
//
// Every WebSocket text frame is one Engine.IO packet: a single type digit
// followed by its payload.
//
//   0{"sid":..,"pingInterval":..,"pingTimeout":..}   open handshake
//   1                                                  close
//   2 / 3                                              ping / pong
//   4<socket.io packet>                                message
//   5 / 6                                              upgrade / noop
//
// A Socket.IO packet is a type digit, an optional `/namespace,`, an optional
// numeric ack id, then a JSON payload:
//
//   40                       connect (default namespace)
//   42["candle",{...}]       event
//   42/admin,7["x",1]        event in namespace /admin with ack id 7
//
// Binary attachments (types 5 and 6) are not used by the game server and are
// reported as unsupported.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Open-handshake payload sent by the server as the first frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// Transport-level packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        payload: Value,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketType(char),
    #[error("binary socket.io packets are not supported")]
    BinaryUnsupported,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("event payload must be a non-empty array starting with the event name")]
    InvalidEvent,
    #[error("ack packet without an id")]
    MissingAckId,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one text frame.
pub fn decode(frame: &str) -> Result<EnginePacket, PacketError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(EnginePacket::Open)
            .map_err(|e| PacketError::InvalidJson(e.to_string())),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(PacketError::UnknownEngineType(other)),
    }
}

fn decode_socket(body: &str) -> Result<SocketPacket, PacketError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let mut rest = chars.as_str();

    if matches!(kind, '5' | '6') {
        return Err(PacketError::BinaryUnsupported);
    }

    let namespace = if rest.starts_with('/') {
        let (ns, tail) = match rest.find(',') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        rest = tail;
        ns.to_string()
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let json = &rest[digits..];

    let payload = if json.trim().is_empty() {
        None
    } else {
        Some(
            serde_json::from_str::<Value>(json)
                .map_err(|e| PacketError::InvalidJson(e.to_string()))?,
        )
    };

    match kind {
        '0' => Ok(SocketPacket::Connect { namespace, payload }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let mut items = match payload {
                Some(Value::Array(items)) if !items.is_empty() => items,
                _ => return Err(PacketError::InvalidEvent),
            };
            let name = match items.remove(0) {
                Value::String(s) => s,
                _ => return Err(PacketError::InvalidEvent),
            };
            Ok(SocketPacket::Event {
                namespace,
                id,
                name,
                args: items,
            })
        }
        '3' => {
            let id = id.ok_or(PacketError::MissingAckId)?;
            let args = match payload {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            Ok(SocketPacket::Ack { namespace, id, args })
        }
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            payload: payload.unwrap_or(Value::Null),
        }),
        other => Err(PacketError::UnknownSocketType(other)),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a packet as a text frame.
pub fn encode(packet: &EnginePacket) -> String {
    match packet {
        EnginePacket::Open(h) => {
            format!("0{}", serde_json::to_string(h).unwrap_or_else(|_| "{}".into()))
        }
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping(p) => format!("2{p}"),
        EnginePacket::Pong(p) => format!("3{p}"),
        EnginePacket::Message(m) => format!("4{}", encode_socket(m)),
        EnginePacket::Upgrade => "5".to_string(),
        EnginePacket::Noop => "6".to_string(),
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE || namespace.is_empty() {
        String::new()
    } else {
        format!("{namespace},")
    }
}

fn encode_socket(packet: &SocketPacket) -> String {
    match packet {
        SocketPacket::Connect { namespace, payload } => {
            let body = payload.as_ref().map(Value::to_string).unwrap_or_default();
            format!("0{}{body}", namespace_prefix(namespace))
        }
        SocketPacket::Disconnect { namespace } => format!("1{}", namespace_prefix(namespace)),
        SocketPacket::Event {
            namespace,
            id,
            name,
            args,
        } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            let id = id.map(|i| i.to_string()).unwrap_or_default();
            format!("2{}{id}{}", namespace_prefix(namespace), Value::Array(items))
        }
        SocketPacket::Ack { namespace, id, args } => {
            format!("3{}{id}{}", namespace_prefix(namespace), Value::Array(args.clone()))
        }
        SocketPacket::ConnectError { namespace, payload } => {
            format!("4{}{payload}", namespace_prefix(namespace))
        }
    }
}

/// `42["name",payload]` on the default namespace.
pub fn event(name: &str, payload: Value) -> EnginePacket {
    EnginePacket::Message(SocketPacket::Event {
        namespace: DEFAULT_NAMESPACE.to_string(),
        id: None,
        name: name.to_string(),
        args: vec![payload],
    })
}

/// `40` — join the default namespace.
pub fn connect() -> EnginePacket {
    EnginePacket::Message(SocketPacket::Connect {
        namespace: DEFAULT_NAMESPACE.to_string(),
        payload: None,
    })
}

/// `41` — leave the default namespace.
pub fn disconnect() -> EnginePacket {
    EnginePacket::Message(SocketPacket::Disconnect {
        namespace: DEFAULT_NAMESPACE.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_open_handshake() {
        let p = decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#)
            .unwrap();
        match p {
            EnginePacket::Open(h) => {
                assert_eq!(h.sid, "abc");
                assert_eq!(h.ping_interval, 25000);
                assert_eq!(h.ping_timeout, 20000);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decode_control_packets() {
        assert_eq!(decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(decode("3probe").unwrap(), EnginePacket::Pong("probe".into()));
        assert_eq!(decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(decode("6").unwrap(), EnginePacket::Noop);
        assert_eq!(decode("").unwrap_err(), PacketError::Empty);
        assert_eq!(decode("9").unwrap_err(), PacketError::UnknownEngineType('9'));
    }

    #[test]
    fn decode_connect_with_sid() {
        let p = decode(r#"40{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            p,
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/".into(),
                payload: Some(json!({ "sid": "xyz" })),
            })
        );
    }

    #[test]
    fn decode_event_default_namespace() {
        let p = decode(r#"42["candle",{"time":1000,"close":10}]"#).unwrap();
        match p {
            EnginePacket::Message(SocketPacket::Event { namespace, id, name, args }) => {
                assert_eq!(namespace, "/");
                assert_eq!(id, None);
                assert_eq!(name, "candle");
                assert_eq!(args, vec![json!({ "time": 1000, "close": 10 })]);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decode_event_with_namespace_and_ack_id() {
        let p = decode(r#"42/game,17["history",[]]"#).unwrap();
        match p {
            EnginePacket::Message(SocketPacket::Event { namespace, id, name, .. }) => {
                assert_eq!(namespace, "/game");
                assert_eq!(id, Some(17));
                assert_eq!(name, "history");
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_bad_events() {
        assert_eq!(decode("42{}").unwrap_err(), PacketError::InvalidEvent);
        assert_eq!(decode("42[1,2]").unwrap_err(), PacketError::InvalidEvent);
        assert!(matches!(decode("42[oops").unwrap_err(), PacketError::InvalidJson(_)));
        assert_eq!(decode("451-[\"x\"]").unwrap_err(), PacketError::BinaryUnsupported);
        assert_eq!(decode("43[1]").unwrap_err(), PacketError::MissingAckId);
    }

    #[test]
    fn decode_connect_error() {
        let p = decode(r#"44{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            p,
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/".into(),
                payload: json!({ "message": "Not authorized" }),
            })
        );
    }

    #[test]
    fn encode_client_frames() {
        assert_eq!(encode(&connect()), "40");
        assert_eq!(encode(&disconnect()), "41");
        assert_eq!(encode(&EnginePacket::Pong(String::new())), "3");
        assert_eq!(
            encode(&event("update_speed", json!({ "speed": 0.5 }))),
            r#"42["update_speed",{"speed":0.5}]"#
        );
    }

    #[test]
    fn encode_namespaced_ack() {
        let p = EnginePacket::Message(SocketPacket::Ack {
            namespace: "/game".into(),
            id: 3,
            args: vec![json!(true)],
        });
        assert_eq!(encode(&p), "43/game,3[true]");
    }
}
