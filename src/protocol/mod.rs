pub mod messages;
pub mod packet;

pub use messages::{decode_event, InboundMessage, OutboundIntent};
pub use packet::{EnginePacket, SocketPacket};
