use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A single Engine.IO v4 packet.
///
/// Textual packets serialize to a type digit followed by their payload.
/// [`Packet::Binary`] is carried as a raw binary frame over websocket and as
/// a `b`-prefixed base64 string over polling.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Handshake packet sent by the server as the first packet of a session.
    Open(OpenPacket),
    /// Session close request.
    Close,
    /// Heartbeat probe. The payload is only used during the upgrade dance
    /// where the client sends `2probe` on the candidate transport.
    Ping(Option<String>),
    /// Heartbeat answer, `3probe` during the upgrade dance.
    Pong(Option<String>),
    /// Application message. Socket.IO frames ride in here.
    Message(String),
    /// Sent by the client to complete a transport upgrade.
    Upgrade,
    /// Sent by the server to gracefully close a pending polling request.
    Noop,
    /// Binary application message.
    Binary(Bytes),
}

/// Buffered packets handed to a transport as one batch.
///
/// The stack size covers the common case of a Socket.IO frame plus one
/// binary attachment without allocating.
pub type PacketBuf = SmallVec<[Packet; 2]>;

/// An error that occurs when parsing a packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketParseError {
    /// The leading packet type character is unknown or missing.
    #[error("invalid packet type: {0:?}")]
    InvalidPacketType(Option<char>),
    /// The open packet JSON body could not be deserialized.
    #[error("invalid open packet: {0}")]
    InvalidOpenPacket(#[from] serde_json::Error),
    /// A `b`-prefixed polling frame carried invalid base64.
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl Packet {
    /// Whether the packet must be carried as a binary websocket frame.
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
    }

    pub(crate) fn type_char(&self) -> char {
        match self {
            Packet::Open(_) => '0',
            Packet::Close => '1',
            Packet::Ping(_) => '2',
            Packet::Pong(_) => '3',
            Packet::Message(_) => '4',
            Packet::Upgrade => '5',
            Packet::Noop => '6',
            Packet::Binary(_) => 'b',
        }
    }
}

/// Serialize a [`Packet`] to its polling representation. Binary packets
/// become `b`-prefixed base64, everything else is the plain text form also
/// used for websocket text frames.
impl From<&Packet> for String {
    fn from(packet: &Packet) -> String {
        let mut buffer = String::with_capacity(16);
        buffer.push(packet.type_char());
        match packet {
            Packet::Open(open) => {
                // OpenPacket is a plain data struct, serialization cannot fail
                buffer.push_str(&serde_json::to_string(open).unwrap());
            }
            Packet::Ping(Some(payload)) | Packet::Pong(Some(payload)) => {
                buffer.push_str(payload);
            }
            Packet::Message(msg) => buffer.push_str(msg),
            Packet::Binary(data) => {
                general_purpose::STANDARD.encode_string(data, &mut buffer);
            }
            _ => {}
        }
        buffer
    }
}

/// Deserialize a [`Packet`] from its text representation.
impl TryFrom<&str> for Packet {
    type Error = PacketParseError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let packet_type = value
            .as_bytes()
            .first()
            .ok_or(PacketParseError::InvalidPacketType(None))?;
        let rest = &value[1..];
        let payload = || (!rest.is_empty()).then(|| rest.to_owned());
        let res = match packet_type {
            b'0' => Packet::Open(serde_json::from_str(rest)?),
            b'1' => Packet::Close,
            b'2' => Packet::Ping(payload()),
            b'3' => Packet::Pong(payload()),
            b'4' => Packet::Message(rest.to_owned()),
            b'5' => Packet::Upgrade,
            b'6' => Packet::Noop,
            b'b' => Packet::Binary(general_purpose::STANDARD.decode(rest)?.into()),
            c => Err(PacketParseError::InvalidPacketType(Some(*c as char)))?,
        };
        Ok(res)
    }
}

/// The handshake data sent by the server in the `Open` packet.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    /// The session id, echoed back as the `sid` query parameter.
    pub sid: String,
    /// Transport names the server is willing to upgrade to.
    pub upgrades: Vec<String>,
    /// Server heartbeat interval in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed heartbeat in milliseconds.
    pub ping_timeout: u64,
    /// Maximum number of bytes per polling payload.
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

fn default_max_payload() -> u64 {
    1e6 as u64
}
