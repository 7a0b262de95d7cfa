//! Socket.IO packet model and text codec.
//!
//! The wire format is
//! `<type>[<# of binary attachments>-][<namespace>,][<ack id>][JSON payload]`.
//! Binary packets carry `{"_placeholder":true,"num":<i>}` markers in their
//! payload; the attachments themselves travel as separate binary frames
//! right after the header frame, in marker order.

use bytes::Bytes;
use serde_json::{json, Value};

use crate::errors::ParseError;

/// One element of a binary packet payload: either plain JSON or a
/// reference to the attachment with the given index.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadElem {
    Json(Value),
    Attachment(usize),
}

/// | Type          | ID  | Usage                                            |
/// |---------------|-----|--------------------------------------------------|
/// | CONNECT       | 0   | Join a namespace.                                |
/// | DISCONNECT    | 1   | Leave a namespace.                               |
/// | EVENT         | 2   | Send data to the other side.                     |
/// | ACK           | 3   | Acknowledge an event.                            |
/// | CONNECT_ERROR | 4   | Namespace join refused.                          |
/// | BINARY_EVENT  | 5   | Send data with binary attachments.               |
/// | BINARY_ACK    | 6   | Acknowledge with binary attachments.             |
#[derive(Debug, Clone, PartialEq)]
pub enum PacketData {
    /// Optional payload: the auth object on the way out, `{"sid":...}` on
    /// the way in.
    Connect(Option<Value>),
    Disconnect,
    /// JSON-array payload `[event, args...]` and optional ack id.
    Event(Vec<Value>, Option<i64>),
    Ack(Vec<Value>, i64),
    ConnectError(Option<Value>),
    /// Payload elements, optional ack id, announced attachment count.
    BinaryEvent(Vec<PayloadElem>, Option<i64>, usize),
    BinaryAck(Vec<PayloadElem>, i64, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// The namespace the packet belongs to.
    pub ns: String,
    pub data: PacketData,
    /// Binary attachments in marker order. Filled by the sender before
    /// encoding, and by the reconstructor after all frames arrived.
    pub attachments: Vec<Bytes>,
}

impl Packet {
    pub fn connect(ns: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            ns: ns.into(),
            data: PacketData::Connect(payload),
            attachments: Vec::new(),
        }
    }

    pub fn disconnect(ns: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            data: PacketData::Disconnect,
            attachments: Vec::new(),
        }
    }

    pub fn event(ns: impl Into<String>, payload: Vec<Value>, ack_id: Option<i64>) -> Self {
        Self {
            ns: ns.into(),
            data: PacketData::Event(payload, ack_id),
            attachments: Vec::new(),
        }
    }

    pub fn ack(ns: impl Into<String>, payload: Vec<Value>, ack_id: i64) -> Self {
        Self {
            ns: ns.into(),
            data: PacketData::Ack(payload, ack_id),
            attachments: Vec::new(),
        }
    }

    pub fn binary_event(
        ns: impl Into<String>,
        payload: Vec<PayloadElem>,
        ack_id: Option<i64>,
        attachments: Vec<Bytes>,
    ) -> Self {
        let n = attachments.len();
        Self {
            ns: ns.into(),
            data: PacketData::BinaryEvent(payload, ack_id, n),
            attachments,
        }
    }

    pub fn binary_ack(
        ns: impl Into<String>,
        payload: Vec<PayloadElem>,
        ack_id: i64,
        attachments: Vec<Bytes>,
    ) -> Self {
        let n = attachments.len();
        Self {
            ns: ns.into(),
            data: PacketData::BinaryAck(payload, ack_id, n),
            attachments,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self.data,
            PacketData::BinaryEvent(..) | PacketData::BinaryAck(..)
        )
    }

    /// Announced attachment count of a binary packet.
    pub fn n_attachments(&self) -> usize {
        match self.data {
            PacketData::BinaryEvent(_, _, n) | PacketData::BinaryAck(_, _, n) => n,
            _ => 0,
        }
    }

    /// The ack id this packet carries, if any.
    pub fn ack_id(&self) -> Option<i64> {
        match self.data {
            PacketData::Event(_, id) | PacketData::BinaryEvent(_, id, _) => id,
            PacketData::Ack(_, id) | PacketData::BinaryAck(_, id, _) => Some(id),
            _ => None,
        }
    }

    fn type_digit(&self) -> char {
        match self.data {
            PacketData::Connect(_) => '0',
            PacketData::Disconnect => '1',
            PacketData::Event(..) => '2',
            PacketData::Ack(..) => '3',
            PacketData::ConnectError(_) => '4',
            PacketData::BinaryEvent(..) => '5',
            PacketData::BinaryAck(..) => '6',
        }
    }

    /// Encode the header frame. Attachments are sent separately by the
    /// caller, in `self.attachments` order.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.type_digit());
        if self.is_binary() {
            out.push_str(&self.n_attachments().to_string());
            out.push('-');
        }
        if self.ns != "/" {
            out.push_str(&self.ns);
            out.push(',');
        }
        match &self.data {
            PacketData::Connect(Some(payload)) | PacketData::ConnectError(Some(payload)) => {
                out.push_str(&payload.to_string());
            }
            PacketData::Connect(None) | PacketData::ConnectError(None) | PacketData::Disconnect => {}
            PacketData::Event(payload, ack_id) => {
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                out.push_str(&Value::Array(payload.clone()).to_string());
            }
            PacketData::Ack(payload, ack_id) => {
                out.push_str(&ack_id.to_string());
                out.push_str(&Value::Array(payload.clone()).to_string());
            }
            PacketData::BinaryEvent(payload, ack_id, _) => {
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                out.push_str(&encode_placeholders(payload).to_string());
            }
            PacketData::BinaryAck(payload, ack_id, _) => {
                out.push_str(&ack_id.to_string());
                out.push_str(&encode_placeholders(payload).to_string());
            }
        }
        out
    }

    /// Decode a header frame. A binary packet comes back with its
    /// announced attachment count and an empty `attachments` vector, to be
    /// completed by the reconstructor.
    pub fn decode(input: &str) -> Result<Self, ParseError> {
        let mut chars = input.char_indices().peekable();
        let (_, type_digit) = chars
            .next()
            .ok_or(ParseError::InvalidPacketType(None))?;

        // attachment count of binary packets
        let mut n_attachments = 0usize;
        if matches!(type_digit, '5' | '6') {
            let mut digits = String::new();
            loop {
                match chars.next() {
                    Some((_, '-')) if !digits.is_empty() => break,
                    Some((_, c)) if c.is_ascii_digit() => digits.push(c),
                    _ => return Err(ParseError::InvalidAttachments),
                }
            }
            n_attachments = digits.parse().map_err(|_| ParseError::InvalidAttachments)?;
        }

        // namespace
        let mut ns = String::from("/");
        if matches!(chars.peek(), Some((_, '/'))) {
            ns.clear();
            for (_, c) in chars.by_ref() {
                if c == ',' {
                    break;
                }
                ns.push(c);
            }
        }

        // ack id
        let mut ack_digits = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            ack_digits.push(c);
            chars.next();
        }
        let ack_id = if ack_digits.is_empty() {
            None
        } else {
            Some(ack_digits.parse().map_err(|_| ParseError::InvalidAckId)?)
        };

        // JSON payload is everything left
        let rest = chars.next().map(|(i, _)| &input[i..]).unwrap_or("");
        let payload: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        let data = match type_digit {
            '0' => PacketData::Connect(payload),
            '1' => PacketData::Disconnect,
            '2' => PacketData::Event(into_array(payload)?, ack_id),
            '3' => PacketData::Ack(into_array(payload)?, ack_id.ok_or(ParseError::InvalidAckId)?),
            '4' => PacketData::ConnectError(payload),
            '5' => PacketData::BinaryEvent(
                decode_placeholders(into_array(payload)?),
                ack_id,
                n_attachments,
            ),
            '6' => PacketData::BinaryAck(
                decode_placeholders(into_array(payload)?),
                ack_id.ok_or(ParseError::InvalidAckId)?,
                n_attachments,
            ),
            c => return Err(ParseError::InvalidPacketType(Some(c))),
        };
        Ok(Packet {
            ns,
            data,
            attachments: Vec::new(),
        })
    }
}

fn into_array(payload: Option<Value>) -> Result<Vec<Value>, ParseError> {
    match payload {
        Some(Value::Array(values)) => Ok(values),
        _ => Err(ParseError::UnexpectedPayload),
    }
}

fn encode_placeholders(payload: &[PayloadElem]) -> Value {
    Value::Array(
        payload
            .iter()
            .map(|elem| match elem {
                PayloadElem::Json(value) => value.clone(),
                PayloadElem::Attachment(i) => json!({ "_placeholder": true, "num": i }),
            })
            .collect(),
    )
}

fn decode_placeholders(payload: Vec<Value>) -> Vec<PayloadElem> {
    payload
        .into_iter()
        .map(|value| {
            let placeholder = value
                .get("_placeholder")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            match value.get("num").and_then(Value::as_u64) {
                Some(num) if placeholder => PayloadElem::Attachment(num as usize),
                _ => PayloadElem::Json(value),
            }
        })
        .collect()
}
