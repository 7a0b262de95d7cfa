//! Reassembly of binary packets.
//!
//! A `BinaryEvent` or `BinaryAck` header frame announces how many binary
//! attachments follow. The reconstructor collects them in receipt order
//! and, once the count is reached, resolves every attachment marker in the
//! header payload to its buffer.

use bytes::Bytes;
use serde_json::Value;

use crate::errors::ParseError;
use crate::packet::{Packet, PacketData, PayloadElem};

/// The payload of a fully reassembled binary packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstructed {
    /// Whether the header was a `BinaryAck`.
    pub is_ack: bool,
    pub ack_id: Option<i64>,
    pub ns: String,
    /// Header payload with every attachment marker resolved, in header
    /// order.
    pub payload: Vec<ReconstructedElem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructedElem {
    Json(Value),
    Binary(Bytes),
}

/// Ephemeral state between a binary header frame and its last attachment.
#[derive(Debug)]
pub struct BinaryReconstructor {
    packet: Packet,
    buffers: Vec<Bytes>,
}

impl BinaryReconstructor {
    /// Seed with the header packet. The header must be a binary packet.
    pub fn new(packet: Packet) -> Self {
        debug_assert!(packet.is_binary());
        Self {
            packet,
            buffers: Vec::new(),
        }
    }

    /// Number of attachments the header announced.
    pub fn expected(&self) -> usize {
        self.packet.n_attachments()
    }

    /// Feed one attachment frame. Returns the reassembled payload once the
    /// announced count is reached, `Ok(None)` while more frames are due.
    pub fn add(&mut self, buffer: Bytes) -> Result<Option<Reconstructed>, ParseError> {
        self.buffers.push(buffer);
        if self.buffers.len() < self.expected() {
            return Ok(None);
        }

        let (elems, ack_id, is_ack) = match &self.packet.data {
            PacketData::BinaryEvent(elems, ack_id, _) => (elems, *ack_id, false),
            PacketData::BinaryAck(elems, ack_id, _) => (elems, Some(*ack_id), true),
            _ => return Err(ParseError::UnexpectedPayload),
        };
        let payload = elems
            .iter()
            .map(|elem| match elem {
                PayloadElem::Json(value) => Ok(ReconstructedElem::Json(value.clone())),
                PayloadElem::Attachment(i) => self
                    .buffers
                    .get(*i)
                    .cloned()
                    .map(ReconstructedElem::Binary)
                    .ok_or(ParseError::InvalidAttachments),
            })
            .collect::<Result<_, _>>()?;
        Ok(Some(Reconstructed {
            is_ack,
            ack_id,
            ns: self.packet.ns.clone(),
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reassembles_in_header_order() {
        let header = Packet::decode(
            "52-[\"bin\",{\"_placeholder\":true,\"num\":1},{\"_placeholder\":true,\"num\":0}]",
        )
        .unwrap();
        let mut reconstructor = BinaryReconstructor::new(header);
        assert_eq!(reconstructor.expected(), 2);

        let first = Bytes::from_static(&[1]);
        let second = Bytes::from_static(&[2]);
        assert!(reconstructor.add(first.clone()).unwrap().is_none());
        let done = reconstructor.add(second.clone()).unwrap().unwrap();

        assert!(!done.is_ack);
        assert_eq!(done.ack_id, None);
        // marker num 1 resolves to the second received buffer and vice versa
        assert_eq!(
            done.payload,
            vec![
                ReconstructedElem::Json(json!("bin")),
                ReconstructedElem::Binary(second),
                ReconstructedElem::Binary(first),
            ]
        );
    }

    #[test]
    fn single_attachment_ack() {
        let header = Packet::decode("61-54[{\"_placeholder\":true,\"num\":0}]").unwrap();
        let mut reconstructor = BinaryReconstructor::new(header);
        let done = reconstructor
            .add(Bytes::from_static(&[7, 8]))
            .unwrap()
            .unwrap();
        assert!(done.is_ack);
        assert_eq!(done.ack_id, Some(54));
        assert_eq!(
            done.payload,
            vec![ReconstructedElem::Binary(Bytes::from_static(&[7, 8]))]
        );
    }

    #[test]
    fn out_of_range_marker_is_an_error() {
        let header = Packet::decode("51-[{\"_placeholder\":true,\"num\":3}]").unwrap();
        let mut reconstructor = BinaryReconstructor::new(header);
        assert!(reconstructor.add(Bytes::from_static(&[1])).is_err());
    }
}
