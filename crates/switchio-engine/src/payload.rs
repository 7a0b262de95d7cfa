//! Batch codec for the polling transport.
//!
//! A polling GET response or POST body carries several packets joined by the
//! record separator character (U+001E).

use crate::packet::{Packet, PacketBuf, PacketParseError};

/// Separator between packets of one polling payload.
pub const RECORD_SEPARATOR: char = '\x1e';

/// Encode a batch of packets into one polling body.
pub fn encode(packets: &[Packet]) -> String {
    let mut out = String::with_capacity(packets.len() * 16);
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&String::from(packet));
    }
    out
}

/// Decode a polling body into its packets.
///
/// Decoding stops at the first malformed record, as the remainder of the
/// payload cannot be trusted past it.
pub fn decode(input: &str) -> Result<PacketBuf, PacketParseError> {
    let mut packets = PacketBuf::new();
    if input.is_empty() {
        return Ok(packets);
    }
    for record in input.split(RECORD_SEPARATOR) {
        packets.push(Packet::try_from(record)?);
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_batch() {
        let packets = [Packet::Message("hello".into()), Packet::Ping(None)];
        assert_eq!(encode(&packets), "4hello\x1e2");
    }

    #[test]
    fn decode_batch() {
        let packets = decode("4hello\x1e6\x1ebAQID").unwrap();
        assert_eq!(
            packets.into_vec(),
            vec![
                Packet::Message("hello".into()),
                Packet::Noop,
                Packet::Binary(vec![1, 2, 3].into()),
            ]
        );
    }

    #[test]
    fn decode_single() {
        let packets = decode("1").unwrap();
        assert_eq!(packets.into_vec(), vec![Packet::Close]);
    }

    #[test]
    fn decode_empty() {
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn decode_malformed_record() {
        assert!(decode("4ok\x1ex").is_err());
    }
}
