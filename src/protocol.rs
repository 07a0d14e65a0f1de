//! Wire format and shared descriptors
//!
//! ## Packet format (header = 12 bytes, big-endian)
//!
//! ```text
//! Offset  Len  Field
//! ------  ---  -----------
//!  0       2   Magic (0x4C41, "LA")
//!  2       4   Sequence (wraps at 2^32)
//!  6       4   Timestamp (ms since session start, wraps)
//! 10       2   Payload length
//! 12       N   Payload (Opus)
//! ```
//!
//! One datagram carries exactly one frame. Nothing is fragmented.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_PACKET_SIZE;
use crate::error::{MalformedPacket, NetworkError};

/// Protocol identifier
pub const MAGIC: u16 = 0x4C41;

/// Header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Largest payload that keeps a datagram within the safe MTU
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Fixed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub timestamp: u32,
}

/// One received frame in compressed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Serialize header + payload into `buf` (cleared first)
pub fn encode_packet(
    header: PacketHeader,
    payload: &[u8],
    buf: &mut BytesMut,
) -> Result<(), NetworkError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(NetworkError::PacketTooLarge(HEADER_SIZE + payload.len()));
    }

    buf.clear();
    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u16(MAGIC);
    buf.put_u32(header.sequence);
    buf.put_u32(header.timestamp);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(())
}

/// Parse one datagram. The payload is a zero-copy slice of `datagram`.
pub fn decode_packet(mut datagram: Bytes) -> Result<Packet, MalformedPacket> {
    let total = datagram.len();
    if total < HEADER_SIZE {
        return Err(MalformedPacket::TooShort(total));
    }

    let magic = datagram.get_u16();
    if magic != MAGIC {
        return Err(MalformedPacket::BadMagic(magic));
    }

    let sequence = datagram.get_u32();
    let timestamp = datagram.get_u32();
    let declared = datagram.get_u16() as usize;

    if declared != datagram.remaining() {
        return Err(MalformedPacket::LengthMismatch {
            declared,
            actual: datagram.remaining(),
        });
    }

    Ok(Packet {
        sequence,
        timestamp,
        payload: datagram,
    })
}

/// Audio device description handed to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// Stable id, e.g. `input:Microphone`, `loopback:Speakers`
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    /// Capture of what an output device plays
    pub is_loopback: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(sequence: u32, timestamp: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        encode_packet(PacketHeader { sequence, timestamp }, payload, &mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(0x01020304, 0x0A0B0C0D, &[0xAA, 0xBB]);
        assert_eq!(
            &bytes[..],
            &[0x4C, 0x41, 1, 2, 3, 4, 0x0A, 0x0B, 0x0C, 0x0D, 0, 2, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_decode() {
        let packet = decode_packet(encode(u32::MAX, 20, b"opus")).unwrap();
        assert_eq!(packet.sequence, u32::MAX);
        assert_eq!(packet.timestamp, 20);
        assert_eq!(&packet.payload[..], b"opus");
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(
            decode_packet(Bytes::from_static(&[0x4C, 0x41, 0])),
            Err(MalformedPacket::TooShort(3))
        );

        let mut bad_magic = encode(1, 1, b"x").to_vec();
        bad_magic[0] = 0xFF;
        assert!(matches!(
            decode_packet(Bytes::from(bad_magic)),
            Err(MalformedPacket::BadMagic(_))
        ));

        let mut truncated = encode(1, 1, b"abcd").to_vec();
        truncated.pop();
        assert_eq!(
            decode_packet(Bytes::from(truncated)),
            Err(MalformedPacket::LengthMismatch { declared: 4, actual: 3 })
        );

        let mut trailing = encode(1, 1, b"ab").to_vec();
        trailing.push(0);
        assert!(decode_packet(Bytes::from(trailing)).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result = encode_packet(PacketHeader { sequence: 0, timestamp: 0 }, &payload, &mut buf);
        assert!(matches!(result, Err(NetworkError::PacketTooLarge(n)) if n == MAX_PACKET_SIZE + 1));

        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        encode_packet(PacketHeader { sequence: 0, timestamp: 0 }, &payload, &mut buf).unwrap();
        assert_eq!(buf.len(), MAX_PACKET_SIZE);
    }

    proptest! {
        /// Arbitrary bytes never panic the decoder
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_packet(Bytes::from(data));
        }
    }
}
