//! MQTT fixed-header framing codec.
//!
//! # Responsibilities
//! - Find packet boundaries using the fixed header remaining length
//! - Reject reserved packet types and oversized or malformed lengths
//! - Write frames back out byte for byte

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::mqtt::packet::{ControlPacket, PacketError};

/// Largest remaining length a four byte variable integer can express.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Frames a byte stream into [`ControlPacket`]s.
#[derive(Debug, Clone, Copy)]
pub struct MqttCodec {
    max_packet_size: usize,
}

impl MqttCodec {
    /// Create a codec that refuses bodies larger than `max_packet_size` bytes.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(MAX_REMAINING_LENGTH),
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new(MAX_REMAINING_LENGTH)
    }
}

impl Decoder for MqttCodec {
    type Item = ControlPacket;
    type Error = PacketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ControlPacket>, PacketError> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };
        if first >> 4 == 0 {
            return Err(PacketError::ReservedType);
        }

        let Some((remaining, len_bytes)) = decode_remaining_length(&src[1..])? else {
            return Ok(None);
        };
        if remaining > self.max_packet_size {
            return Err(PacketError::TooLarge {
                size: remaining,
                limit: self.max_packet_size,
            });
        }

        let header_len = 1 + len_bytes;
        let frame_len = header_len + remaining;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let raw = src.split_to(frame_len).freeze();
        Ok(Some(ControlPacket::from_frame(raw, header_len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ControlPacket>, PacketError> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(PacketError::Truncated(src.len())),
        }
    }
}

impl Encoder<ControlPacket> for MqttCodec {
    type Error = PacketError;

    fn encode(&mut self, item: ControlPacket, dst: &mut BytesMut) -> Result<(), PacketError> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

/// Decode a variable byte integer.
///
/// Returns the value and the number of bytes it occupied, or `None` when more
/// input is needed.
pub(crate) fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut value = 0usize;
    for (i, byte) in buf.iter().take(4).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if buf.len() >= 4 {
        Err(PacketError::MalformedLength)
    } else {
        Ok(None)
    }
}

/// Encode a variable byte integer. `len` must not exceed [`MAX_REMAINING_LENGTH`].
pub(crate) fn encode_remaining_length(mut len: usize, dst: &mut impl BufMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}
