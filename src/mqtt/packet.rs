//! MQTT control packet value.
//!
//! A `ControlPacket` is one complete frame: fixed header, remaining length and
//! body, kept exactly as it was read. The relay engine never needs more than
//! the packet type; handlers and interceptors can ask for a typed view.

use bytes::{BufMut, Bytes, BytesMut};
use mqttrs::Packet;
use thiserror::Error;

use crate::mqtt::codec::{decode_remaining_length, encode_remaining_length, MAX_REMAINING_LENGTH};

/// Errors raised while framing or interpreting MQTT packets.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Packet type nibble 0 is reserved and never valid on the wire.
    #[error("reserved packet type 0 in fixed header")]
    ReservedType,

    /// The remaining length used more than four bytes.
    #[error("malformed remaining length")]
    MalformedLength,

    /// The declared body is larger than the configured limit.
    #[error("packet body of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// The stream ended in the middle of a frame.
    #[error("stream ended inside a packet ({0} bytes buffered)")]
    Truncated(usize),

    /// The frame is well formed but its body does not parse.
    #[error("cannot parse {kind} packet: {reason}")]
    Parse { kind: PacketType, reason: String },

    /// A typed packet could not be encoded.
    #[error("cannot encode packet: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// MQTT control packet types (upper nibble of the fixed header).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    /// MQTT 5.0 only.
    Auth = 15,
}

impl PacketType {
    /// Read the packet type from the first byte of a fixed header.
    pub fn from_header(byte: u8) -> Option<Self> {
        let kind = match byte >> 4 {
            1 => Self::Connect,
            2 => Self::Connack,
            3 => Self::Publish,
            4 => Self::Puback,
            5 => Self::Pubrec,
            6 => Self::Pubrel,
            7 => Self::Pubcomp,
            8 => Self::Subscribe,
            9 => Self::Suback,
            10 => Self::Unsubscribe,
            11 => Self::Unsuback,
            12 => Self::Pingreq,
            13 => Self::Pingresp,
            14 => Self::Disconnect,
            15 => Self::Auth,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connack => "CONNACK",
            Self::Publish => "PUBLISH",
            Self::Puback => "PUBACK",
            Self::Pubrec => "PUBREC",
            Self::Pubrel => "PUBREL",
            Self::Pubcomp => "PUBCOMP",
            Self::Subscribe => "SUBSCRIBE",
            Self::Suback => "SUBACK",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Unsuback => "UNSUBACK",
            Self::Pingreq => "PINGREQ",
            Self::Pingresp => "PINGRESP",
            Self::Disconnect => "DISCONNECT",
            Self::Auth => "AUTH",
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed MQTT control packet.
///
/// Cloning is cheap: the frame is reference counted.
#[derive(Clone, PartialEq, Eq)]
pub struct ControlPacket {
    raw: Bytes,
    header_len: usize,
}

impl ControlPacket {
    /// Build a packet from its type, flag nibble and body.
    pub fn new(packet_type: PacketType, flags: u8, body: impl AsRef<[u8]>) -> Result<Self, PacketError> {
        let body = body.as_ref();
        if body.len() > MAX_REMAINING_LENGTH {
            return Err(PacketError::TooLarge {
                size: body.len(),
                limit: MAX_REMAINING_LENGTH,
            });
        }

        let mut buf = BytesMut::with_capacity(body.len() + 5);
        buf.put_u8(((packet_type as u8) << 4) | (flags & 0x0f));
        encode_remaining_length(body.len(), &mut buf);
        let header_len = buf.len();
        buf.extend_from_slice(body);

        Ok(Self {
            raw: buf.freeze(),
            header_len,
        })
    }

    /// Wrap a complete frame produced by the codec.
    ///
    /// The caller guarantees a valid type nibble and a header of `header_len` bytes.
    pub(crate) fn from_frame(raw: Bytes, header_len: usize) -> Self {
        debug_assert!(header_len >= 2 && header_len <= raw.len());
        Self { raw, header_len }
    }

    /// An MQTT 3.1.1 DISCONNECT packet.
    pub fn disconnect() -> Self {
        Self::from_frame(Bytes::from_static(&[0xe0, 0x00]), 2)
    }

    pub fn packet_type(&self) -> PacketType {
        // from_frame and new only ever hold non-zero type nibbles
        PacketType::from_header(self.raw[0]).unwrap_or(PacketType::Auth)
    }

    /// Lower nibble of the fixed header.
    pub fn flags(&self) -> u8 {
        self.raw[0] & 0x0f
    }

    /// Variable header and payload, without the fixed header.
    pub fn body(&self) -> &[u8] {
        &self.raw[self.header_len..]
    }

    /// The complete wire encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Length of the complete wire encoding.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Parse the typed view of this packet.
    ///
    /// Only MQTT 3.1 and 3.1.1 bodies are understood; MQTT 5.0 packets and
    /// malformed bodies yield [`PacketError::Parse`].
    pub fn parse(&self) -> Result<Packet<'_>, PacketError> {
        let kind = self.packet_type();
        match mqttrs::decode_slice(&self.raw) {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(PacketError::Parse {
                kind,
                reason: "incomplete body".to_string(),
            }),
            Err(e) => Err(PacketError::Parse {
                kind,
                reason: format!("{e:?}"),
            }),
        }
    }

    /// Encode a typed packet.
    pub fn from_packet(packet: &Packet<'_>) -> Result<Self, PacketError> {
        let mut buf = vec![0u8; encoded_size_hint(packet)];
        let written = mqttrs::encode_slice(packet, &mut buf)
            .map_err(|e| PacketError::Encode(format!("{e:?}")))?;

        let (_, len_bytes) = decode_remaining_length(&buf[1..written])?
            .ok_or(PacketError::MalformedLength)?;
        buf.truncate(written);

        Ok(Self::from_frame(Bytes::from(buf), 1 + len_bytes))
    }
}

impl std::fmt::Debug for ControlPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPacket")
            .field("type", &self.packet_type())
            .field("flags", &self.flags())
            .field("len", &self.raw.len())
            .finish()
    }
}

/// Upper bound on the encoded size of a typed packet.
fn encoded_size_hint(packet: &Packet<'_>) -> usize {
    // fixed header with the longest remaining length
    const FIXED: usize = 5;

    let body = match packet {
        Packet::Connect(c) => {
            10 + 2
                + c.client_id.len()
                + c.last_will.as_ref().map_or(0, |w| 4 + w.topic.len() + w.message.len())
                + c.username.map_or(0, |u| 2 + u.len())
                + c.password.map_or(0, |p| 2 + p.len())
        }
        Packet::Publish(p) => 4 + p.topic_name.len() + p.payload.len(),
        Packet::Subscribe(s) => 2 + s.topics.iter().map(|t| 3 + t.topic_path.len()).sum::<usize>(),
        Packet::Suback(s) => 2 + s.return_codes.len(),
        Packet::Unsubscribe(u) => 2 + u.topics.iter().map(|t| 2 + t.len()).sum::<usize>(),
        _ => 2,
    };

    FIXED + body
}
