//! Wire-format definitions for BattlEye RCon packets.
//!
//! Every datagram exchanged with the game server is a [`Packet`].  This module
//! is responsible for:
//! - Defining the on-wire binary layout (header text, checksum, marker, type).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], classifying
//!   malformed and corrupt input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  0       1       2       3       4       5       6       7       8
//! +-------+-------+-------+-------+-------+-------+-------+-------+-------- - -
//! |  'B'  |  'E'  |        CRC-32 of bytes 6..        |  0xFF | type  | payload
//! +-------+-------+-------+-------+-------+-------+-------+-------+-------- - -
//! ```
//!
//! Payload per type:
//!
//! | type              | client → server         | server → client                  |
//! |-------------------|-------------------------|----------------------------------|
//! | `0` Login         | password (no prefix)    | result byte (1 = accepted)       |
//! | `1` Command       | sequence, [command]     | sequence, [data] or fragment     |
//! | `2` ServerMessage | sequence (acknowledge)  | sequence, message                |
//!
//! A multipart command reply carries `0x00, count, index` right after the
//! sequence byte, followed by that fragment's bytes.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tokio::time::Instant;

/// Two-byte ASCII header every packet starts with.
pub const HEADER_TEXT: &[u8; 2] = b"BE";

/// Fixed marker byte following the checksum.
pub const MARKER: u8 = 0xFF;

/// Smallest datagram the server ever sends: header, checksum, marker, type
/// and one payload byte.
pub const MIN_PACKET_LEN: usize = 9;

// Byte offsets of each field within the serialised packet.
const OFF_CHECKSUM: usize = 2;
const OFF_BODY: usize = 6;
const OFF_TYPE: usize = 7;
const OFF_PAYLOAD: usize = 8;

/// Leading byte of a multipart command reply fragment header.
const FRAGMENT_FLAG: u8 = 0x00;

/// Well-known attribute names.
pub mod attr {
    pub const PASSWORD: &str = "password";
    pub const RESULT: &str = "result";
    pub const SEQUENCE: &str = "sequence";
    pub const COMMAND: &str = "command";
    pub const DATA: &str = "data";
    pub const MESSAGE: &str = "message";
    pub const FRAGMENT_COUNT: &str = "fragment_count";
    pub const FRAGMENT_INDEX: &str = "fragment_index";
}

// ---------------------------------------------------------------------------
// Type and sub-type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Login,
    Command,
    ServerMessage,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Login),
            1 => Some(PacketType::Command),
            2 => Some(PacketType::ServerMessage),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            PacketType::Login => 0,
            PacketType::Command => 1,
            PacketType::ServerMessage => 2,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Login => write!(f, "Login"),
            PacketType::Command => write!(f, "Command"),
            PacketType::ServerMessage => write!(f, "Server Message"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketSubType {
    Request,
    Reply,
    /// One fragment of a multipart command reply.
    SplitReply,
}

impl fmt::Display for PacketSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketSubType::Request => write!(f, "Request"),
            PacketSubType::Reply => write!(f, "Reply"),
            PacketSubType::SplitReply => write!(f, "Split Reply"),
        }
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Byte(u8),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<u8> for AttributeValue {
    fn from(value: u8) -> Self {
        AttributeValue::Byte(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::Bytes(value)
    }
}

/// Open name → value mapping carried by every packet.
///
/// Which keys are meaningful depends on the packet's type and sub-type; see
/// the table in the module docs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    map: BTreeMap<String, AttributeValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.map.get(name)
    }

    /// Insert or replace an attribute.  Blank names are rejected.
    pub fn set(&mut self, name: &str, value: impl Into<AttributeValue>) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.map.insert(name.to_string(), value.into());
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.map.remove(name)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Copy every attribute of `other` into `self`.  With `overwrite == false`
    /// attributes already present are kept.
    pub fn copy_from(&mut self, other: &Attributes, overwrite: bool) {
        for (name, value) in &other.map {
            if !overwrite && self.map.contains_key(name) {
                continue;
            }
            self.map.insert(name.clone(), value.clone());
        }
    }

    /// The attribute as a byte, if present and byte-valued.
    pub fn byte(&self, name: &str) -> Option<u8> {
        match self.map.get(name) {
            Some(AttributeValue::Byte(b)) => Some(*b),
            _ => None,
        }
    }

    /// The attribute as text, if present and text-valued.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.map.get(name) {
            Some(AttributeValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// The attribute as raw bytes; text attributes yield their UTF-8 bytes.
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.map.get(name) {
            Some(AttributeValue::Bytes(b)) => Some(b),
            Some(AttributeValue::Text(s)) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One protocol message in request or reply form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub sub_type: PacketSubType,
    pub attributes: Attributes,
    /// Time of the original transmission; stamped by the client on send and
    /// never refreshed by retransmissions.
    pub time_stamp: Instant,
    /// Number of retransmissions performed so far.
    pub resend_count: u32,
}

impl Packet {
    pub fn new(packet_type: PacketType, sub_type: PacketSubType, attributes: Attributes) -> Self {
        Self {
            packet_type,
            sub_type,
            attributes,
            time_stamp: Instant::now(),
            resend_count: 0,
        }
    }

    /// Login request carrying the server's RCon password.
    pub fn login(password: &str) -> Self {
        let mut attributes = Attributes::new();
        attributes.set(attr::PASSWORD, password);
        Self::new(PacketType::Login, PacketSubType::Request, attributes)
    }

    /// Command request.  `None` produces a bare heartbeat packet.
    pub fn command(sequence: u8, command: Option<&str>) -> Self {
        let mut attributes = Attributes::new();
        attributes.set(attr::SEQUENCE, sequence);
        if let Some(command) = command {
            attributes.set(attr::COMMAND, command);
        }
        Self::new(PacketType::Command, PacketSubType::Request, attributes)
    }

    /// Acknowledgement of a server message with the given sequence.
    pub fn acknowledge(sequence: u8) -> Self {
        let mut attributes = Attributes::new();
        attributes.set(attr::SEQUENCE, sequence);
        Self::new(PacketType::ServerMessage, PacketSubType::Reply, attributes)
    }

    pub fn sequence(&self) -> Option<u8> {
        self.attributes.byte(attr::SEQUENCE)
    }

    pub fn increment_resend_count(&mut self) {
        self.resend_count += 1;
    }

    /// Check that this packet can be serialised; returns the reason if not.
    pub fn validate(&self) -> Result<(), PacketError> {
        self.encode_body().map(|_| ())
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Only the shapes a client sends are encodable: login and command
    /// requests, and server message acknowledgements.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        Ok(frame(&self.encode_body()?))
    }

    /// Marker, type and payload: the checksummed part of the datagram.
    fn encode_body(&self) -> Result<Vec<u8>, PacketError> {
        let mut body = vec![MARKER, self.packet_type.to_u8()];

        match (self.packet_type, self.sub_type) {
            (PacketType::Login, PacketSubType::Request) => {
                let password = self
                    .attributes
                    .text(attr::PASSWORD)
                    .ok_or_else(|| invalid("login request without a text password"))?;
                body.extend_from_slice(password.as_bytes());
            }
            (PacketType::Command, PacketSubType::Request) => {
                let sequence = self
                    .sequence()
                    .ok_or_else(|| invalid("command request without a sequence byte"))?;
                body.push(sequence);
                match self.attributes.get(attr::COMMAND) {
                    None => {}
                    Some(AttributeValue::Text(command)) => body.extend_from_slice(command.as_bytes()),
                    Some(_) => return Err(invalid("command attribute must be text")),
                }
            }
            (PacketType::ServerMessage, PacketSubType::Reply) => {
                let sequence = self
                    .sequence()
                    .ok_or_else(|| invalid("acknowledgement without a sequence byte"))?;
                body.push(sequence);
            }
            (packet_type, sub_type) => {
                return Err(PacketError::InvalidPacket(format!(
                    "{packet_type} {sub_type} packets are never sent by a client"
                )));
            }
        }

        Ok(body)
    }

    /// Parse a server-originated [`Packet`] from a raw datagram.
    ///
    /// Checks are applied in wire order: length, header text, checksum,
    /// marker, type.  The decoded sub-type is [`PacketSubType::Reply`] except
    /// for multipart command fragments, which decode as
    /// [`PacketSubType::SplitReply`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }

        if buf[..OFF_CHECKSUM] != HEADER_TEXT[..] {
            return Err(PacketError::BadHeader);
        }

        let expected = u32::from_le_bytes([
            buf[OFF_CHECKSUM],
            buf[OFF_CHECKSUM + 1],
            buf[OFF_CHECKSUM + 2],
            buf[OFF_CHECKSUM + 3],
        ]);
        let computed = checksum(&buf[OFF_BODY..]);
        if expected != computed {
            return Err(PacketError::ChecksumMismatch { expected, computed });
        }

        if buf[OFF_BODY] != MARKER {
            return Err(PacketError::BadMarker(buf[OFF_BODY]));
        }

        let packet_type =
            PacketType::from_u8(buf[OFF_TYPE]).ok_or(PacketError::UnknownType(buf[OFF_TYPE]))?;
        let payload = &buf[OFF_PAYLOAD..];
        let mut attributes = Attributes::new();
        let mut sub_type = PacketSubType::Reply;

        match packet_type {
            PacketType::Login => {
                attributes.set(attr::RESULT, payload[0]);
            }
            PacketType::Command => {
                attributes.set(attr::SEQUENCE, payload[0]);
                let rest = &payload[1..];
                if rest.len() >= 3 && rest[0] == FRAGMENT_FLAG {
                    let (count, index) = (rest[1], rest[2]);
                    if count == 0 || index >= count {
                        return Err(PacketError::BadFragment { count, index });
                    }
                    sub_type = PacketSubType::SplitReply;
                    attributes.set(attr::FRAGMENT_COUNT, count);
                    attributes.set(attr::FRAGMENT_INDEX, index);
                    attributes.set(attr::DATA, rest[3..].to_vec());
                } else if !rest.is_empty() {
                    attributes.set(attr::DATA, String::from_utf8_lossy(rest).into_owned());
                }
            }
            PacketType::ServerMessage => {
                attributes.set(attr::SEQUENCE, payload[0]);
                attributes.set(attr::MESSAGE, String::from_utf8_lossy(&payload[1..]).into_owned());
            }
        }

        Ok(Packet::new(packet_type, sub_type, attributes))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.packet_type, self.sub_type)?;
        if let Some(sequence) = self.sequence() {
            write!(f, " seq={sequence}")?;
        }
        Ok(())
    }
}

/// Prefix a body (marker, type, payload) with the header text and its
/// CRC-32, producing a complete datagram.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(OFF_BODY + body.len());
    buf.extend_from_slice(HEADER_TEXT);
    buf.extend_from_slice(&checksum(body).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// CRC-32 (IEEE) over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid(reason: &str) -> PacketError {
    PacketError::InvalidPacket(reason.to_string())
}

/// Errors that can arise when serialising or parsing a packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("cannot send invalid packet: {0}")]
    InvalidPacket(String),
    #[error("packet must contain at least 9 bytes, got {0}")]
    TooShort(usize),
    #[error("invalid header text")]
    BadHeader,
    #[error("packet checksum verification failed (stored {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("packet missing 0xFF marker after checksum (found {0:#04x})")]
    BadMarker(u8),
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("malformed multipart reply fragment {index} of {count}")]
    BadFragment { count: u8, index: u8 },
}

impl PacketError {
    /// True for datagrams that parsed structurally but failed the checksum.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, PacketError::ChecksumMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(body: &[u8]) -> Vec<u8> {
        frame(body)
    }

    #[test]
    fn command_request_wire_layout() {
        let bytes = Packet::command(5, Some("players")).encode().unwrap();
        assert_eq!(&bytes[..2], b"BE");
        assert_eq!(bytes[6], 0xFF);
        assert_eq!(bytes[7], 1);
        assert_eq!(bytes[8], 5);
        assert_eq!(&bytes[9..], b"players");
        let stored = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        assert_eq!(stored, checksum(&bytes[6..]));
    }

    #[test]
    fn login_request_has_no_length_prefix() {
        let bytes = Packet::login("secret").encode().unwrap();
        assert_eq!(bytes.len(), 8 + 6);
        assert_eq!(bytes[7], 0);
        assert_eq!(&bytes[8..], b"secret");
    }

    #[test]
    fn heartbeat_is_bare_sequence() {
        let bytes = Packet::command(200, None).encode().unwrap();
        assert_eq!(bytes.len(), MIN_PACKET_LEN);
        assert_eq!(bytes[8], 200);
    }

    #[test]
    fn acknowledgement_layout() {
        let bytes = Packet::acknowledge(17).encode().unwrap();
        assert_eq!(&bytes[6..], &[0xFF, 2, 17]);
    }

    #[test]
    fn checksum_matches_known_crc32() {
        // CRC-32/IEEE check value.
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn command_roundtrip_maps_command_to_data() {
        let decoded = Packet::decode(&Packet::command(42, Some("missions")).encode().unwrap()).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Command);
        assert_eq!(decoded.sub_type, PacketSubType::Reply);
        assert_eq!(decoded.sequence(), Some(42));
        assert_eq!(decoded.attributes.text(attr::DATA), Some("missions"));
    }

    #[test]
    fn heartbeat_roundtrip_has_no_data() {
        let decoded = Packet::decode(&Packet::command(0, None).encode().unwrap()).unwrap();
        assert_eq!(decoded.sequence(), Some(0));
        assert!(!decoded.attributes.contains(attr::DATA));
    }

    #[test]
    fn acknowledgement_roundtrip() {
        let decoded = Packet::decode(&Packet::acknowledge(255).encode().unwrap()).unwrap();
        assert_eq!(decoded.packet_type, PacketType::ServerMessage);
        assert_eq!(decoded.sequence(), Some(255));
        assert_eq!(decoded.attributes.text(attr::MESSAGE), Some(""));
    }

    #[test]
    fn decode_login_reply() {
        let decoded = Packet::decode(&reply(&[0xFF, 0, 1])).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Login);
        assert_eq!(decoded.attributes.byte(attr::RESULT), Some(1));
    }

    #[test]
    fn decode_server_message() {
        let mut body = vec![0xFF, 2, 9];
        body.extend_from_slice(b"Player #1 connected");
        let decoded = Packet::decode(&reply(&body)).unwrap();
        assert_eq!(decoded.sequence(), Some(9));
        assert_eq!(decoded.attributes.text(attr::MESSAGE), Some("Player #1 connected"));
    }

    #[test]
    fn decode_split_fragment() {
        let decoded = Packet::decode(&reply(&[0xFF, 1, 3, 0x00, 2, 1, b'o', b'k'])).unwrap();
        assert_eq!(decoded.sub_type, PacketSubType::SplitReply);
        assert_eq!(decoded.sequence(), Some(3));
        assert_eq!(decoded.attributes.byte(attr::FRAGMENT_COUNT), Some(2));
        assert_eq!(decoded.attributes.byte(attr::FRAGMENT_INDEX), Some(1));
        assert_eq!(decoded.attributes.bytes(attr::DATA), Some(&b"ok"[..]));
    }

    #[test]
    fn decode_fragment_index_out_of_range() {
        assert_eq!(
            Packet::decode(&reply(&[0xFF, 1, 3, 0x00, 2, 2])),
            Err(PacketError::BadFragment { count: 2, index: 2 })
        );
    }

    #[test]
    fn decode_short_input_is_too_short() {
        for len in 0..MIN_PACKET_LEN {
            let junk = vec![0xFFu8; len];
            assert_eq!(Packet::decode(&junk), Err(PacketError::TooShort(len)));
        }
        // Even a well-formed prefix of a real packet.
        let bytes = Packet::command(1, None).encode().unwrap();
        assert_eq!(Packet::decode(&bytes[..8]), Err(PacketError::TooShort(8)));
    }

    #[test]
    fn decode_bad_header() {
        let mut bytes = reply(&[0xFF, 0, 1]);
        bytes[1] = b'X';
        assert_eq!(Packet::decode(&bytes), Err(PacketError::BadHeader));
    }

    #[test]
    fn decode_bad_marker() {
        assert_eq!(Packet::decode(&reply(&[0xFE, 0, 1])), Err(PacketError::BadMarker(0xFE)));
    }

    #[test]
    fn decode_unknown_type() {
        assert_eq!(Packet::decode(&reply(&[0xFF, 7, 1])), Err(PacketError::UnknownType(7)));
    }

    #[test]
    fn every_single_bit_flip_is_corrupt() {
        let bytes = Packet::command(5, Some("players")).encode().unwrap();
        for byte in OFF_BODY..bytes.len() {
            for bit in 0..8 {
                let mut flipped = bytes.clone();
                flipped[byte] ^= 1 << bit;
                let err = Packet::decode(&flipped).unwrap_err();
                assert!(err.is_corrupt(), "byte {byte} bit {bit}: {err:?}");
            }
        }
    }

    #[test]
    fn encode_rejects_missing_attributes() {
        let bare_login = Packet::new(PacketType::Login, PacketSubType::Request, Attributes::new());
        assert!(matches!(bare_login.encode(), Err(PacketError::InvalidPacket(_))));

        let bare_command = Packet::new(PacketType::Command, PacketSubType::Request, Attributes::new());
        assert!(matches!(bare_command.encode(), Err(PacketError::InvalidPacket(_))));

        let mut wrong_kind = Attributes::new();
        wrong_kind.set(attr::SEQUENCE, "five");
        let bad_sequence = Packet::new(PacketType::Command, PacketSubType::Request, wrong_kind);
        assert!(bad_sequence.validate().is_err());
    }

    #[test]
    fn encode_rejects_server_side_shapes() {
        let mut attributes = Attributes::new();
        attributes.set(attr::RESULT, 1u8);
        let login_reply = Packet::new(PacketType::Login, PacketSubType::Reply, attributes);
        assert!(matches!(login_reply.encode(), Err(PacketError::InvalidPacket(_))));
    }

    #[test]
    fn attributes_copy_respects_overwrite() {
        let mut a = Attributes::new();
        a.set("x", 1u8);
        let mut b = Attributes::new();
        b.set("x", 2u8);
        b.set("y", "why");

        let mut keep = a.clone();
        keep.copy_from(&b, false);
        assert_eq!(keep.byte("x"), Some(1));
        assert_eq!(keep.text("y"), Some("why"));

        a.copy_from(&b, true);
        assert_eq!(a.byte("x"), Some(2));
        assert_eq!(a.len(), 2);
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn attributes_reject_blank_names() {
        let mut a = Attributes::new();
        assert!(!a.set("   ", 1u8));
        assert!(a.is_empty());
    }
}
