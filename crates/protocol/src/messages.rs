//! Message tags, per-tag framing layouts and the built-in control messages
//!
//! Every message starts with a 32-bit little-endian tag. The stream carries no
//! generic length prefix, so each registered tag declares its own layout.

use crate::buffer::{NetInBuffer, NetOutBuffer};
use std::collections::HashMap;

/// Protocol revision announced in the handshake
pub const COMPATIBILITY_VERSION: u32 = 0xF102;

/// Build the tag for message `number`. Numbers must stay below 512.
pub const fn make_tag(number: u32) -> u32 {
    (0x5EAD << 17) | (number << 8) | 0xAA
}

/// Sent by the server to end the session
pub const NETMSG_DISCONNECT: u32 = make_tag(1);
/// Latency probe, carries one [`PingKind`] byte
pub const NETMSG_PING: u32 = make_tag(5);
/// First message from the client on every new connection
pub const NETMSG_HANDSHAKE: u32 = make_tag(14);

/// Encoded size of a ping message
pub const PING_LEN: usize = 5;
/// Tag, version and key
pub const HANDSHAKE_HEADER_LEN: usize = 12;
/// Zero bytes following the header, written with the key already applied
pub const HANDSHAKE_PADDING_LEN: usize = 28;

/// How the end of a message is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLayout {
    /// Fixed total size in bytes, tag included
    Fixed(usize),
    /// Tag followed by a u32 holding the total size, tag included
    Sized,
}

/// Layout table consulted by [`NetInBuffer::need_process`]
#[derive(Debug, Clone, Default)]
pub struct MessageLayouts {
    layouts: HashMap<u32, MessageLayout>,
}

impl MessageLayouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the layout for `tag`, returning the previous one if any
    pub fn insert(&mut self, tag: u32, layout: MessageLayout) -> Option<MessageLayout> {
        self.layouts.insert(tag, layout)
    }

    pub fn get(&self, tag: u32) -> Option<MessageLayout> {
        self.layouts.get(&tag).copied()
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.layouts.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Direction of a ping message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PingKind {
    /// Peer wants an answer
    Request = 0,
    /// Reply to an earlier request
    Answer = 1,
}

impl PingKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            1 => Some(Self::Answer),
            _ => None,
        }
    }
}

/// Queue a ping message
pub fn write_ping(out: &mut NetOutBuffer, kind: PingKind) {
    out.write_u32(NETMSG_PING);
    out.write_u8(kind as u8);
}

/// Contents of a handshake header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: u32,
    pub key: u32,
}

impl Handshake {
    /// Handshake for the current protocol revision
    pub fn new(key: u32) -> Self {
        Self {
            version: COMPATIBILITY_VERSION,
            key,
        }
    }

    /// Write tag, version and key. The caller applies the key and then
    /// calls [`Handshake::write_padding`].
    pub fn write_header(&self, out: &mut NetOutBuffer) {
        out.write_u32(NETMSG_HANDSHAKE);
        out.write_u32(self.version);
        out.write_u32(self.key);
    }

    pub fn write_padding(out: &mut NetOutBuffer) {
        out.write_bytes(&[0u8; HANDSHAKE_PADDING_LEN]);
    }

    /// Read a header on the accepting side. Returns `None` when the tag is
    /// not a handshake; the cursor is left after the header either way.
    pub fn read_header(input: &mut NetInBuffer) -> Option<Self> {
        if input.read_u32() != NETMSG_HANDSHAKE {
            return None;
        }
        let version = input.read_u32();
        let key = input.read_u32();
        if input.is_error() {
            return None;
        }
        Some(Self { version, key })
    }

    /// Consume the padding after the key has been applied. True when it
    /// decoded to zeros.
    pub fn read_padding(input: &mut NetInBuffer) -> bool {
        let padding = input.read_bytes(HANDSHAKE_PADDING_LEN);
        !input.is_error() && padding.iter().all(|&b| b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_construction() {
        assert_eq!(make_tag(5) & 0xFF, 0xAA);
        assert_eq!((make_tag(5) >> 8) & 0xFF, 5);
        assert_eq!(make_tag(14) >> 17, 0x5EAD);
        assert_ne!(NETMSG_PING, NETMSG_HANDSHAKE);
        assert_ne!(NETMSG_DISCONNECT, NETMSG_PING);
    }

    #[test]
    fn test_ping_kind_bytes() {
        assert_eq!(PingKind::from_u8(0), Some(PingKind::Request));
        assert_eq!(PingKind::from_u8(1), Some(PingKind::Answer));
        assert_eq!(PingKind::from_u8(2), None);

        let mut out = NetOutBuffer::new(64);
        write_ping(&mut out, PingKind::Answer);
        assert_eq!(out.len(), PING_LEN);
        assert_eq!(&out.data()[..4], &NETMSG_PING.to_le_bytes());
        assert_eq!(out.data()[4], 1);
    }

    #[test]
    fn test_handshake_is_readable_by_peer() {
        let key = 0x1234_5678;
        let mut out = NetOutBuffer::new(64);
        Handshake::new(key).write_header(&mut out);
        out.set_encrypt_key(key);
        Handshake::write_padding(&mut out);
        assert_eq!(out.len(), HANDSHAKE_HEADER_LEN + HANDSHAKE_PADDING_LEN);

        // Padding leaves the buffer encrypted
        assert!(out.data()[HANDSHAKE_HEADER_LEN..].iter().any(|&b| b != 0));

        let mut input = NetInBuffer::new(64);
        input.append(out.data());
        let header = Handshake::read_header(&mut input).unwrap();
        assert_eq!(header, Handshake::new(key));
        input.set_encrypt_key(header.key);
        assert!(Handshake::read_padding(&mut input));
        assert_eq!(input.unread_len(), 0);
    }

    #[test]
    fn test_read_header_rejects_other_tags() {
        let mut input = NetInBuffer::new(64);
        input.append(&NETMSG_PING.to_le_bytes());
        input.append(&[0u8; 8]);
        assert_eq!(Handshake::read_header(&mut input), None);
    }
}
