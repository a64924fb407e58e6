//! Framing buffers for the client/server stream
//!
//! [`NetOutBuffer`] accumulates outbound messages until the connection flushes
//! them; [`NetInBuffer`] holds decoded inbound bytes and a read cursor.
//! All integers are little-endian. Once a key is set, written bytes are
//! encrypted immediately and read bytes are decrypted as the cursor passes.

use crate::crypto::KeyStream;
use crate::messages::{MessageLayout, MessageLayouts};
use bytes::{Buf, BufMut, BytesMut};

/// Outbound message queue
#[derive(Debug)]
pub struct NetOutBuffer {
    data: BytesMut,
    initial_capacity: usize,
    key: u32,
    cipher: Option<KeyStream>,
}

impl NetOutBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            initial_capacity: capacity,
            key: 0,
            cipher: None,
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        let start = self.data.len();
        self.data.put_u8(value);
        self.seal_from(start);
    }

    pub fn write_u16(&mut self, value: u16) {
        let start = self.data.len();
        self.data.put_u16_le(value);
        self.seal_from(start);
    }

    pub fn write_u32(&mut self, value: u32) {
        let start = self.data.len();
        self.data.put_u32_le(value);
        self.seal_from(start);
    }

    pub fn write_u64(&mut self, value: u64) {
        let start = self.data.len();
        self.data.put_u64_le(value);
        self.seal_from(start);
    }

    pub fn write_i32(&mut self, value: i32) {
        let start = self.data.len();
        self.data.put_i32_le(value);
        self.seal_from(start);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let start = self.data.len();
        self.data.put_slice(bytes);
        self.seal_from(start);
    }

    /// Length-prefixed (u32) UTF-8 string
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    /// Append bytes without encryption and without advancing the key stream.
    /// Used for proxy negotiation, which happens before any key exists.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Bytes waiting to be sent, already encrypted
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop the first `count` bytes after a (partial) send
    pub fn discard(&mut self, count: usize) {
        self.data.advance(count.min(self.data.len()));
    }

    /// Forget queued bytes and give back memory grown past the initial size.
    /// The key stream position is kept.
    pub fn reset(&mut self) {
        if self.data.capacity() > self.initial_capacity {
            self.data = BytesMut::with_capacity(self.initial_capacity);
        } else {
            self.data.clear();
        }
    }

    /// Start encrypting with `key` from the next written byte. Zero disables.
    pub fn set_encrypt_key(&mut self, key: u32) {
        self.key = key;
        self.cipher = (key != 0).then(|| KeyStream::new(key));
    }

    pub fn encrypt_key(&self) -> u32 {
        self.key
    }

    fn seal_from(&mut self, start: usize) {
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply(&mut self.data[start..]);
        }
    }
}

/// Inbound bytes with a read cursor
///
/// Reads past the end set the error flag and yield zeroed values; callers
/// check [`NetInBuffer::is_error`] once after reading a whole message.
#[derive(Debug)]
pub struct NetInBuffer {
    data: Vec<u8>,
    read_pos: usize,
    initial_capacity: usize,
    key: u32,
    cipher: Option<KeyStream>,
    error: bool,
}

impl NetInBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
            initial_capacity: capacity,
            key: 0,
            cipher: None,
            error: false,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Backing storage, for decoders that append straight onto the tail
    pub fn storage_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Total bytes held, consumed ones included until [`NetInBuffer::shrink`]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn unread_len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Offset of the read cursor from the start of the held bytes
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take::<1>().map(|b| b[0]).unwrap_or_default()
    }

    pub fn read_u16(&mut self) -> u16 {
        self.take().map(u16::from_le_bytes).unwrap_or_default()
    }

    pub fn read_u32(&mut self) -> u32 {
        self.take().map(u32::from_le_bytes).unwrap_or_default()
    }

    pub fn read_u64(&mut self) -> u64 {
        self.take().map(u64::from_le_bytes).unwrap_or_default()
    }

    pub fn read_i32(&mut self) -> i32 {
        self.take().map(i32::from_le_bytes).unwrap_or_default()
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        if self.error || self.unread_len() < count {
            self.error = true;
            return Vec::new();
        }
        let mut bytes = self.data[self.read_pos..self.read_pos + count].to_vec();
        self.read_pos += count;
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply(&mut bytes);
        }
        bytes
    }

    /// Advance past `count` bytes, keeping the key stream in step
    pub fn skip(&mut self, count: usize) {
        self.read_bytes(count);
    }

    /// Counterpart of [`NetOutBuffer::write_str`]. Invalid UTF-8 is replaced.
    pub fn read_str(&mut self) -> String {
        let len = self.read_u32() as usize;
        if self.error {
            return String::new();
        }
        String::from_utf8_lossy(&self.read_bytes(len)).into_owned()
    }

    /// True when the unread bytes hold a complete message, or a tag that has
    /// no layout at all so the dispatcher can reject it.
    ///
    /// A sized message declaring a total below its own header marks the
    /// buffer as corrupt.
    pub fn need_process(&mut self, layouts: &MessageLayouts) -> bool {
        if self.error {
            return false;
        }
        let Some(tag) = self.peek_u32(0) else {
            return false;
        };
        match layouts.get(tag) {
            None => true,
            Some(MessageLayout::Fixed(size)) => self.unread_len() >= size,
            Some(MessageLayout::Sized) => match self.peek_u32(4) {
                None => false,
                Some(size) if (size as usize) < 8 => {
                    self.error = true;
                    false
                }
                Some(size) => self.unread_len() >= size as usize,
            },
        }
    }

    /// Drop consumed bytes so the unread ones start at offset zero
    pub fn shrink(&mut self) {
        if self.read_pos > 0 {
            self.data.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }

    /// Forget everything and give back memory grown past the initial size.
    /// The key stream position is kept.
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.shrink_to(self.initial_capacity);
        self.read_pos = 0;
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self, error: bool) {
        self.error = error;
    }

    /// Start decrypting with `key` from the next read byte. Zero disables.
    pub fn set_encrypt_key(&mut self, key: u32) {
        self.key = key;
        self.cipher = (key != 0).then(|| KeyStream::new(key));
    }

    pub fn encrypt_key(&self) -> u32 {
        self.key
    }

    /// Decode the u32 `offset` bytes past the cursor without consuming it
    pub fn peek_u32(&self, offset: usize) -> Option<u32> {
        let start = self.read_pos + offset;
        let mut bytes: [u8; 4] = self.data.get(start..start + 4)?.try_into().ok()?;
        if let Some(cipher) = self.cipher.as_ref() {
            cipher.peek(offset, &mut bytes);
        }
        Some(u32::from_le_bytes(bytes))
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.error || self.unread_len() < N {
            self.error = true;
            return None;
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.read_pos..self.read_pos + N]);
        self.read_pos += N;
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply(&mut bytes);
        }
        Some(bytes)
    }
}

/// Read-only view of a [`NetInBuffer`] handed to message handlers
///
/// Handlers can consume bytes but cannot add data, rewind, rekey or clear
/// the error flag.
#[derive(Debug)]
pub struct MessageReader<'a> {
    buf: &'a mut NetInBuffer,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a mut NetInBuffer) -> Self {
        Self { buf }
    }

    pub fn read_u8(&mut self) -> u8 {
        self.buf.read_u8()
    }

    pub fn read_u16(&mut self) -> u16 {
        self.buf.read_u16()
    }

    pub fn read_u32(&mut self) -> u32 {
        self.buf.read_u32()
    }

    pub fn read_u64(&mut self) -> u64 {
        self.buf.read_u64()
    }

    pub fn read_i32(&mut self) -> i32 {
        self.buf.read_i32()
    }

    pub fn read_bool(&mut self) -> bool {
        self.buf.read_bool()
    }

    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        self.buf.read_bytes(count)
    }

    pub fn skip(&mut self, count: usize) {
        self.buf.skip(count);
    }

    pub fn read_str(&mut self) -> String {
        self.buf.read_str()
    }

    pub fn unread_len(&self) -> usize {
        self.buf.unread_len()
    }

    pub fn is_error(&self) -> bool {
        self.buf.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::make_tag;

    fn transfer(out: &NetOutBuffer, key: u32) -> NetInBuffer {
        let mut input = NetInBuffer::new(64);
        input.set_encrypt_key(key);
        input.append(out.data());
        input
    }

    #[test]
    fn test_typed_values_with_key() {
        let mut out = NetOutBuffer::new(64);
        out.set_encrypt_key(0xABCD_0123);
        out.write_u8(7);
        out.write_u16(0xBEEF);
        out.write_u32(0xDEAD_BEEF);
        out.write_u64(u64::MAX - 1);
        out.write_i32(-42);
        out.write_bool(true);
        out.write_str("hello");

        let mut input = transfer(&out, 0xABCD_0123);
        assert_eq!(input.read_u8(), 7);
        assert_eq!(input.read_u16(), 0xBEEF);
        assert_eq!(input.read_u32(), 0xDEAD_BEEF);
        assert_eq!(input.read_u64(), u64::MAX - 1);
        assert_eq!(input.read_i32(), -42);
        assert!(input.read_bool());
        assert_eq!(input.read_str(), "hello");
        assert!(!input.is_error());
        assert_eq!(input.unread_len(), 0);
    }

    #[test]
    fn test_wrong_key_garbles() {
        let mut out = NetOutBuffer::new(64);
        out.set_encrypt_key(1);
        out.write_u32(0x1122_3344);
        let mut input = transfer(&out, 2);
        assert_ne!(input.read_u32(), 0x1122_3344);
    }

    #[test]
    fn test_push_raw_is_not_encrypted() {
        let mut out = NetOutBuffer::new(64);
        out.set_encrypt_key(99);
        out.push_raw(&[5, 1, 2]);
        assert_eq!(out.data(), &[5, 1, 2]);
    }

    #[test]
    fn test_underrun_sets_error() {
        let mut input = NetInBuffer::new(16);
        input.append(&[1, 2]);
        assert_eq!(input.read_u32(), 0);
        assert!(input.is_error());
        // Once failed, further reads keep failing
        assert_eq!(input.read_u8(), 0);
        input.set_error(false);
        assert_eq!(input.read_u8(), 1);
    }

    #[test]
    fn test_discard_and_reset() {
        let mut out = NetOutBuffer::new(8);
        out.write_bytes(&[1, 2, 3, 4, 5]);
        out.discard(2);
        assert_eq!(out.data(), &[3, 4, 5]);
        out.write_bytes(&[0u8; 1024]);
        out.reset();
        assert!(out.is_empty());
    }

    #[test]
    fn test_need_process_layouts() {
        let fixed = make_tag(20);
        let sized = make_tag(21);
        let mut layouts = MessageLayouts::new();
        layouts.insert(fixed, MessageLayout::Fixed(6));
        layouts.insert(sized, MessageLayout::Sized);

        let mut input = NetInBuffer::new(64);
        assert!(!input.need_process(&layouts));

        input.append(&fixed.to_le_bytes());
        input.append(&[1]);
        assert!(!input.need_process(&layouts));
        input.append(&[2]);
        assert!(input.need_process(&layouts));
        input.read_u32();
        input.read_u16();
        input.shrink();
        assert!(input.is_empty());

        input.append(&sized.to_le_bytes());
        assert!(!input.need_process(&layouts));
        input.append(&10u32.to_le_bytes());
        assert!(!input.need_process(&layouts));
        input.append(&[0, 0]);
        assert!(input.need_process(&layouts));
    }

    #[test]
    fn test_need_process_unknown_tag_and_corrupt_size() {
        let sized = make_tag(21);
        let mut layouts = MessageLayouts::new();
        layouts.insert(sized, MessageLayout::Sized);

        let mut input = NetInBuffer::new(64);
        input.append(&make_tag(99).to_le_bytes());
        assert!(input.need_process(&layouts));

        let mut input = NetInBuffer::new(64);
        input.append(&sized.to_le_bytes());
        input.append(&3u32.to_le_bytes());
        assert!(!input.need_process(&layouts));
        assert!(input.is_error());
    }

    #[test]
    fn test_message_reader_advances_cursor() {
        let mut out = NetOutBuffer::new(64);
        out.set_encrypt_key(5);
        out.write_u32(11);
        out.write_str("abc");

        let mut input = transfer(&out, 5);
        let mut reader = MessageReader::new(&mut input);
        assert_eq!(reader.read_u32(), 11);
        assert_eq!(reader.read_str(), "abc");
        assert_eq!(reader.read_u8(), 0);
        assert!(reader.is_error());
        assert_eq!(input.read_pos(), 11);
    }

    #[test]
    fn test_need_process_peeks_through_cipher() {
        let tag = make_tag(30);
        let mut layouts = MessageLayouts::new();
        layouts.insert(tag, MessageLayout::Fixed(4));

        let mut out = NetOutBuffer::new(64);
        out.set_encrypt_key(77);
        out.write_u32(tag);
        out.write_u32(tag);

        let mut input = transfer(&out, 77);
        assert!(input.need_process(&layouts));
        assert_eq!(input.read_u32(), tag);
        assert!(input.need_process(&layouts));
        assert_eq!(input.read_u32(), tag);
        assert!(!input.need_process(&layouts));
    }
}
