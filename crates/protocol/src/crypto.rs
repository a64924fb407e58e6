//! Rolling XOR cipher applied to framed traffic after the handshake
//!
//! Both sides derive the same key table from the 32-bit key carried in the
//! handshake. Every byte is XORed with the table byte at the current position
//! and the position advances by one, wrapping at the end of the table.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of 32-bit words in a key table
pub const CRYPT_KEYS_COUNT: usize = 50;

const KEY_TABLE_LEN: usize = CRYPT_KEYS_COUNT * 4;

/// Generate a fresh non-zero session key
pub fn generate_encrypt_key() -> u32 {
    rand::thread_rng().gen_range(1..=u32::MAX)
}

/// Deterministic key stream derived from a session key
#[derive(Clone)]
pub struct KeyStream {
    table: [u8; KEY_TABLE_LEN],
    pos: usize,
}

impl KeyStream {
    /// Build the key table for `key`. Identical keys yield identical tables.
    pub fn new(key: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(u64::from(key));
        let mut table = [0u8; KEY_TABLE_LEN];
        // Zero would leave a byte in the clear
        for byte in table.iter_mut() {
            *byte = rng.gen_range(1..=255u8);
        }
        Self { table, pos: 0 }
    }

    /// Transform `bytes` in place and advance the stream
    pub fn apply(&mut self, bytes: &mut [u8]) {
        for b in bytes {
            *b ^= self.table[self.pos];
            self.pos = (self.pos + 1) % KEY_TABLE_LEN;
        }
    }

    /// Transform `bytes` as if they started `offset` bytes ahead, without advancing
    pub fn peek(&self, offset: usize, bytes: &mut [u8]) {
        let mut pos = (self.pos + offset) % KEY_TABLE_LEN;
        for b in bytes {
            *b ^= self.table[pos];
            pos = (pos + 1) % KEY_TABLE_LEN;
        }
    }
}

impl std::fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStream").field("pos", &self.pos).finish_non_exhaustive()
    }
}
