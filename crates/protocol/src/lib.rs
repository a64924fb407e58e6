//! # GameLink Protocol Library
//!
//! Byte-level pieces of the client/server link, independent of any socket.
//!
//! ## Layers
//!
//! ### 1. Framing ([`buffer`])
//! [`NetOutBuffer`] and [`NetInBuffer`]: little-endian typed writes and
//! reads, encryption applied on write and removed on read, and
//! [`NetInBuffer::need_process`] to tell whether a whole message is waiting.
//!
//! ### 2. Messages ([`messages`])
//! Tag construction, per-tag [`MessageLayout`]s, and the built-in control
//! messages: handshake, ping and disconnect.
//!
//! ### 3. Encryption ([`crypto`])
//! Rolling XOR key stream seeded from the handshake key.
//!
//! ### 4. Compression ([`compression`])
//! Streaming zlib inflate for inbound traffic and the matching deflate side.
//!
//! ## Usage Example
//!
//! ```rust
//! use gamelink_protocol::{NetInBuffer, NetOutBuffer, MessageLayout, MessageLayouts, make_tag};
//!
//! let chat = make_tag(40);
//! let mut layouts = MessageLayouts::new();
//! layouts.insert(chat, MessageLayout::Sized);
//!
//! let mut out = NetOutBuffer::new(256);
//! out.write_u32(chat);
//! out.write_u32(4 + 4 + 4 + 2);
//! out.write_str("hi");
//!
//! let mut input = NetInBuffer::new(256);
//! input.append(out.data());
//! assert!(input.need_process(&layouts));
//! ```

pub mod buffer;
pub mod compression;
pub mod crypto;
pub mod messages;

// Re-export commonly used items
pub use buffer::*;
pub use compression::*;
pub use crypto::*;
pub use messages::*;
