//! # Message Handler System
//!
//! This module routes inbound messages to the code that understands them.
//!
//! # Architecture
//!
//! ## Handler Registry
//!
//! The registry maps each 32-bit tag to exactly one handler and to the
//! [`MessageLayout`] that tells the framing layer where the message ends.
//! `DISCONNECT` and `PING` are built in and handled by the connection itself;
//! everything else is a boxed [`MessageHandler`].
//!
//! # Example
//!
//! ```rust
//! use gamelink_network::HandlerRegistry;
//! use gamelink_protocol::{make_tag, MessageLayout};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_function(make_tag(40), MessageLayout::Fixed(8), |ctx| {
//!     let value = ctx.input().read_u32();
//!     ctx.output().write_u32(value);
//! });
//! assert!(registry.has_handler(make_tag(40)));
//! ```

use gamelink_protocol::{
    MessageLayout, MessageLayouts, MessageReader, NetInBuffer, NetOutBuffer, NETMSG_DISCONNECT,
    NETMSG_PING, PING_LEN,
};
use std::collections::HashMap;

/// What a handler sees while it runs
///
/// # Purpose
/// The input cursor sits right after the tag. Handlers read their fields,
/// may queue replies, and may ask for the connection to be dropped.
pub struct MessageContext<'a> {
    tag: u32,
    input: MessageReader<'a>,
    output: &'a mut NetOutBuffer,
    disconnect: bool,
}

impl<'a> MessageContext<'a> {
    pub fn new(tag: u32, input: &'a mut NetInBuffer, output: &'a mut NetOutBuffer) -> Self {
        Self {
            tag,
            input: MessageReader::new(input),
            output,
            disconnect: false,
        }
    }

    /// Tag of the message being handled
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Reader over the message bytes; it cannot rewind or refill the buffer
    pub fn input(&mut self) -> &mut MessageReader<'a> {
        &mut self.input
    }

    pub fn output(&mut self) -> &mut NetOutBuffer {
        self.output
    }

    /// Drop the connection once this handler returns
    pub fn request_disconnect(&mut self) {
        self.disconnect = true;
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect
    }
}

/// Application handler for one message tag
pub trait MessageHandler {
    fn handle(&mut self, ctx: &mut MessageContext<'_>);
}

impl<F> MessageHandler for F
where
    F: FnMut(&mut MessageContext<'_>),
{
    fn handle(&mut self, ctx: &mut MessageContext<'_>) {
        self(ctx)
    }
}

/// Registered handler for a tag
pub enum Handler {
    /// Server asked us to leave
    Disconnect,
    /// Latency probe, answered or measured by the connection
    Ping,
    Custom(Box<dyn MessageHandler>),
}

/// Which kind of handler a tag maps to, without borrowing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Disconnect,
    Ping,
    Custom,
}

/// Registry of message handlers
///
/// # Purpose
/// Maintains a mapping from tags to handlers and their layouts.
/// Provides O(1) lookup on dispatch.
///
/// # Panics
/// Registering a tag twice, or tag 0, is a programming error and panics.
pub struct HandlerRegistry {
    /// Map from tag to handler
    handlers: HashMap<u32, Handler>,

    /// Framing information for every registered tag
    layouts: MessageLayouts,
}

impl HandlerRegistry {
    /// Create a registry holding only the built-in handlers
    ///
    /// # Returns
    /// A registry with `DISCONNECT` and `PING` already registered
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            layouts: MessageLayouts::new(),
        };
        registry.insert(NETMSG_DISCONNECT, MessageLayout::Fixed(4), Handler::Disconnect);
        registry.insert(NETMSG_PING, MessageLayout::Fixed(PING_LEN), Handler::Ping);
        registry
    }

    /// Register an application handler
    ///
    /// # Arguments
    /// * `tag` - Message tag, never 0
    /// * `layout` - How long messages with this tag are
    /// * `handler` - Called once per complete message
    ///
    /// # Panics
    /// If the tag is 0, is already registered, or the layout is shorter than a tag.
    pub fn register<H>(&mut self, tag: u32, layout: MessageLayout, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.insert(tag, layout, Handler::Custom(Box::new(handler)));
        tracing::debug!("Registered handler for message {:#010x}", tag);
    }

    /// Register a closure as the handler for `tag`
    ///
    /// Same as [`HandlerRegistry::register`], with the closure signature
    /// spelled out so argument types are inferred.
    pub fn register_function<F>(&mut self, tag: u32, layout: MessageLayout, handler: F)
    where
        F: FnMut(&mut MessageContext<'_>) + 'static,
    {
        self.register(tag, layout, handler);
    }

    /// Check if a handler is registered for a tag
    pub fn has_handler(&self, tag: u32) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Get the number of registered handlers, built-ins included
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn kind(&self, tag: u32) -> Option<HandlerKind> {
        self.handlers.get(&tag).map(|handler| match handler {
            Handler::Disconnect => HandlerKind::Disconnect,
            Handler::Ping => HandlerKind::Ping,
            Handler::Custom(_) => HandlerKind::Custom,
        })
    }

    /// Mutable access to an application handler
    pub fn custom_mut(&mut self, tag: u32) -> Option<&mut (dyn MessageHandler + 'static)> {
        match self.handlers.get_mut(&tag) {
            Some(Handler::Custom(handler)) => Some(handler.as_mut()),
            _ => None,
        }
    }

    pub fn layouts(&self) -> &MessageLayouts {
        &self.layouts
    }

    fn insert(&mut self, tag: u32, layout: MessageLayout, handler: Handler) {
        assert_ne!(tag, 0, "message tag 0 is reserved");
        assert!(
            !self.handlers.contains_key(&tag),
            "handler for message {:#010x} registered twice",
            tag
        );
        if let MessageLayout::Fixed(size) = layout {
            assert!(size >= 4, "fixed layout of {} bytes cannot hold a tag", size);
        }
        self.layouts.insert(tag, layout);
        self.handlers.insert(tag, handler);
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamelink_protocol::make_tag;

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.kind(NETMSG_DISCONNECT), Some(HandlerKind::Disconnect));
        assert_eq!(registry.kind(NETMSG_PING), Some(HandlerKind::Ping));
        assert_eq!(registry.handler_count(), 2);
        assert_eq!(registry.layouts().get(NETMSG_PING), Some(MessageLayout::Fixed(PING_LEN)));
    }

    #[test]
    fn test_registry_register_and_call() {
        let tag = make_tag(40);
        let mut registry = HandlerRegistry::new();
        registry.register_function(tag, MessageLayout::Fixed(8), |ctx| {
            let value = ctx.input().read_u32();
            ctx.output().write_u32(value + 1);
            ctx.request_disconnect();
        });
        assert_eq!(registry.kind(tag), Some(HandlerKind::Custom));
        assert!(registry.layouts().contains(tag));

        let mut input = NetInBuffer::new(16);
        input.append(&41u32.to_le_bytes());
        let mut output = NetOutBuffer::new(16);
        let mut ctx = MessageContext::new(tag, &mut input, &mut output);
        registry.custom_mut(tag).unwrap().handle(&mut ctx);
        assert!(ctx.disconnect_requested());
        assert_eq!(output.data(), &42u32.to_le_bytes());
    }

    #[test]
    fn test_unknown_tag() {
        let mut registry = HandlerRegistry::new();
        assert_eq!(registry.kind(make_tag(77)), None);
        assert_eq!(registry.kind(0), None);
        assert!(registry.custom_mut(NETMSG_PING).is_none());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = HandlerRegistry::new();
        registry.register_function(make_tag(40), MessageLayout::Sized, |_| {});
        registry.register_function(make_tag(40), MessageLayout::Sized, |_| {});
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_builtin_cannot_be_replaced() {
        let mut registry = HandlerRegistry::new();
        registry.register_function(NETMSG_PING, MessageLayout::Fixed(5), |_| {});
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn test_tag_zero_panics() {
        let mut registry = HandlerRegistry::new();
        registry.register_function(0, MessageLayout::Sized, |_| {});
    }
}
