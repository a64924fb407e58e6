//! # GameLink Networking Layer
//!
//! This crate provides the client side of the game server link: a single
//! poll-driven connection over TCP (optionally through a proxy) or over an
//! in-process transport.
//!
//! ## Modules
//!
//! - [`config`] - Connection settings
//! - [`connection`] - The server connection and its tick loop
//! - [`handlers`] - Message handler registry
//! - [`proxy`] - SOCKS4, SOCKS5 and HTTP CONNECT negotiation
//! - [`socket`] - Name resolution and non-blocking TCP
//! - [`interthread`] - In-process transport registry

pub mod config;
pub mod connection;
pub mod handlers;
pub mod interthread;
pub mod proxy;
pub mod socket;

// Re-export commonly used items
pub use config::{NetworkSettings, ProxySettings};
pub use connection::{ConnectCallback, DisconnectCallback, ServerConnection};
pub use handlers::{HandlerRegistry, MessageContext, MessageHandler};
pub use interthread::{InterthreadDataCallback, InterthreadLink, InterthreadListener, InterthreadRegistry};
pub use proxy::{ProxyChannel, ProxyError};
