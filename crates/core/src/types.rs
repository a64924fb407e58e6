//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport is open
    #[default]
    Disconnected,

    /// A non-blocking connect is in flight
    Connecting,

    /// Transport is up and the handshake has been queued
    Connected,
}

/// How bytes reach the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// TCP socket, optionally tunnelled through a proxy
    Socket,

    /// In-process peer registered on the same port
    Interthread,
}

/// Proxy protocol used to reach the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxyType {
    #[default]
    None,
    Socks4,
    Socks5,
    Http,
}

impl ProxyType {
    /// Parse a proxy type from its configuration name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Self::None),
            "socks4" => Some(Self::Socks4),
            "socks5" => Some(Self::Socks5),
            "http" => Some(Self::Http),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte counters for one connection
///
/// `bytes_received` counts wire bytes, `bytes_real_received` counts bytes
/// after decompression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_real_received: u64,
}

impl TrafficStats {
    /// Ratio of wire bytes to decoded bytes, or 1.0 before anything arrived
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_real_received == 0 {
            1.0
        } else {
            self.bytes_received as f64 / self.bytes_real_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_type_names() {
        assert_eq!(ProxyType::from_name("SOCKS5"), Some(ProxyType::Socks5));
        assert_eq!(ProxyType::from_name(" http "), Some(ProxyType::Http));
        assert_eq!(ProxyType::from_name(""), Some(ProxyType::None));
        assert_eq!(ProxyType::from_name("socks6"), None);
        assert_eq!(ProxyType::Socks4.to_string(), "socks4");
    }

    #[test]
    fn test_compression_ratio() {
        let mut stats = TrafficStats::default();
        assert_eq!(stats.compression_ratio(), 1.0);
        stats.bytes_received = 50;
        stats.bytes_real_received = 200;
        assert_eq!(stats.compression_ratio(), 0.25);
    }
}
