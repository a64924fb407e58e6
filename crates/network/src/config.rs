//! # Connection Settings
//!
//! Configuration options for a client connection to the game server.
//!
//! # Example
//!
//! ```rust
//! use gamelink_network::{NetworkSettings, ProxySettings};
//! use gamelink_core::ProxyType;
//! use std::time::Duration;
//!
//! let settings = NetworkSettings {
//!     server_host: "play.example.org".to_string(),
//!     server_port: 4010,
//!     proxy: ProxySettings {
//!         kind: ProxyType::Socks5,
//!         host: "127.0.0.1".to_string(),
//!         port: 1080,
//!         ..Default::default()
//!     },
//!     ping_period: Duration::from_secs(5),
//!     ..Default::default()
//! };
//! assert!(settings.validate().is_ok());
//! ```

use gamelink_core::ProxyType;
use std::time::Duration;

/// Proxy to tunnel the game connection through
///
/// # Fields
///
/// - `kind`: Proxy protocol, `ProxyType::None` for a direct connection
/// - `host`/`port`: Address of the proxy itself
/// - `user`/`password`: SOCKS5 credentials, ignored by other kinds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub kind: ProxyType,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ProxySettings {
    pub fn is_enabled(&self) -> bool {
        self.kind != ProxyType::None
    }
}

/// Client connection settings
///
/// # Purpose
/// Everything a `ServerConnection` reads when it connects and while it runs.
///
/// # Default Values
///
/// - Server `localhost:4010`, no proxy
/// - 64KB network buffers
/// - Nagle disabled, compression enabled
/// - Ping every 5 seconds
/// - 10-second proxy answer timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Game server host name or dotted IPv4 address
    pub server_host: String,

    /// Game server port, also the lookup key for in-process peers
    pub server_port: u16,

    /// Optional proxy in front of the game server
    pub proxy: ProxySettings,

    /// Initial size of the receive scratch buffer and of both framing buffers
    ///
    /// # Notes
    /// - The receive buffer doubles while reads keep filling it
    /// - Must be at least 1024
    pub net_buffer_size: usize,

    /// Set `TCP_NODELAY` on the socket
    pub disable_tcp_nagle: bool,

    /// Treat inbound bytes as plain instead of a zlib stream
    pub disable_compression: bool,

    /// Time between a ping answer and the next ping request
    ///
    /// # Notes
    /// - Zero disables proactive pings, requests from the server are still answered
    pub ping_period: Duration,

    /// Log every dispatched message at debug level
    pub debug_net: bool,

    /// Simulated latency in milliseconds, zero disables
    ///
    /// Each tick without a pending gate picks a delay in `[lag / 2, lag]`
    /// and all socket activity waits for it.
    pub artificial_lag_ms: u32,

    /// How long to wait for each proxy answer
    pub proxy_timeout: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 4010,
            proxy: ProxySettings::default(),
            net_buffer_size: 64 * 1024,
            disable_tcp_nagle: true,
            disable_compression: false,
            ping_period: Duration::from_secs(5),
            debug_net: false,
            artificial_lag_ms: 0,
            proxy_timeout: Duration::from_secs(10),
        }
    }
}

impl NetworkSettings {
    /// Validate the configuration
    ///
    /// # Returns
    /// `Ok(())` if configuration is valid, `Err(String)` otherwise
    ///
    /// # Checks
    /// - `server_host` must not be empty
    /// - `net_buffer_size` must be >= 1024
    /// - A proxy kind other than `None` needs a host and a non-zero port
    /// - `proxy_timeout` must be > 0
    pub fn validate(&self) -> Result<(), String> {
        if self.server_host.trim().is_empty() {
            return Err("server_host must not be empty".to_string());
        }

        if self.net_buffer_size < 1024 {
            return Err("net_buffer_size must be >= 1024".to_string());
        }

        if self.proxy.is_enabled() {
            if self.proxy.host.trim().is_empty() {
                return Err(format!("{} proxy requires a proxy host", self.proxy.kind));
            }
            if self.proxy.port == 0 {
                return Err(format!("{} proxy requires a proxy port", self.proxy.kind));
            }
        }

        if self.proxy_timeout.is_zero() {
            return Err("proxy_timeout must be > 0".to_string());
        }

        if self.proxy.kind == ProxyType::Socks5
            && (self.proxy.user.len() > 255 || self.proxy.password.len() > 255)
        {
            return Err("SOCKS5 user and password are limited to 255 bytes".to_string());
        }

        if !self.net_buffer_size.is_power_of_two() {
            tracing::warn!("net_buffer_size is not a power of 2, this may reduce performance");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let settings = NetworkSettings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.proxy.is_enabled());
        assert_eq!(settings.proxy_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_small_buffer_rejected() {
        let settings = NetworkSettings {
            net_buffer_size: 512,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_proxy_needs_host() {
        let mut settings = NetworkSettings::default();
        settings.proxy.kind = ProxyType::Http;
        settings.proxy.port = 8080;
        assert!(settings.validate().is_err());

        settings.proxy.host = "10.0.0.1".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_socks5_credentials_length() {
        let mut settings = NetworkSettings::default();
        settings.proxy = ProxySettings {
            kind: ProxyType::Socks5,
            host: "10.0.0.1".to_string(),
            port: 1080,
            user: "u".repeat(256),
            password: String::new(),
        };
        assert!(settings.validate().is_err());
    }
}
