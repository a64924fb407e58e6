//! GameLink Client Options
//!
//! Loads the client options file (`key = value` lines) and turns it into
//! the `NetworkSettings` a `ServerConnection` runs with.

use gamelink_core::{LinkError, ProxyType, Result};
use gamelink_network::{NetworkSettings, ProxySettings};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default location of the options file, relative to the working directory
pub const DEFAULT_OPTIONS_PATH: &str = "config/clientoptions.txt";

/// Client options as written in the options file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    // ========== Server ==========
    /// Game server host (from "serverhost" option)
    pub server_host: String,
    /// Game server port (from "serverport" option, default: 4010)
    pub server_port: u16,

    // ========== Proxy ==========
    /// Proxy protocol (from "proxytype" option)
    pub proxy_type: ProxyType,
    /// Proxy host (from "proxyhost" option)
    pub proxy_host: String,
    /// Proxy port (from "proxyport" option)
    pub proxy_port: u16,
    /// SOCKS5 user name (from "proxyuser" option)
    pub proxy_user: String,
    /// SOCKS5 password (from "proxypass" option)
    pub proxy_pass: String,

    // ========== Transport ==========
    /// Receive buffer size in bytes (from "netbuffersize" option)
    pub net_buffer_size: usize,
    /// Set TCP_NODELAY (from "disabletcpnagle" option)
    pub disable_tcp_nagle: bool,
    /// Treat server traffic as uncompressed (from "disablezlibcompression" option)
    pub disable_zlib_compression: bool,
    /// Milliseconds between pings, 0 disables (from "pingperiod" option)
    pub ping_period_ms: u64,

    // ========== Debugging ==========
    /// Log every dispatched message (from "debugnet" option)
    pub debug_net: bool,
    /// Simulated latency in milliseconds (from "artificiallags" option)
    pub artificial_lags_ms: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 4010,
            proxy_type: ProxyType::None,
            proxy_host: String::new(),
            proxy_port: 0,
            proxy_user: String::new(),
            proxy_pass: String::new(),
            net_buffer_size: 64 * 1024,
            disable_tcp_nagle: true,
            disable_zlib_compression: false,
            ping_period_ms: 5000,
            debug_net: false,
            artificial_lags_ms: 0,
        }
    }
}

impl ClientOptions {
    /// Load options from a file
    ///
    /// # Errors
    /// `LinkError::Io` when the file cannot be read.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        tracing::debug!("Read {} bytes from {}", content.len(), path.as_ref().display());
        Ok(Self::parse(&content))
    }

    /// Load options from `DEFAULT_OPTIONS_PATH`
    pub fn load_default() -> Result<Self> {
        Self::load_from_file(DEFAULT_OPTIONS_PATH)
    }

    /// Parse options file content
    ///
    /// Malformed values keep their defaults; the file never fails to parse.
    pub fn parse(content: &str) -> Self {
        let mut options = Self::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                options.parse_option(&key.trim().to_lowercase(), value.trim());
            } else {
                tracing::warn!("Ignoring options line without '=': {}", line);
            }
        }

        options
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key {
            "serverhost" => self.server_host = value.into(),
            "serverport" => {
                self.server_port = value.parse().unwrap_or(4010);
            }
            "proxytype" => {
                self.proxy_type = parse_proxy_type(value).unwrap_or_else(|| {
                    tracing::warn!("Unknown proxy type '{}', connecting directly", value);
                    ProxyType::None
                });
            }
            "proxyhost" => self.proxy_host = value.into(),
            "proxyport" => {
                self.proxy_port = value.parse().unwrap_or(0);
            }
            "proxyuser" => self.proxy_user = value.into(),
            "proxypass" => self.proxy_pass = value.into(),
            "netbuffersize" => {
                self.net_buffer_size = value.parse().unwrap_or(64 * 1024);
            }
            "disabletcpnagle" => {
                self.disable_tcp_nagle = parse_flag(value).unwrap_or(true);
            }
            "disablezlibcompression" => {
                self.disable_zlib_compression = parse_flag(value).unwrap_or(false);
            }
            "pingperiod" => {
                self.ping_period_ms = value.parse().unwrap_or(5000);
            }
            "debugnet" => {
                self.debug_net = parse_flag(value).unwrap_or(false);
            }
            "artificiallags" => {
                self.artificial_lags_ms = value.parse().unwrap_or(0);
            }
            _ => {
                tracing::debug!("Unknown client option: {} = {}", key, value);
            }
        }
    }

    /// Convert into connection settings
    ///
    /// # Errors
    /// `LinkError::Config` when the resulting settings fail validation.
    pub fn into_network_settings(self) -> Result<NetworkSettings> {
        let settings = NetworkSettings {
            server_host: self.server_host,
            server_port: self.server_port,
            proxy: ProxySettings {
                kind: self.proxy_type,
                host: self.proxy_host,
                port: self.proxy_port,
                user: self.proxy_user,
                password: self.proxy_pass,
            },
            net_buffer_size: self.net_buffer_size,
            disable_tcp_nagle: self.disable_tcp_nagle,
            disable_compression: self.disable_zlib_compression,
            ping_period: Duration::from_millis(self.ping_period_ms),
            debug_net: self.debug_net,
            artificial_lag_ms: self.artificial_lags_ms,
            ..Default::default()
        };

        settings.validate().map_err(LinkError::Config)?;
        Ok(settings)
    }

    /// Display options summary
    pub fn display(&self) {
        tracing::info!("Client options:");
        tracing::info!("  Server: {}:{}", self.server_host, self.server_port);
        if self.proxy_type == ProxyType::None {
            tracing::info!("  Proxy: none");
        } else {
            tracing::info!(
                "  Proxy: {} via {}:{}",
                self.proxy_type,
                self.proxy_host,
                self.proxy_port
            );
        }
        tracing::info!("  Net buffer: {} bytes", self.net_buffer_size);
        tracing::info!("  TCP nagle disabled: {}", self.disable_tcp_nagle);
        tracing::info!("  Compression disabled: {}", self.disable_zlib_compression);
        tracing::info!("  Ping period: {} ms", self.ping_period_ms);
        if self.artificial_lags_ms > 0 {
            tracing::info!("  Artificial lag: {} ms", self.artificial_lags_ms);
        }
    }
}

/// Accepts a proxy name or its numeric index (0 none, 1 socks4, 2 socks5, 3 http)
fn parse_proxy_type(value: &str) -> Option<ProxyType> {
    match value.parse::<u8>() {
        Ok(0) => Some(ProxyType::None),
        Ok(1) => Some(ProxyType::Socks4),
        Ok(2) => Some(ProxyType::Socks5),
        Ok(3) => Some(ProxyType::Http),
        Ok(_) => None,
        Err(_) => ProxyType::from_name(value),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.server_port, 4010);
        assert_eq!(options.proxy_type, ProxyType::None);
        assert_eq!(options.ping_period_ms, 5000);
        assert!(options.disable_tcp_nagle);
    }

    #[test]
    fn test_parse_simple_options() {
        let text = r#"
# local test server
serverhost = 10.0.0.5
serverport = 14900
pingperiod = 2500
disablezlibcompression = true
artificiallags = 150
"#;
        let options = ClientOptions::parse(text);
        assert_eq!(options.server_host, "10.0.0.5");
        assert_eq!(options.server_port, 14900);
        assert_eq!(options.ping_period_ms, 2500);
        assert!(options.disable_zlib_compression);
        assert_eq!(options.artificial_lags_ms, 150);
    }

    #[test]
    fn test_proxy_type_by_name_or_index() {
        assert_eq!(ClientOptions::parse("proxytype = socks5").proxy_type, ProxyType::Socks5);
        assert_eq!(ClientOptions::parse("proxytype = 1").proxy_type, ProxyType::Socks4);
        assert_eq!(ClientOptions::parse("proxytype = 3").proxy_type, ProxyType::Http);
        assert_eq!(ClientOptions::parse("proxytype = 7").proxy_type, ProxyType::None);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let options = ClientOptions::parse("serverport = lots\ndebugnet = maybe\nnoequals\nfoo = bar");
        assert_eq!(options, ClientOptions::default());
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let options = ClientOptions::parse("ServerHost = example.org\nDEBUGNET = 1");
        assert_eq!(options.server_host, "example.org");
        assert!(options.debug_net);
    }

    #[test]
    fn test_into_network_settings() {
        let text = "proxytype = socks5\nproxyhost = 127.0.0.1\nproxyport = 1080\nproxyuser = bob\nproxypass = pw\npingperiod = 0";
        let settings = ClientOptions::parse(text).into_network_settings().unwrap();
        assert_eq!(settings.proxy.kind, ProxyType::Socks5);
        assert_eq!(settings.proxy.port, 1080);
        assert_eq!(settings.proxy.user, "bob");
        assert_eq!(settings.ping_period, Duration::ZERO);
        assert_eq!(settings.proxy_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = ClientOptions::parse("proxytype = http").into_network_settings();
        assert!(matches!(result, Err(LinkError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "serverhost = play.example.org").unwrap();
        writeln!(file, "netbuffersize = 8192").unwrap();

        let options = ClientOptions::load_from_file(file.path()).unwrap();
        assert_eq!(options.server_host, "play.example.org");
        assert_eq!(options.net_buffer_size, 8192);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClientOptions::load_from_file(dir.path().join("absent.txt"));
        assert!(matches!(result, Err(LinkError::Io(_))));
    }
}
