//! # Proxy Handshakes
//!
//! SOCKS4, SOCKS5 and HTTP CONNECT negotiation, run over an already
//! connected proxy socket before any game traffic.
//!
//! # Architecture
//!
//! Request builders and reply parsers are plain functions over byte slices.
//! [`negotiate`] strings them together over a [`ProxyChannel`], which sends
//! one request and waits for the proxy's answer. The connection provides the
//! real channel; tests script one.
//!
//! # Wire Formats
//!
//! ```text
//! SOCKS4   → [4][1][port BE:2][ipv4:4][0]          ← [_][status]...
//! SOCKS5   → [5][1][2]                             ← [5][method]
//!          → [1][ulen][user][plen][pass]           ← [_][status]
//!          → [5][1][0][1][ipv4:4][port BE:2]       ← [_][status]...
//! HTTP     → "CONNECT ip:port HTTP/1.0\r\n\r\n"    ← "HTTP/1.x 200 ..."
//! ```

use crate::config::ProxySettings;
use gamelink_core::{LinkError, ProxyType};
use std::net::SocketAddrV4;
use tracing::{debug, info};

/// Why a proxy refused to tunnel the connection
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("request rejected or failed")]
    Socks4Rejected,

    #[error("request failed because client is not running identd (or not reachable from the server)")]
    Socks4IdentdUnreachable,

    #[error("request failed because client's identd could not confirm the user ID string in the request")]
    Socks4IdentdMismatch,

    #[error("unknown SOCKS4 status {0:#04x}")]
    Socks4Unknown(u8),

    #[error("proxy accepts none of the offered authentication methods (picked {0:#04x})")]
    UnsupportedAuthMethod(u8),

    #[error("invalid proxy user or password")]
    InvalidCredentials,

    #[error("proxy user and password must each fit in 255 bytes")]
    CredentialsTooLong,

    #[error("SOCKS-server error")]
    GeneralFailure,

    #[error("connection not allowed by ruleset")]
    NotAllowed,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("host unreachable")]
    HostUnreachable,

    #[error("connection denied")]
    ConnectionRefused,

    #[error("TTL expired")]
    TtlExpired,

    #[error("command not supported")]
    CommandNotSupported,

    #[error("address type not supported")]
    AddressTypeNotSupported,

    #[error("unknown SOCKS5 status {0:#04x}")]
    Socks5Unknown(u8),

    #[error("proxy answered '{0}'")]
    HttpRejected(String),

    #[error("proxy reply too short: expected {expected} bytes, got {got}")]
    TruncatedReply { expected: usize, got: usize },

    #[error("proxy answer timeout")]
    Timeout,

    #[error("net output/input error: {0}")]
    Transport(String),
}

impl From<ProxyError> for LinkError {
    fn from(err: ProxyError) -> Self {
        LinkError::Proxy(err.to_string())
    }
}

/// Authentication picked by a SOCKS5 proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5Auth {
    NoAuth,
    UserPassword,
}

/// One request, one reply
pub trait ProxyChannel {
    /// Send `request` and block until the proxy answers or the deadline passes
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, ProxyError>;
}

pub fn socks4_connect_request(dest: SocketAddrV4) -> Vec<u8> {
    let mut request = Vec::with_capacity(9);
    request.extend_from_slice(&[4, 1]);
    request.extend_from_slice(&dest.port().to_be_bytes());
    request.extend_from_slice(&dest.ip().octets());
    request.push(0);
    request
}

pub fn parse_socks4_reply(reply: &[u8]) -> Result<(), ProxyError> {
    match status_byte(reply)? {
        0x5A => Ok(()),
        0x5B => Err(ProxyError::Socks4Rejected),
        0x5C => Err(ProxyError::Socks4IdentdUnreachable),
        0x5D => Err(ProxyError::Socks4IdentdMismatch),
        other => Err(ProxyError::Socks4Unknown(other)),
    }
}

/// Greeting offering username/password authentication
pub fn socks5_greeting() -> [u8; 3] {
    [5, 1, 2]
}

pub fn parse_socks5_method(reply: &[u8]) -> Result<Socks5Auth, ProxyError> {
    match status_byte(reply)? {
        0 => Ok(Socks5Auth::NoAuth),
        2 => Ok(Socks5Auth::UserPassword),
        other => Err(ProxyError::UnsupportedAuthMethod(other)),
    }
}

pub fn socks5_auth_request(user: &str, password: &str) -> Result<Vec<u8>, ProxyError> {
    let user_len = u8::try_from(user.len()).map_err(|_| ProxyError::CredentialsTooLong)?;
    let password_len = u8::try_from(password.len()).map_err(|_| ProxyError::CredentialsTooLong)?;

    let mut request = Vec::with_capacity(3 + user.len() + password.len());
    request.push(1);
    request.push(user_len);
    request.extend_from_slice(user.as_bytes());
    request.push(password_len);
    request.extend_from_slice(password.as_bytes());
    Ok(request)
}

pub fn parse_socks5_auth_reply(reply: &[u8]) -> Result<(), ProxyError> {
    match status_byte(reply)? {
        0 => Ok(()),
        _ => Err(ProxyError::InvalidCredentials),
    }
}

pub fn socks5_connect_request(dest: SocketAddrV4) -> Vec<u8> {
    let mut request = Vec::with_capacity(10);
    request.extend_from_slice(&[5, 1, 0, 1]);
    request.extend_from_slice(&dest.ip().octets());
    request.extend_from_slice(&dest.port().to_be_bytes());
    request
}

pub fn parse_socks5_connect_reply(reply: &[u8]) -> Result<(), ProxyError> {
    match status_byte(reply)? {
        0 => Ok(()),
        1 => Err(ProxyError::GeneralFailure),
        2 => Err(ProxyError::NotAllowed),
        3 => Err(ProxyError::NetworkUnreachable),
        4 => Err(ProxyError::HostUnreachable),
        5 => Err(ProxyError::ConnectionRefused),
        6 => Err(ProxyError::TtlExpired),
        7 => Err(ProxyError::CommandNotSupported),
        8 => Err(ProxyError::AddressTypeNotSupported),
        other => Err(ProxyError::Socks5Unknown(other)),
    }
}

pub fn http_connect_request(dest: SocketAddrV4) -> Vec<u8> {
    format!("CONNECT {}:{} HTTP/1.0\r\n\r\n", dest.ip(), dest.port()).into_bytes()
}

/// Success iff the status line carries ` 200 `
pub fn parse_http_connect_reply(reply: &[u8]) -> Result<(), ProxyError> {
    let text = String::from_utf8_lossy(reply);
    if text.contains(" 200 ") {
        Ok(())
    } else {
        let status_line = text.lines().next().unwrap_or_default().trim().to_string();
        Err(ProxyError::HttpRejected(status_line))
    }
}

/// Ask the proxy in `settings` to open a tunnel to `dest`
///
/// Stops at the first failed step; nothing more is sent after a rejection.
pub fn negotiate<C>(settings: &ProxySettings, dest: SocketAddrV4, channel: &mut C) -> Result<(), ProxyError>
where
    C: ProxyChannel + ?Sized,
{
    match settings.kind {
        ProxyType::None => return Ok(()),
        ProxyType::Socks4 => {
            debug!("SOCKS4 connect request for {}", dest);
            let reply = channel.exchange(&socks4_connect_request(dest))?;
            parse_socks4_reply(&reply)?;
        }
        ProxyType::Socks5 => {
            let reply = channel.exchange(&socks5_greeting())?;
            if parse_socks5_method(&reply)? == Socks5Auth::UserPassword {
                debug!("SOCKS5 proxy wants user/password authentication");
                let reply = channel.exchange(&socks5_auth_request(&settings.user, &settings.password)?)?;
                parse_socks5_auth_reply(&reply)?;
            }
            debug!("SOCKS5 connect request for {}", dest);
            let reply = channel.exchange(&socks5_connect_request(dest))?;
            parse_socks5_connect_reply(&reply)?;
        }
        ProxyType::Http => {
            debug!("HTTP CONNECT request for {}", dest);
            let reply = channel.exchange(&http_connect_request(dest))?;
            parse_http_connect_reply(&reply)?;
        }
    }

    info!("{} proxy tunnel to {} established", settings.kind, dest);
    Ok(())
}

fn status_byte(reply: &[u8]) -> Result<u8, ProxyError> {
    reply.get(1).copied().ok_or(ProxyError::TruncatedReply {
        expected: 2,
        got: reply.len(),
    })
}
