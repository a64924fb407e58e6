//! # Server Connection
//!
//! This module owns the client's single link to the game server.
//!
//! # Architecture
//!
//! The connection is driven by the application's tick loop; nothing here
//! spawns threads or blocks, except the bounded proxy handshake inside
//! [`ServerConnection::connect`]. Each [`ServerConnection::process`] call:
//! - finishes a pending non-blocking connect
//! - reads whatever arrived and inflates it into the input buffer
//! - dispatches every complete message to its handler
//! - queues a keepalive ping when one is due
//! - flushes the output buffer
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──writable──► Connected
//!      ▲                          │                        │
//!      └──────── on_connect(false)┘     on_disconnect() ◄──┘
//! ```
//!
//! An in-process server registered on the target port skips `Connecting`:
//! the link is up as soon as `connect()` returns.
//!
//! # Wire Format
//!
//! After the handshake every byte from the client is encrypted with the
//! handshake key. Everything from the server is one zlib stream (unless
//! compression is disabled) whose decoded bytes are encrypted with the same
//! key.

use crate::config::NetworkSettings;
use crate::handlers::{HandlerKind, HandlerRegistry, MessageContext, MessageHandler};
use crate::interthread::{InterthreadLink, InterthreadRegistry};
use crate::proxy::{self, ProxyChannel, ProxyError};
use crate::socket::{self, NetSocket};
use gamelink_core::{ConnectionState, LinkError, Result, TrafficStats, TransportMode};
use gamelink_protocol::{
    generate_encrypt_key, write_ping, Handshake, InflateStream, MessageLayout, NetInBuffer,
    NetOutBuffer, PingKind,
};
use rand::Rng;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Called with `true` once connected, `false` when a connect attempt fails
pub type ConnectCallback = Box<dyn FnMut(bool)>;

/// Called when an established connection goes away
pub type DisconnectCallback = Box<dyn FnMut()>;

/// The one transport a connection has open
enum Transport {
    Socket(NetSocket),
    Interthread(InterthreadLink),
}

impl Transport {
    fn mode(&self) -> TransportMode {
        match self {
            Transport::Socket(_) => TransportMode::Socket,
            Transport::Interthread(_) => TransportMode::Interthread,
        }
    }
}

/// Client connection to the game server
///
/// # Purpose
/// Manages connect/disconnect, framing, encryption, inbound decompression,
/// keepalive pings and message dispatch for one server link.
///
/// # Thread Safety
/// Not `Send`: callbacks and handlers are plain boxed closures and run on
/// the thread that calls [`ServerConnection::process`]. The only state
/// shared with other threads is the interthread inbox.
///
/// # Example
///
/// ```rust,no_run
/// use gamelink_network::{NetworkSettings, ServerConnection};
/// use gamelink_protocol::{make_tag, MessageLayout};
///
/// let mut conn = ServerConnection::new(NetworkSettings::default());
/// conn.add_connect_handler(|ok| println!("connected: {ok}"));
/// conn.add_message_function(make_tag(40), MessageLayout::Sized, |ctx| {
///     let _size = ctx.input().read_u32();
///     println!("motd: {}", ctx.input().read_str());
/// });
/// conn.connect()?;
/// loop {
///     conn.process();
///     std::thread::sleep(std::time::Duration::from_millis(10));
/// }
/// # Ok::<(), gamelink_core::LinkError>(())
/// ```
pub struct ServerConnection {
    settings: NetworkSettings,

    /// Where in-process servers are looked up
    interthread: Option<Arc<InterthreadRegistry>>,

    state: ConnectionState,
    transport: Option<Transport>,

    /// Created by `connect()`, released by `disconnect()`
    inflate: Option<InflateStream>,

    net_in: NetInBuffer,
    net_out: NetOutBuffer,

    /// Raw bytes of the last read, before inflation
    income_buf: Vec<u8>,

    handlers: HandlerRegistry,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,

    traffic: TrafficStats,

    /// Set while a ping request is unanswered
    ping_sent_at: Option<Instant>,
    next_ping_at: Instant,
    last_ping: Option<Duration>,

    /// Artificial lag: socket activity waits until this instant
    lag_gate: Option<Instant>,

    /// Running count of dispatched messages, for debug logging
    msg_count: u64,
}

impl ServerConnection {
    /// Create a disconnected connection
    ///
    /// # Arguments
    /// * `settings` - Server address, proxy, buffers and timing
    ///
    /// # Returns
    /// A connection with only the built-in `DISCONNECT` and `PING` handlers
    pub fn new(settings: NetworkSettings) -> Self {
        let buffer_size = settings.net_buffer_size;
        Self {
            settings,
            interthread: None,
            state: ConnectionState::Disconnected,
            transport: None,
            inflate: None,
            net_in: NetInBuffer::new(buffer_size),
            net_out: NetOutBuffer::new(buffer_size),
            income_buf: Vec::new(),
            handlers: HandlerRegistry::new(),
            on_connect: None,
            on_disconnect: None,
            traffic: TrafficStats::default(),
            ping_sent_at: None,
            next_ping_at: Instant::now(),
            last_ping: None,
            lag_gate: None,
            msg_count: 0,
        }
    }

    /// Create a connection that prefers in-process servers from `registry`
    pub fn with_interthread(settings: NetworkSettings, registry: Arc<InterthreadRegistry>) -> Self {
        let mut conn = Self::new(settings);
        conn.interthread = Some(registry);
        conn
    }

    /// Set the connect callback, replacing any previous one
    pub fn add_connect_handler<F>(&mut self, handler: F)
    where
        F: FnMut(bool) + 'static,
    {
        self.on_connect = Some(Box::new(handler));
    }

    /// Set the disconnect callback, replacing any previous one
    pub fn add_disconnect_handler<F>(&mut self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.on_disconnect = Some(Box::new(handler));
    }

    /// Register the handler for messages tagged `tag`
    ///
    /// # Panics
    /// If `tag` already has a handler or is 0.
    pub fn add_message_handler<H>(&mut self, tag: u32, layout: MessageLayout, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.register(tag, layout, handler);
    }

    /// Register a closure as the handler for messages tagged `tag`
    ///
    /// # Panics
    /// If `tag` already has a handler or is 0.
    pub fn add_message_function<F>(&mut self, tag: u32, layout: MessageLayout, handler: F)
    where
        F: FnMut(&mut MessageContext<'_>) + 'static,
    {
        self.handlers.register_function(tag, layout, handler);
    }

    /// Start connecting to the configured server
    ///
    /// # Purpose
    /// Opens the transport. Outcomes are reported through the connect
    /// callback, either from inside this call (in-process server, immediate
    /// failure, proxy handshake) or from a later [`ServerConnection::process`].
    ///
    /// # Errors
    /// `LinkError::UnsupportedPlatform` when a proxy is configured on a
    /// target that cannot make blocking connects. Every other failure goes
    /// to the callback.
    ///
    /// # Panics
    /// If the connection is already connected or connecting.
    pub fn connect(&mut self) -> Result<()> {
        assert_eq!(
            self.state,
            ConnectionState::Disconnected,
            "connect() called on an active connection"
        );

        if cfg!(target_family = "wasm") && self.settings.proxy.is_enabled() {
            return Err(LinkError::UnsupportedPlatform(format!(
                "{} proxy needs blocking sockets",
                self.settings.proxy.kind
            )));
        }

        self.net_in.reset();
        self.net_out.reset();
        self.net_in.set_encrypt_key(0);
        self.net_out.set_encrypt_key(0);
        self.net_in.set_error(false);
        self.traffic = TrafficStats::default();
        self.ping_sent_at = None;
        self.next_ping_at = Instant::now();
        self.lag_gate = None;

        let port = self.settings.server_port;
        let listener = self.interthread.as_ref().and_then(|registry| registry.find(port));

        if self.inflate.is_none() {
            self.inflate = Some(InflateStream::new());
        }

        if let Some(listener) = listener {
            info!("Connecting to in-process server on port {}", port);
            self.transport = Some(Transport::Interthread(InterthreadLink::open(&listener)));
            self.establish();
            return Ok(());
        }

        info!("Connecting to server '{}:{}'", self.settings.server_host, port);
        match self.open_socket() {
            Ok(()) => self.state = ConnectionState::Connecting,
            Err(e) => {
                error!("Can't connect to server: {}", e);
                self.disconnect();
                self.fire_connect(false);
            }
        }
        Ok(())
    }

    /// Run one tick: connect completion, receive, dispatch, ping, send
    ///
    /// Failures never escape; they end the connection and fire the callbacks.
    pub fn process(&mut self) {
        let lag = self.settings.artificial_lag_ms;
        if lag != 0 && self.lag_gate.is_none() {
            let delay = rand::thread_rng().gen_range(lag / 2..=lag);
            self.lag_gate = Some(Instant::now() + Duration::from_millis(u64::from(delay)));
        }

        if self.state == ConnectionState::Connecting && !self.check_status(true) {
            return;
        }
        if self.state != ConnectionState::Connected {
            return;
        }

        if let Err(e) = self.receive_data(true) {
            match e {
                LinkError::Closed => info!("Connection closed by server"),
                other => error!("Receive failed: {}", other),
            }
            self.disconnect();
            return;
        }

        self.dispatch_messages();
        if self.state != ConnectionState::Connected {
            return;
        }

        self.schedule_ping();
        self.dispatch_data();
    }

    /// Tear the connection down; safe to call in any state
    ///
    /// # Callbacks
    /// - Connecting: the connect callback gets `false`
    /// - Connected: the disconnect callback fires
    /// - Disconnected: nothing happens
    pub fn disconnect(&mut self) {
        match self.transport.take() {
            Some(Transport::Interthread(link)) => link.close(),
            Some(Transport::Socket(sock)) => debug!("Closing socket to {}", sock.peer()),
            None => {}
        }
        if self.inflate.take().is_some() {
            trace!("Inflate stream released");
        }

        match self.state {
            ConnectionState::Connecting => {
                info!("Can't connect to server");
                self.state = ConnectionState::Disconnected;
                self.fire_connect(false);
            }
            ConnectionState::Connected => {
                info!("Disconnected from server");
                info!(
                    "Traffic: sent {} bytes, received {} bytes ({} decompressed)",
                    self.traffic.bytes_sent, self.traffic.bytes_received, self.traffic.bytes_real_received
                );
                self.state = ConnectionState::Disconnected;
                self.net_in.reset();
                self.net_out.reset();
                self.net_in.set_encrypt_key(0);
                self.net_out.set_encrypt_key(0);
                self.net_in.set_error(false);
                self.ping_sent_at = None;
                if let Some(callback) = self.on_disconnect.as_mut() {
                    callback();
                }
            }
            ConnectionState::Disconnected => {}
        }
    }

    /// Send queued output now
    ///
    /// # Returns
    /// `true` while the connection is still up. A would-block leaves the
    /// unsent tail queued for the next call.
    pub fn dispatch_data(&mut self) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        if self.net_out.is_empty() {
            return true;
        }
        if !self.check_status(true) {
            return self.state == ConnectionState::Connected;
        }

        match self.flush_output() {
            Ok(()) => true,
            Err(e) => {
                error!("Send failed: {}", e);
                self.disconnect();
                false
            }
        }
    }

    /// Read what is available into the input buffer
    ///
    /// # Arguments
    /// * `unpack` - Inflate the bytes (ignored when compression is disabled)
    ///
    /// # Returns
    /// - `Ok(n)` - decoded bytes appended, 0 when nothing was ready
    /// - `Err(LinkError::Closed)` - the peer closed the connection
    /// - `Err(e)` - receive or decompression failure
    pub fn receive_data(&mut self, unpack: bool) -> Result<usize> {
        if !self.check_status(false) {
            return Ok(0);
        }

        let buffer_size = self.settings.net_buffer_size;
        let whole = match self.transport.as_mut() {
            Some(Transport::Socket(sock)) => sock.receive(&mut self.income_buf, buffer_size)?,
            Some(Transport::Interthread(link)) => link.take_received(&mut self.income_buf),
            None => return Err(LinkError::Closed),
        };
        if whole == 0 {
            return Ok(0);
        }

        self.net_in.shrink();
        let before = self.net_in.len();
        let data = &self.income_buf[..whole];
        if unpack && !self.settings.disable_compression {
            let inflate = self
                .inflate
                .as_mut()
                .ok_or_else(|| LinkError::Protocol("inflate stream not initialized".to_string()))?;
            inflate.inflate(data, self.net_in.storage_mut(), buffer_size)?;
        } else {
            self.net_in.append(data);
        }

        let produced = self.net_in.len() - before;
        self.traffic.bytes_received += whole as u64;
        self.traffic.bytes_real_received += produced as u64;
        if self.settings.debug_net {
            trace!("Received {} bytes ({} decoded)", whole, produced);
        }
        Ok(produced)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Transport currently open, if any
    pub fn transport_mode(&self) -> Option<TransportMode> {
        self.transport.as_ref().map(Transport::mode)
    }

    pub fn traffic(&self) -> TrafficStats {
        self.traffic
    }

    /// Round trip of the last answered ping
    pub fn ping(&self) -> Option<Duration> {
        self.last_ping
    }

    /// True while a ping request is waiting for its answer
    pub fn ping_outstanding(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Queue for outgoing messages, flushed by the next tick
    pub fn output(&mut self) -> &mut NetOutBuffer {
        &mut self.net_out
    }

    pub fn has_handler(&self, tag: u32) -> bool {
        self.handlers.has_handler(tag)
    }

    fn open_socket(&mut self) -> Result<()> {
        let target = socket::resolve_ipv4(&self.settings.server_host, self.settings.server_port)?;
        let disable_nagle = self.settings.disable_tcp_nagle;

        if !self.settings.proxy.is_enabled() {
            let sock = NetSocket::connect_nonblocking(target, disable_nagle)?;
            self.transport = Some(Transport::Socket(sock));
            return Ok(());
        }

        let proxy = self.settings.proxy.clone();
        let proxy_addr = socket::resolve_ipv4(&proxy.host, proxy.port)?;
        info!("Connecting through {} proxy '{}:{}'", proxy.kind, proxy.host, proxy.port);
        let sock = NetSocket::connect_blocking(proxy_addr, disable_nagle)?;
        self.transport = Some(Transport::Socket(sock));

        proxy::negotiate(&proxy, target, &mut ProxyExchange { conn: self })?;
        self.net_in.reset();
        self.net_out.reset();
        Ok(())
    }

    /// Readiness check shared by receive and send
    ///
    /// Also finishes a pending connect and notices an in-process peer
    /// hanging up, so it may change the connection state.
    fn check_status(&mut self, for_write: bool) -> bool {
        if let Some(gate) = self.lag_gate {
            if Instant::now() < gate {
                return false;
            }
            self.lag_gate = None;
        }

        let connect_result = match &self.transport {
            None => return false,
            Some(Transport::Interthread(link)) if link.disconnect_requested() => None,
            Some(Transport::Interthread(link)) => return for_write || link.has_data(),
            Some(Transport::Socket(_)) if self.state != ConnectionState::Connecting => return true,
            Some(Transport::Socket(sock)) => Some(sock.poll_connect()),
        };

        match connect_result {
            None => {
                info!("In-process server closed the connection");
                self.disconnect();
                false
            }
            Some(Ok(false)) => false,
            Some(Ok(true)) => {
                self.establish();
                true
            }
            Some(Err(e)) => {
                error!("Can't connect to server: {}", e);
                self.disconnect();
                false
            }
        }
    }

    fn establish(&mut self) {
        info!("Connection established");
        self.state = ConnectionState::Connected;
        self.send_handshake();
        self.fire_connect(true);
    }

    fn send_handshake(&mut self) {
        let key = generate_encrypt_key();
        Handshake::new(key).write_header(&mut self.net_out);
        self.net_out.set_encrypt_key(key);
        self.net_in.set_encrypt_key(key);
        Handshake::write_padding(&mut self.net_out);
        debug!("Handshake queued");
    }

    fn dispatch_messages(&mut self) {
        while self.state == ConnectionState::Connected
            && self.net_in.need_process(self.handlers.layouts())
        {
            let start = self.net_in.read_pos();
            let tag = self.net_in.read_u32();
            if self.settings.debug_net {
                self.msg_count += 1;
                debug!("{}) Input net message {:#010x}", self.msg_count, tag);
            }

            let size = match self.handlers.layouts().get(tag) {
                Some(MessageLayout::Fixed(size)) => Some(size),
                Some(MessageLayout::Sized) => self.net_in.peek_u32(0).map(|size| size as usize),
                None => None,
            };

            match self.handlers.kind(tag) {
                None => {
                    error!("No handler for message {:#010x}, disconnecting", tag);
                    self.disconnect();
                    return;
                }
                Some(HandlerKind::Disconnect) => {
                    info!("Server requested disconnect");
                    self.disconnect();
                    return;
                }
                Some(HandlerKind::Ping) => self.handle_ping(),
                Some(HandlerKind::Custom) => {
                    let mut disconnect = false;
                    if let Some(handler) = self.handlers.custom_mut(tag) {
                        let mut ctx = MessageContext::new(tag, &mut self.net_in, &mut self.net_out);
                        handler.handle(&mut ctx);
                        disconnect = ctx.disconnect_requested();
                    }
                    if disconnect {
                        info!("Handler for message {:#010x} closed the connection", tag);
                        self.disconnect();
                        return;
                    }
                }
            }

            if let Some(size) = size {
                match self.net_in.read_pos().checked_sub(start) {
                    Some(consumed) if consumed < size => {
                        warn!("Message {:#010x}: {} bytes left unread", tag, size - consumed);
                        self.net_in.skip(size - consumed);
                    }
                    Some(consumed) if consumed == size => {}
                    Some(consumed) => {
                        warn!("Message {:#010x}: handler read {} of {} bytes", tag, consumed, size);
                        self.net_in.set_error(true);
                    }
                    None => self.net_in.set_error(true),
                }
            }

            if self.net_in.is_error() {
                error!("Message {:#010x} is truncated or malformed, disconnecting", tag);
                self.disconnect();
                return;
            }
        }

        if self.net_in.is_error() {
            error!("Corrupt message size in input stream, disconnecting");
            self.disconnect();
        }
    }

    fn handle_ping(&mut self) {
        let kind = self.net_in.read_u8();
        match PingKind::from_u8(kind) {
            Some(PingKind::Request) => write_ping(&mut self.net_out, PingKind::Answer),
            Some(PingKind::Answer) => {
                let now = Instant::now();
                if let Some(sent_at) = self.ping_sent_at.take() {
                    let round_trip = now - sent_at;
                    self.last_ping = Some(round_trip);
                    if self.settings.debug_net {
                        debug!("Ping {} ms", round_trip.as_millis());
                    }
                }
                self.next_ping_at = now + self.settings.ping_period;
            }
            None => {
                warn!("Unknown ping kind {}", kind);
                self.net_in.set_error(true);
            }
        }
    }

    fn schedule_ping(&mut self) {
        if self.settings.ping_period.is_zero() || self.ping_sent_at.is_some() || !self.net_out.is_empty() {
            return;
        }
        let now = Instant::now();
        if now >= self.next_ping_at {
            write_ping(&mut self.net_out, PingKind::Request);
            self.ping_sent_at = Some(now);
        }
    }

    /// Push the output buffer into the transport without any state checks
    fn flush_output(&mut self) -> Result<()> {
        match self.transport.as_mut() {
            Some(Transport::Interthread(link)) => {
                let sent = self.net_out.len();
                link.send(self.net_out.data());
                self.net_out.discard(sent);
                self.traffic.bytes_sent += sent as u64;
            }
            Some(Transport::Socket(sock)) => {
                while !self.net_out.is_empty() {
                    match sock.send(self.net_out.data()) {
                        Ok(0) => {
                            return Err(LinkError::socket(
                                "sending",
                                io::Error::new(io::ErrorKind::WriteZero, "socket accepted no data"),
                            ))
                        }
                        Ok(sent) => {
                            self.net_out.discard(sent);
                            self.traffic.bytes_sent += sent as u64;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            trace!("Send would block, {} bytes kept for next tick", self.net_out.len());
                            break;
                        }
                        Err(e) => return Err(LinkError::socket("sending", e)),
                    }
                }
            }
            None => return Err(LinkError::Closed),
        }

        if self.net_out.is_empty() {
            self.net_out.reset();
        }
        Ok(())
    }

    fn fire_connect(&mut self, connected: bool) {
        if let Some(callback) = self.on_connect.as_mut() {
            callback(connected);
        }
    }
}

/// Proxy channel over the connection's own buffers and socket
struct ProxyExchange<'a> {
    conn: &'a mut ServerConnection,
}

impl ProxyChannel for ProxyExchange<'_> {
    fn exchange(&mut self, request: &[u8]) -> std::result::Result<Vec<u8>, ProxyError> {
        let conn = &mut *self.conn;
        let transport_error = |e: LinkError| ProxyError::Transport(e.to_string());

        conn.net_out.push_raw(request);
        let deadline = Instant::now() + conn.settings.proxy_timeout;
        loop {
            if !conn.net_out.is_empty() {
                conn.flush_output().map_err(transport_error)?;
            }
            if conn.receive_data(false).map_err(transport_error)? > 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ProxyError::Timeout);
            }
            thread::sleep(Duration::from_millis(1));
        }

        let unread = conn.net_in.unread_len();
        Ok(conn.net_in.read_bytes(unread))
    }
}
