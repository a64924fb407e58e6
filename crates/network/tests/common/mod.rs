//! Shared fixtures: an in-process server peer and callback recorders

#![allow(dead_code)]

use gamelink_network::{
    InterthreadDataCallback, InterthreadRegistry, NetworkSettings, ServerConnection,
};
use gamelink_protocol::{DeflateStream, Handshake, NetInBuffer, NetOutBuffer, COMPATIBILITY_VERSION};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the connect and disconnect callbacks reported
#[derive(Clone, Default)]
pub struct CallbackLog {
    pub connects: Rc<RefCell<Vec<bool>>>,
    pub disconnects: Rc<Cell<usize>>,
}

impl CallbackLog {
    pub fn attach(conn: &mut ServerConnection) -> Self {
        let log = Self::default();
        let connects = Rc::clone(&log.connects);
        conn.add_connect_handler(move |ok| connects.borrow_mut().push(ok));
        let disconnects = Rc::clone(&log.disconnects);
        conn.add_disconnect_handler(move || disconnects.set(disconnects.get() + 1));
        log
    }

    pub fn connects(&self) -> Vec<bool> {
        self.connects.borrow().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.get()
    }
}

/// Server side of an in-process link, speaking the wire format by hand
pub struct PeerServer {
    pub registry: Arc<InterthreadRegistry>,
    pub port: u16,
    to_client: Arc<Mutex<Option<InterthreadDataCallback>>>,
    inbound: Arc<Mutex<Vec<u8>>>,
    hang_ups: Arc<AtomicUsize>,
    net_in: NetInBuffer,
    net_out: NetOutBuffer,
    deflate: Option<DeflateStream>,
}

impl PeerServer {
    /// Listen on `port`; `compress` selects whether outbound bytes are deflated
    pub fn new(port: u16, compress: bool) -> Self {
        let registry = Arc::new(InterthreadRegistry::new());
        let to_client: Arc<Mutex<Option<InterthreadDataCallback>>> = Arc::new(Mutex::new(None));
        let inbound = Arc::new(Mutex::new(Vec::new()));
        let hang_ups = Arc::new(AtomicUsize::new(0));

        {
            let to_client = Arc::clone(&to_client);
            let inbound = Arc::clone(&inbound);
            let hang_ups = Arc::clone(&hang_ups);
            registry.register(port, move |client: InterthreadDataCallback| {
                *to_client.lock() = Some(client);
                let inbound = Arc::clone(&inbound);
                let hang_ups = Arc::clone(&hang_ups);
                Arc::new(move |data: &[u8]| {
                    if data.is_empty() {
                        hang_ups.fetch_add(1, Ordering::SeqCst);
                    } else {
                        inbound.lock().extend_from_slice(data);
                    }
                }) as InterthreadDataCallback
            });
        }

        Self {
            registry,
            port,
            to_client,
            inbound,
            hang_ups,
            net_in: NetInBuffer::new(1024),
            net_out: NetOutBuffer::new(1024),
            deflate: compress.then(DeflateStream::default),
        }
    }

    /// Settings pointing at this peer, pings off
    pub fn settings(&self) -> NetworkSettings {
        NetworkSettings {
            server_host: "127.0.0.1".to_string(),
            server_port: self.port,
            disable_compression: self.deflate.is_none(),
            ping_period: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn connection(&self, settings: NetworkSettings) -> ServerConnection {
        ServerConnection::with_interthread(settings, Arc::clone(&self.registry))
    }

    /// Move bytes the client sent into the input buffer
    pub fn pump(&mut self) -> usize {
        let data = std::mem::take(&mut *self.inbound.lock());
        self.net_in.append(&data);
        data.len()
    }

    /// Read the client handshake and switch both directions to its key
    pub fn accept_handshake(&mut self) -> Handshake {
        self.pump();
        let handshake = Handshake::read_header(&mut self.net_in).expect("handshake header");
        assert_eq!(handshake.version, COMPATIBILITY_VERSION);
        assert_ne!(handshake.key, 0);
        self.net_in.set_encrypt_key(handshake.key);
        self.net_out.set_encrypt_key(handshake.key);
        assert!(Handshake::read_padding(&mut self.net_in), "padding must decode to zeros");
        handshake
    }

    pub fn input(&mut self) -> &mut NetInBuffer {
        &mut self.net_in
    }

    pub fn output(&mut self) -> &mut NetOutBuffer {
        &mut self.net_out
    }

    /// Take queued output as wire bytes, deflated when compression is on
    pub fn encode(&mut self) -> Vec<u8> {
        let plain = self.net_out.data().to_vec();
        self.net_out.discard(plain.len());
        match self.deflate.as_mut() {
            Some(deflate) => deflate.deflate(&plain).expect("deflate"),
            None => plain,
        }
    }

    /// Encode and deliver queued output; returns the wire byte count
    pub fn flush(&mut self) -> usize {
        let wire = self.encode();
        self.deliver(&wire);
        wire.len()
    }

    pub fn deliver(&self, bytes: &[u8]) {
        let client = self.to_client.lock().clone().expect("no client connected");
        client(bytes);
    }

    /// Ask the client to disconnect
    pub fn hang_up(&self) {
        self.deliver(&[]);
    }

    /// Empty payloads received from the client
    pub fn hang_ups(&self) -> usize {
        self.hang_ups.load(Ordering::SeqCst)
    }
}
