//! In-process transport
//!
//! A server running in the same process registers a listener on a port.
//! When a client connects to that port it skips the socket entirely: the
//! listener receives the client's delivery callback and returns the callback
//! the client sends through. An empty payload in either direction means
//! "disconnect".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives bytes from the other side
pub type InterthreadDataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Accepts a client: takes the client's delivery callback, returns its own
pub type InterthreadListener = Arc<dyn Fn(InterthreadDataCallback) -> InterthreadDataCallback + Send + Sync>;

/// Port → listener table shared between an in-process server and its clients
#[derive(Default)]
pub struct InterthreadRegistry {
    listeners: Mutex<HashMap<u16, InterthreadListener>>,
}

impl InterthreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `port`. A listener already there is replaced.
    pub fn register<F>(&self, port: u16, listener: F)
    where
        F: Fn(InterthreadDataCallback) -> InterthreadDataCallback + Send + Sync + 'static,
    {
        if self.listeners.lock().insert(port, Arc::new(listener)).is_some() {
            warn!("Interthread listener on port {} replaced", port);
        } else {
            debug!("Interthread listener registered on port {}", port);
        }
    }

    /// Stop listening on `port`. Returns whether a listener was registered.
    pub fn unregister(&self, port: u16) -> bool {
        self.listeners.lock().remove(&port).is_some()
    }

    pub fn find(&self, port: u16) -> Option<InterthreadListener> {
        self.listeners.lock().get(&port).cloned()
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.listeners.lock().contains_key(&port)
    }
}

/// Bytes delivered by the peer, waiting for the owning thread
#[derive(Default)]
struct Inbox {
    received: Mutex<Vec<u8>>,
    disconnect_requested: AtomicBool,
}

impl Inbox {
    fn deliver(&self, data: &[u8]) {
        if data.is_empty() {
            self.disconnect_requested.store(true, Ordering::Release);
        } else {
            self.received.lock().extend_from_slice(data);
        }
    }
}

/// Client end of an in-process connection
pub struct InterthreadLink {
    send: Option<InterthreadDataCallback>,
    inbox: Arc<Inbox>,
}

impl InterthreadLink {
    /// Connect to `listener`, handing it our delivery callback
    pub fn open(listener: &InterthreadListener) -> Self {
        let inbox = Arc::new(Inbox::default());
        let delivery: InterthreadDataCallback = {
            let inbox = Arc::clone(&inbox);
            Arc::new(move |data: &[u8]| inbox.deliver(data))
        };
        let send = listener(delivery);
        Self {
            send: Some(send),
            inbox,
        }
    }

    /// Hand `data` to the peer. Empty slices are ignored; use [`InterthreadLink::close`].
    pub fn send(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(send) = &self.send {
            send(data);
        }
    }

    pub fn has_data(&self) -> bool {
        !self.inbox.received.lock().is_empty()
    }

    /// Move everything delivered so far into `buf`, replacing its contents
    pub fn take_received(&self, buf: &mut Vec<u8>) -> usize {
        let mut received = self.inbox.received.lock();
        buf.clear();
        std::mem::swap(buf, &mut *received);
        buf.len()
    }

    pub fn disconnect_requested(&self) -> bool {
        self.inbox.disconnect_requested.load(Ordering::Acquire)
    }

    /// Tear down, telling the peer unless it asked for this itself
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for InterthreadLink {
    fn drop(&mut self) {
        if let Some(send) = self.send.take() {
            if !self.disconnect_requested() {
                send(&[]);
            }
        }
    }
}
