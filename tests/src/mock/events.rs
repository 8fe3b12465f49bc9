//! Recording socket event sink

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nexa_net::net::tcp::{SharedEvents, SocketEvents, SocketHandle};

/// Counts every callback and remembers which socket it was for.
#[derive(Default)]
pub struct RecordingEvents {
    connected: AtomicUsize,
    data_ready: AtomicUsize,
    sent_bytes: AtomicUsize,
    closed: AtomicUsize,
    last_available: AtomicUsize,
    log: Mutex<Vec<(&'static str, SocketHandle)>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink to hand to the stack; the test keeps the original `Arc`.
    pub fn shared(self: &Arc<Self>) -> SharedEvents {
        self.clone()
    }

    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn data_ready_count(&self) -> usize {
        self.data_ready.load(Ordering::SeqCst)
    }

    pub fn sent_bytes(&self) -> usize {
        self.sent_bytes.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// `available` reported by the latest data-ready callback.
    pub fn last_available(&self) -> usize {
        self.last_available.load(Ordering::SeqCst)
    }

    /// Callbacks received, in order.
    pub fn log(&self) -> Vec<(&'static str, SocketHandle)> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, what: &'static str, handle: SocketHandle) {
        if let Ok(mut log) = self.log.lock() {
            log.push((what, handle));
        }
    }
}

impl SocketEvents for RecordingEvents {
    fn connected(&self, handle: SocketHandle) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        self.record("connected", handle);
    }

    fn data_ready(&self, handle: SocketHandle, available: usize) {
        self.data_ready.fetch_add(1, Ordering::SeqCst);
        self.last_available.store(available, Ordering::SeqCst);
        self.record("data_ready", handle);
    }

    fn sent(&self, handle: SocketHandle, bytes: usize) {
        self.sent_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.record("sent", handle);
    }

    fn closed(&self, handle: SocketHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.record("closed", handle);
    }
}
