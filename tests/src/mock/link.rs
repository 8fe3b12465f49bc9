//! Two real stacks joined by a lossless wire
//!
//! Frames transmitted by one side are delivered to the other on [`Link::pump`],
//! until both directions are quiet. Ticks advance both stacks together.

use nexa_net::net::drivers::{TxQueue, TxQueueDevice};
use nexa_net::net::ethernet::MacAddress;
use nexa_net::net::ipv4::Ipv4Address;
use nexa_net::net::NetStack;
use nexa_net::NetConfig;

pub const A_MAC: MacAddress = MacAddress::new([0x52, 0x54, 0x00, 0x00, 0x00, 0x0a]);
pub const B_MAC: MacAddress = MacAddress::new([0x52, 0x54, 0x00, 0x00, 0x00, 0x0b]);
pub const A_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 15);
pub const B_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 16);

/// Upper bound on frames moved by one pump; a livelock fails the test.
const MAX_FRAMES_PER_PUMP: usize = 10_000;

pub struct Link {
    pub a: NetStack,
    pub b: NetStack,
    a_tx: TxQueue,
    b_tx: TxQueue,
    /// Drop every frame instead of delivering it
    pub cut: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl Link {
    pub fn new() -> Self {
        super::init_logging();
        let (a_dev, a_tx) = TxQueueDevice::new(*A_MAC.as_bytes());
        let (b_dev, b_tx) = TxQueueDevice::new(*B_MAC.as_bytes());
        let a = NetStack::with_device(NetConfig::default().with_address(A_IP), Box::new(a_dev));
        let b = NetStack::with_device(NetConfig::default().with_address(B_IP), Box::new(b_dev));
        Self {
            a,
            b,
            a_tx,
            b_tx,
            cut: false,
        }
    }

    /// Shuttle frames until neither side has anything queued. Returns the
    /// number of frames moved.
    pub fn pump(&mut self) -> usize {
        let mut moved = 0;
        loop {
            let from_a = self.a_tx.drain();
            let from_b = self.b_tx.drain();
            if from_a.is_empty() && from_b.is_empty() {
                return moved;
            }
            moved += from_a.len() + from_b.len();
            assert!(moved < MAX_FRAMES_PER_PUMP, "link did not settle");
            if self.cut {
                continue;
            }
            for frame in &from_a {
                let _ = self.b.handle_frame(frame);
            }
            for frame in &from_b {
                let _ = self.a.handle_frame(frame);
            }
        }
    }

    /// Advance both stacks by `elapsed_ms`, then pump.
    pub fn tick(&mut self, elapsed_ms: u64) {
        self.a.tick(elapsed_ms);
        self.b.tick(elapsed_ms);
        self.pump();
    }

    /// Tick in `step_ms` increments for `total_ms`.
    pub fn run_for(&mut self, total_ms: u64, step_ms: u64) {
        let mut elapsed = 0;
        while elapsed < total_ms {
            self.tick(step_ms);
            elapsed += step_ms;
        }
    }
}
