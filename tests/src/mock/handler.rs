//! Counting protocol handler for IP dispatch tests

use core::any::Any;
use std::sync::{Arc, Mutex};

use nexa_net::net::buffer::NetBuf;
use nexa_net::net::ipv4::{Ipv4Address, Ipv4Layer};
use nexa_net::net::protocol::ProtocolHandler;
use nexa_net::NetError;

/// One delivered packet: source, destination, payload.
pub type Delivered = (Ipv4Address, Ipv4Address, Vec<u8>);

/// Records every payload the IP layer hands it.
pub struct CountingHandler {
    delivered: Arc<Mutex<Vec<Delivered>>>,
}

impl CountingHandler {
    /// Handler plus the shared record of its deliveries.
    pub fn new() -> (Self, Arc<Mutex<Vec<Delivered>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                delivered: delivered.clone(),
            },
            delivered,
        )
    }
}

impl ProtocolHandler for CountingHandler {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn receive(
        &mut self,
        _ip: &mut Ipv4Layer,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: NetBuf,
    ) -> Result<(), NetError> {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((src, dst, payload.to_vec()));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
