use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::{NetDevice, NetError};

pub const TX_QUEUE_CAPACITY: usize = 256;

/// Shared handle to the frames a [`TxQueueDevice`] has transmitted.
#[derive(Clone, Default)]
pub struct TxQueue {
    frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.frames.lock().pop_front()
    }

    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.frames.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    fn push(&self, frame: &[u8]) -> Result<(), NetError> {
        let mut frames = self.frames.lock();
        if frames.len() >= TX_QUEUE_CAPACITY {
            return Err(NetError::TxBusy);
        }
        frames.push_back(frame.to_vec());
        Ok(())
    }
}

/// Device that parks outgoing frames in a [`TxQueue`].
///
/// A host driver (or a test) drains the queue and moves the frames to the
/// real medium. This keeps the engine free of any hardware knowledge.
pub struct TxQueueDevice {
    mac: [u8; 6],
    mtu: usize,
    queue: TxQueue,
}

impl TxQueueDevice {
    pub fn new(mac: [u8; 6]) -> (Self, TxQueue) {
        let queue = TxQueue::new();
        let device = Self {
            mac,
            mtu: 1500,
            queue: queue.clone(),
        };
        (device, queue)
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }
}

impl NetDevice for TxQueueDevice {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError> {
        if frame.len() > self.mtu + 14 {
            return Err(NetError::BufferTooSmall);
        }
        self.queue.push(frame)
    }
}
