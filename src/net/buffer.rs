//! Network buffer with reserved head and tail room
//!
//! A [`NetBuf`] carries one packet through the layers. Outbound, each layer
//! prepends its header with [`NetBuf::push_head`]; inbound, each layer strips
//! its header with [`NetBuf::pull_head`]. Running out of headroom grows the
//! allocation instead of failing.

use alloc::vec;
use alloc::vec::Vec;

use super::drivers::NetError;

/// Room for Ethernet + IPv4 + TCP headers without reallocation.
pub const DEFAULT_HEADROOM: usize = 64;

#[derive(Clone)]
pub struct NetBuf {
    storage: Vec<u8>,
    head: usize,
    tail: usize,
}

impl NetBuf {
    pub fn new(headroom: usize, capacity: usize) -> Self {
        Self {
            storage: vec![0u8; headroom + capacity],
            head: headroom,
            tail: headroom,
        }
    }

    /// Copy `data` into a buffer with `headroom` bytes reserved in front.
    pub fn from_slice(headroom: usize, data: &[u8]) -> Self {
        let mut buf = Self::new(headroom, data.len());
        buf.push_tail(data.len()).copy_from_slice(data);
        buf
    }

    /// Outbound payload with room for all protocol headers.
    pub fn for_payload(data: &[u8]) -> Self {
        Self::from_slice(DEFAULT_HEADROOM, data)
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    pub fn tailroom(&self) -> usize {
        self.storage.len() - self.tail
    }

    pub fn data(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.tail]
    }

    /// Extend the data region `n` bytes to the front and return it.
    pub fn push_head(&mut self, n: usize) -> &mut [u8] {
        if self.head < n {
            let grow = n - self.head + DEFAULT_HEADROOM;
            let mut storage = vec![0u8; grow + self.storage.len()];
            storage[grow..].copy_from_slice(&self.storage);
            self.storage = storage;
            self.head += grow;
            self.tail += grow;
        }
        self.head -= n;
        let head = self.head;
        let region = &mut self.storage[head..head + n];
        region.fill(0);
        region
    }

    /// Extend the data region `n` bytes at the end and return it.
    pub fn push_tail(&mut self, n: usize) -> &mut [u8] {
        if self.tailroom() < n {
            let needed = self.tail + n;
            self.storage.resize(needed, 0);
        }
        let start = self.tail;
        self.tail += n;
        let region = &mut self.storage[start..self.tail];
        region.fill(0);
        region
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.push_tail(data.len()).copy_from_slice(data);
    }

    /// Drop `n` bytes from the front (a header that has been parsed).
    pub fn pull_head(&mut self, n: usize) -> Result<(), NetError> {
        if n > self.len() {
            return Err(NetError::Truncated);
        }
        self.head += n;
        Ok(())
    }

    /// Drop `n` bytes from the end.
    pub fn pull_tail(&mut self, n: usize) -> Result<(), NetError> {
        if n > self.len() {
            return Err(NetError::Truncated);
        }
        self.tail -= n;
        Ok(())
    }

    /// Shorten the data region to `len` bytes (link-layer padding removal).
    pub fn trim(&mut self, len: usize) {
        if len < self.len() {
            self.tail = self.head + len;
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }
}

impl core::fmt::Debug for NetBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetBuf")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
