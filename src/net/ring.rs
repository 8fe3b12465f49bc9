//! Fixed-capacity circular byte buffer used for per-socket data.

use alloc::boxed::Box;
use alloc::vec;

use super::drivers::NetError;

pub struct RingBuffer {
    storage: Box<[u8]>,
    start: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes currently stored.
    pub fn available(&self) -> usize {
        self.len
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.free());
        let cap = self.capacity();
        let mut pos = (self.start + self.len) % cap.max(1);
        for &byte in &data[..count] {
            self.storage[pos] = byte;
            pos += 1;
            if pos == cap {
                pos = 0;
            }
        }
        self.len += count;
        count
    }

    /// Append all of `data` or nothing.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), NetError> {
        if data.len() > self.free() {
            return Err(NetError::BufferTooSmall);
        }
        self.write(data);
        Ok(())
    }

    /// Copy up to `out.len()` bytes starting `offset` bytes into the buffer
    /// without consuming them.
    pub fn peek(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let count = out.len().min(self.len - offset);
        let cap = self.capacity();
        let mut pos = (self.start + offset) % cap;
        for slot in out[..count].iter_mut() {
            *slot = self.storage[pos];
            pos += 1;
            if pos == cap {
                pos = 0;
            }
        }
        count
    }

    /// Discard up to `n` bytes from the front.
    pub fn consume(&mut self, n: usize) -> usize {
        let count = n.min(self.len);
        if count == 0 {
            return 0;
        }
        self.start = (self.start + count) % self.capacity();
        self.len -= count;
        if self.len == 0 {
            self.start = 0;
        }
        count
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = self.peek(0, out);
        self.consume(count)
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }
}
