//! Fixed-capacity circular byte queues.
//!
//! Two of these exist per port (RX and TX). They decouple bursty USB
//! completions from stream-style read/write calls: the transport fills RX and
//! drains TX in packet-sized bursts while consumers move single bytes or
//! slices. The queue itself never blocks and carries no lock; every instance
//! lives inside the port's `Mutex`, so all mutation happens under the
//! port-level lock.

use thiserror::Error;

/// Returned by [`CircularQueue::push_byte`] when no space is left.
///
/// The rejected byte is not stored and the cursors are untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is full")]
pub struct QueueFull;

/// A fixed-capacity byte ring buffer with peek-ahead support.
///
/// `read == write` is ambiguous between empty and full; `used` disambiguates.
/// A queue holding exactly one byte is a valid, distinguishable state — the
/// byte-stuffing path depends on it to hold a lone escape byte while its
/// partner is still in flight.
#[derive(Debug)]
pub struct CircularQueue {
    buffer: Box<[u8]>,
    read: usize,
    write: usize,
    used: usize,
}

impl CircularQueue {
    /// Allocate a queue of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn used_space(&self) -> usize {
        self.used
    }

    pub fn free_space(&self) -> usize {
        self.buffer.len() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.buffer.len()
    }

    /// Append one byte, or report [`QueueFull`] without side effects.
    pub fn push_byte(&mut self, value: u8) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull);
        }
        self.buffer[self.write] = value;
        self.write += 1;
        if self.write == self.buffer.len() {
            self.write = 0;
        }
        self.used += 1;
        Ok(())
    }

    /// Remove and return the oldest byte, or `None` when empty.
    pub fn pop_byte(&mut self) -> Option<u8> {
        if self.used == 0 {
            return None;
        }
        let value = self.buffer[self.read];
        self.read += 1;
        if self.read == self.buffer.len() {
            self.read = 0;
        }
        self.used -= 1;
        Some(value)
    }

    /// Read the byte `offset` positions ahead of the read cursor without
    /// consuming it. Offset 0 is the next byte [`pop_byte`] would return.
    ///
    /// [`pop_byte`]: CircularQueue::pop_byte
    pub fn peek_byte(&self, offset: usize) -> Option<u8> {
        if offset >= self.used {
            return None;
        }
        let mut index = self.read + offset;
        if index >= self.buffer.len() {
            index -= self.buffer.len();
        }
        Some(self.buffer[index])
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    pub fn push_bytes(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        for &byte in data {
            if self.push_byte(byte).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Drain up to `out.len()` bytes into `out`; returns the number moved.
    pub fn pop_bytes(&mut self, out: &mut [u8]) -> usize {
        let mut read = 0;
        while read < out.len() {
            match self.pop_byte() {
                Some(byte) => {
                    out[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        read
    }

    /// Drop all content and return both cursors to the start of the buffer.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
        self.used = 0;
    }
}
