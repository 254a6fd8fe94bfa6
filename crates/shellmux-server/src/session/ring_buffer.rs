//! Chunked output buffer for replay on session reattach.
//!
//! Holds the most recent output chunks of a terminal so that a reconnecting
//! client can catch up on what it missed. Eviction works on whole chunks from
//! the oldest end: a chunk is one read from the process and is never split.

use std::collections::VecDeque;

/// A bounded, append-only store of byte chunks.
#[derive(Debug)]
pub struct RingBuffer {
    chunks: VecDeque<Vec<u8>>,
    capacity: usize,
    total_bytes: usize,
}

impl RingBuffer {
    /// Create a new ring buffer holding up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            capacity,
            total_bytes: 0,
        }
    }

    /// Append a chunk, evicting the oldest chunks while over capacity.
    ///
    /// The chunk just appended is never evicted by its own insertion, so a
    /// single chunk larger than `capacity` leaves the buffer over capacity
    /// until the next append.
    pub fn append(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }

        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);

        while self.total_bytes > self.capacity && self.chunks.len() > 1 {
            if let Some(head) = self.chunks.pop_front() {
                self.total_bytes -= head.len();
            }
        }
    }

    /// Concatenate all retained chunks, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }

    /// Number of bytes currently retained.
    pub fn len(&self) -> usize {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    /// Number of chunks currently retained.
    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
