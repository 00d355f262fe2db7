//! Chunk allocator
//!
//! A fixed pool of [`MusicChunk`]s with a free list. Exhaustion is the only
//! backpressure mechanism between the outputs and the decoder: when every
//! chunk is in flight, `allocate` returns `None` and the decoder waits on the
//! shared condition variable until the player returns chunks.

use std::sync::Mutex;

use tracing::debug;

use crate::audio::chunk::MusicChunk;

/// Counters describing the pool, for diagnostics and leak tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub capacity: usize,
    pub free: usize,
    pub allocated: usize,
}

struct BufferInner {
    free: Vec<Box<MusicChunk>>,
    allocated: usize,
}

/// Fixed-size pool of chunks.
pub struct MusicBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
}

impl MusicBuffer {
    /// Pre-allocate a pool of `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer must hold at least one chunk");
        debug!(capacity, "allocating chunk pool");

        let free = (0..capacity).map(|_| Box::new(MusicChunk::new())).collect();
        Self {
            capacity,
            inner: Mutex::new(BufferInner { free, allocated: 0 }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a chunk from the free list; `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<Box<MusicChunk>> {
        let mut inner = self.inner.lock().unwrap();
        let chunk = inner.free.pop()?;
        inner.allocated += 1;
        Some(chunk)
    }

    /// Return a chunk (and its companion, if any) to the free list.
    pub fn return_chunk(&self, mut chunk: Box<MusicChunk>) {
        if let Some(other) = chunk.other.take() {
            self.return_chunk(other);
        }

        chunk.reset();

        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.allocated > 0);
        inner.allocated -= 1;
        inner.free.push(chunk);
        debug_assert!(inner.free.len() + inner.allocated == self.capacity);
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock().unwrap();
        BufferStats {
            capacity: self.capacity,
            free: inner.free.len(),
            allocated: inner.allocated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_exhausted() {
        let buffer = MusicBuffer::new(3);
        let a = buffer.allocate().unwrap();
        let b = buffer.allocate().unwrap();
        let c = buffer.allocate().unwrap();
        assert!(buffer.allocate().is_none());

        let stats = buffer.stats();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.free, 0);

        buffer.return_chunk(a);
        buffer.return_chunk(b);
        buffer.return_chunk(c);

        let stats = buffer.stats();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.free, 3);
    }

    #[test]
    fn accounting_invariant_holds() {
        let buffer = MusicBuffer::new(4);
        let held: Vec<_> = (0..2).map(|_| buffer.allocate().unwrap()).collect();
        let stats = buffer.stats();
        assert_eq!(stats.free + stats.allocated, stats.capacity);
        for chunk in held {
            buffer.return_chunk(chunk);
        }
    }

    #[test]
    fn companion_returns_with_chunk() {
        let buffer = MusicBuffer::new(2);
        let mut outgoing = buffer.allocate().unwrap();
        let companion = buffer.allocate().unwrap();
        outgoing.other = Some(companion);
        assert_eq!(buffer.stats().allocated, 2);

        buffer.return_chunk(outgoing);
        let stats = buffer.stats();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.free, 2);
    }
}
