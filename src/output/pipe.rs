//! Outputs-side chunk pipe with shared consumers
//!
//! The player pushes every played chunk into this pipe exactly once; each
//! open output walks it through its own [`SharedPipeConsumer`] cursor, so all
//! outputs see the chunks in enqueue order. A chunk returns to the pool when
//! every registered consumer has consumed it. With a single output this
//! degenerates to a plain pop-and-return FIFO.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::audio::buffer::MusicBuffer;
use crate::audio::chunk::MusicChunk;

struct Entry {
    chunk: Arc<MusicChunk>,

    /// Number of registered consumers that have not consumed this entry yet
    remaining: usize,
}

struct OutputPipeInner {
    entries: VecDeque<Entry>,

    /// Sequence number of `entries[0]`
    head_seq: u64,

    /// Number of registered consumers
    consumers: usize,

    /// Chunks that could not be unwrapped at collection time because a
    /// consumer still held a reference; retried on the next collect
    orphans: Vec<Arc<MusicChunk>>,
}

impl OutputPipeInner {
    fn tail_seq(&self) -> u64 {
        self.head_seq + self.entries.len() as u64
    }

    fn entry_mut(&mut self, seq: u64) -> Option<&mut Entry> {
        let index = seq.checked_sub(self.head_seq)? as usize;
        self.entries.get_mut(index)
    }
}

/// The shared chunk queue between the player and all open outputs.
pub struct OutputPipe {
    inner: Mutex<OutputPipeInner>,
}

impl OutputPipe {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(OutputPipeInner {
                entries: VecDeque::new(),
                head_seq: 0,
                consumers: 0,
                orphans: Vec::new(),
            }),
        }
    }

    /// Enqueue a chunk for all currently registered consumers.
    pub fn push(&self, chunk: Box<MusicChunk>) {
        let mut inner = self.inner.lock().unwrap();
        let remaining = inner.consumers;
        inner.entries.push_back(Entry {
            chunk: Arc::new(*chunk),
            remaining,
        });
    }

    /// Current depth in chunks.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Return every fully-consumed head entry to the pool. Returns the
    /// number of chunks still queued afterwards.
    pub fn collect(&self, buffer: &MusicBuffer) -> usize {
        let mut inner = self.inner.lock().unwrap();

        // retry chunks a slow consumer still referenced last time
        let orphans = std::mem::take(&mut inner.orphans);
        for orphan in orphans {
            reclaim(orphan, buffer, &mut inner.orphans);
        }

        loop {
            let head_done = matches!(inner.entries.front(), Some(e) if e.remaining == 0);
            if !head_done {
                break;
            }
            if let Some(entry) = inner.entries.pop_front() {
                inner.head_seq += 1;
                reclaim(entry.chunk, buffer, &mut inner.orphans);
            }
        }

        inner.entries.len()
    }

    /// Drop every queued chunk back into the pool regardless of consumption
    /// state. Consumers must have dropped their references first.
    pub fn clear(&self, buffer: &MusicBuffer) {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.entries.len() as u64;
        let entries: Vec<Entry> = inner.entries.drain(..).collect();
        inner.head_seq += count;
        for entry in entries {
            reclaim(entry.chunk, buffer, &mut inner.orphans);
        }
    }
}

impl Default for OutputPipe {
    fn default() -> Self {
        Self::new()
    }
}

fn reclaim(chunk: Arc<MusicChunk>, buffer: &MusicBuffer, orphans: &mut Vec<Arc<MusicChunk>>) {
    match Arc::try_unwrap(chunk) {
        Ok(chunk) => buffer.return_chunk(Box::new(chunk)),
        Err(still_shared) => {
            warn!("chunk still referenced at collection time");
            orphans.push(still_shared);
        }
    }
}

/// One output's cursor into the [`OutputPipe`].
///
/// Registered on creation, deregistered on drop; an entry only returns to
/// the pool when every cursor has passed it.
pub struct SharedPipeConsumer {
    pipe: Arc<OutputPipe>,

    /// Sequence number of the next entry to hand out
    next_seq: u64,

    /// Entry handed out by `get` but not yet consumed
    held: Option<u64>,
}

impl SharedPipeConsumer {
    /// Register a new consumer starting at the pipe's current tail.
    pub fn new(pipe: Arc<OutputPipe>) -> Self {
        let next_seq = {
            let mut inner = pipe.inner.lock().unwrap();
            inner.consumers += 1;
            inner.tail_seq()
        };
        Self {
            pipe,
            next_seq,
            held: None,
        }
    }

    /// The next chunk for this consumer, or `None` when it has caught up
    /// with the tail. The previous chunk must have been consumed.
    pub fn get(&mut self) -> Option<Arc<MusicChunk>> {
        debug_assert!(self.held.is_none(), "get without consuming the last chunk");

        let mut inner = self.pipe.inner.lock().unwrap();
        if self.next_seq < inner.head_seq {
            // the pipe was cleared under us
            self.next_seq = inner.head_seq;
        }
        let seq = self.next_seq;
        let chunk = inner.entry_mut(seq).map(|e| Arc::clone(&e.chunk))?;
        self.next_seq = seq + 1;
        self.held = Some(seq);
        Some(chunk)
    }

    /// Mark the chunk returned by the last `get` as fully consumed. The
    /// caller must have dropped its `Arc` clone already.
    pub fn consume(&mut self) {
        let Some(seq) = self.held.take() else {
            return;
        };
        let mut inner = self.pipe.inner.lock().unwrap();
        if let Some(entry) = inner.entry_mut(seq) {
            debug_assert!(entry.remaining > 0);
            entry.remaining = entry.remaining.saturating_sub(1);
        }
    }

    /// Forget the held chunk (e.g. after a cancel); bookkeeping-wise this is
    /// the same as consuming it.
    pub fn cancel(&mut self) {
        self.consume();
    }
}

impl Drop for SharedPipeConsumer {
    fn drop(&mut self) {
        // release the held entry first
        self.cancel();

        let mut inner = self.pipe.inner.lock().unwrap();
        debug_assert!(inner.consumers > 0);
        inner.consumers -= 1;

        // entries this consumer never reached are no longer waiting for it
        let (head_seq, tail_seq) = (inner.head_seq, inner.tail_seq());
        let from = self.next_seq.max(head_seq);
        for seq in from..tail_seq {
            if let Some(entry) = inner.entry_mut(seq) {
                entry.remaining = entry.remaining.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::{AudioFormat, SampleFormat};

    fn filled_chunk(buffer: &MusicBuffer, marker: u8) -> Box<MusicChunk> {
        let format = AudioFormat::new(44100, SampleFormat::S16, 2);
        let mut chunk = buffer.allocate().unwrap();
        let dest = chunk.write(format).unwrap();
        dest[0] = marker;
        chunk.expand(format, 4);
        chunk
    }

    #[test]
    fn single_consumer_round_trip() {
        let buffer = MusicBuffer::new(4);
        let pipe = Arc::new(OutputPipe::new());
        let mut consumer = SharedPipeConsumer::new(Arc::clone(&pipe));

        pipe.push(filled_chunk(&buffer, 7));
        let chunk = consumer.get().unwrap();
        assert_eq!(chunk.data()[0], 7);

        drop(chunk);
        consumer.consume();
        assert_eq!(pipe.collect(&buffer), 0);
        assert_eq!(buffer.stats().free, 4);
    }

    #[test]
    fn chunk_waits_for_all_consumers() {
        let buffer = MusicBuffer::new(2);
        let pipe = Arc::new(OutputPipe::new());
        let mut a = SharedPipeConsumer::new(Arc::clone(&pipe));
        let mut b = SharedPipeConsumer::new(Arc::clone(&pipe));

        pipe.push(filled_chunk(&buffer, 1));

        let chunk_a = consumer_take(&mut a);
        assert_eq!(chunk_a, 1);
        // only one of two consumers done: the chunk stays queued
        assert_eq!(pipe.collect(&buffer), 1);
        assert_eq!(buffer.stats().free, 1);

        let chunk_b = consumer_take(&mut b);
        assert_eq!(chunk_b, 1);
        assert_eq!(pipe.collect(&buffer), 0);
        assert_eq!(buffer.stats().free, 2);
    }

    fn consumer_take(consumer: &mut SharedPipeConsumer) -> u8 {
        let chunk = consumer.get().unwrap();
        let marker = chunk.data()[0];
        drop(chunk);
        consumer.consume();
        marker
    }

    #[test]
    fn late_consumer_sees_only_new_chunks() {
        let buffer = MusicBuffer::new(4);
        let pipe = Arc::new(OutputPipe::new());
        let mut first = SharedPipeConsumer::new(Arc::clone(&pipe));

        pipe.push(filled_chunk(&buffer, 1));
        let mut late = SharedPipeConsumer::new(Arc::clone(&pipe));
        pipe.push(filled_chunk(&buffer, 2));

        assert_eq!(consumer_take(&mut first), 1);
        assert_eq!(consumer_take(&mut first), 2);
        // the late consumer starts at the tail as of registration
        assert_eq!(consumer_take(&mut late), 2);
        assert_eq!(pipe.collect(&buffer), 0);
        assert_eq!(buffer.stats().free, 4);
    }

    #[test]
    fn dropping_consumer_releases_entries() {
        let buffer = MusicBuffer::new(2);
        let pipe = Arc::new(OutputPipe::new());
        let mut a = SharedPipeConsumer::new(Arc::clone(&pipe));
        let b = SharedPipeConsumer::new(Arc::clone(&pipe));

        pipe.push(filled_chunk(&buffer, 1));
        assert_eq!(consumer_take(&mut a), 1);
        assert_eq!(pipe.collect(&buffer), 1);

        // the second consumer leaves without ever reading
        drop(b);
        assert_eq!(pipe.collect(&buffer), 0);
        assert_eq!(buffer.stats().free, 2);
    }

    #[test]
    fn clear_is_idempotent() {
        let buffer = MusicBuffer::new(3);
        let pipe = Arc::new(OutputPipe::new());
        let _consumer = SharedPipeConsumer::new(Arc::clone(&pipe));

        pipe.push(filled_chunk(&buffer, 1));
        pipe.push(filled_chunk(&buffer, 2));
        pipe.clear(&buffer);
        assert!(pipe.is_empty());
        assert_eq!(buffer.stats().free, 3);

        pipe.clear(&buffer);
        assert_eq!(buffer.stats().free, 3);
    }
}
