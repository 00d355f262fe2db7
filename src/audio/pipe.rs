//! Decoder-to-player chunk FIFO
//!
//! The `MusicPipe` is the rendezvous between the decoder thread (producer)
//! and the player thread (consumer). Chunks are dequeued in enqueue order;
//! cancellation returns every queued chunk to the pool. The pipe never
//! blocks; waiting happens on the controls' condition variables.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::audio::buffer::MusicBuffer;
use crate::audio::chunk::MusicChunk;
use crate::audio::format::AudioFormat;

struct PipeInner {
    chunks: VecDeque<Box<MusicChunk>>,

    /// Format of the chunks currently in the pipe (debug consistency check)
    audio_format: Option<AudioFormat>,
}

/// Ordered FIFO of chunks between the decoder and the player.
pub struct MusicPipe {
    inner: Mutex<PipeInner>,
}

impl MusicPipe {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PipeInner {
                chunks: VecDeque::new(),
                audio_format: None,
            }),
        }
    }

    /// Enqueue a filled chunk at the tail.
    pub fn push(&self, chunk: Box<MusicChunk>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(format) = chunk.format {
            debug_assert!(
                inner.audio_format.is_none() || inner.audio_format == Some(format),
                "chunk format changed without a pipe flush"
            );
            inner.audio_format = Some(format);
        }
        inner.chunks.push_back(chunk);
    }

    /// Dequeue the head chunk, transferring ownership to the caller.
    pub fn shift(&self) -> Option<Box<MusicChunk>> {
        let mut inner = self.inner.lock().unwrap();
        let chunk = inner.chunks.pop_front();
        if inner.chunks.is_empty() {
            inner.audio_format = None;
        }
        chunk
    }

    /// Drop every queued chunk back into the pool.
    pub fn clear(&self, buffer: &MusicBuffer) {
        let mut inner = self.inner.lock().unwrap();
        while let Some(chunk) = inner.chunks.pop_front() {
            buffer.return_chunk(chunk);
        }
        inner.audio_format = None;
    }

    /// Current depth in chunks.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().chunks.is_empty()
    }

    /// Format of the queued chunks, if any are present.
    pub fn peek_format(&self) -> Option<AudioFormat> {
        self.inner.lock().unwrap().audio_format
    }
}

impl Default for MusicPipe {
    fn default() -> Self {
        Self::new()
    }
}
