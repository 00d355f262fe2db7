//! Fixed-size PCM chunks
//!
//! A `MusicChunk` is the unit of transfer between the decoder, the player and
//! the outputs. Chunks come out of the shared `MusicBuffer` pool, travel
//! through a `MusicPipe` and return to the pool once every output has played
//! them.

use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::replay_gain::ReplayGainInfo;
use crate::tag::Tag;

/// Capacity of one chunk's PCM region in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Replay-gain serial that disables replay gain for a chunk even when a gain
/// filter is installed (used e.g. for generated silence).
pub const REPLAY_GAIN_IGNORE: u32 = u32::MAX;

/// One fixed-capacity region of PCM data plus its metadata.
pub struct MusicChunk {
    data: Box<[u8; CHUNK_SIZE]>,

    /// Number of valid bytes in `data`
    pub length: usize,

    /// Format of the PCM data; set by the first write after a reset
    pub format: Option<AudioFormat>,

    /// Song time at the beginning of this chunk, if known
    pub time: Option<Duration>,

    /// Current bit rate of the source stream in kbit/s
    pub bit_rate: u16,

    /// Metadata snapshot delivered by the stream at this position
    pub tag: Option<Tag>,

    /// Companion chunk of the next song, mixed in during a cross-fade.
    /// Owned by this chunk; returned to the pool together with it.
    pub other: Option<Box<MusicChunk>>,

    /// Cross-fade mix ratio in [0,1]; negative means MixRamp additive mixing
    pub mix_ratio: f32,

    /// Replay-gain scope serial; increments when the gain scope changes,
    /// `REPLAY_GAIN_IGNORE` bypasses the gain filter, 0 means "no data yet"
    pub replay_gain_serial: u32,

    /// Replay-gain data valid when `replay_gain_serial` is a real serial
    pub replay_gain_info: Option<ReplayGainInfo>,
}

impl MusicChunk {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; CHUNK_SIZE]),
            length: 0,
            format: None,
            time: None,
            bit_rate: 0,
            tag: None,
            other: None,
            mix_ratio: 1.0,
            replay_gain_serial: 0,
            replay_gain_info: None,
        }
    }

    /// Prepare this chunk for reuse. The companion must have been detached
    /// beforehand; dropping it here would bypass the pool accounting.
    pub fn reset(&mut self) {
        debug_assert!(self.other.is_none());
        self.length = 0;
        self.format = None;
        self.time = None;
        self.bit_rate = 0;
        self.tag = None;
        self.mix_ratio = 1.0;
        self.replay_gain_serial = 0;
        self.replay_gain_info = None;
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Does this chunk hold data of the given format (or no data yet)?
    pub fn check_format(&self, other: &AudioFormat) -> bool {
        match self.format {
            None => true,
            Some(ref f) => f == other,
        }
    }

    /// The writable tail of the chunk for the given format, or `None` when
    /// the chunk is full. The first write pins the chunk's format.
    pub fn write(&mut self, format: AudioFormat) -> Option<&mut [u8]> {
        if !self.check_format(&format) {
            return None;
        }

        if self.length + format.frame_size() > CHUNK_SIZE {
            return None;
        }

        self.format = Some(format);
        Some(&mut self.data[self.length..])
    }

    /// Commit `nbytes` previously written into the region handed out by
    /// [`write`](Self::write). Returns true when the chunk is now full.
    pub fn expand(&mut self, format: AudioFormat, nbytes: usize) -> bool {
        debug_assert!(self.length + nbytes <= CHUNK_SIZE);
        debug_assert_eq!(self.format, Some(format));

        self.length += nbytes;
        self.length + format.frame_size() > CHUNK_SIZE
    }

    /// The valid PCM data of this chunk.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }
}

impl Default for MusicChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MusicChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicChunk")
            .field("length", &self.length)
            .field("format", &self.format)
            .field("time", &self.time)
            .field("has_tag", &self.tag.is_some())
            .field("has_other", &self.other.is_some())
            .field("mix_ratio", &self.mix_ratio)
            .field("replay_gain_serial", &self.replay_gain_serial)
            .finish()
    }
}
