//! Streaming PCM transformer contract
//!
//! Filters are instantiated per output when it opens; a `PreparedFilter` is
//! the reusable factory, a `Filter` the per-stream instance. The output
//! source runs the replay-gain filters and the configured filter chain over
//! every chunk before handing bytes to the device driver.

pub mod chain;
pub mod replay_gain;

pub use chain::{FilterChain, PreparedFilterChain};
pub use replay_gain::{PreparedReplayGainFilter, ReplayGainFilter};

use crate::audio::format::AudioFormat;
use crate::error::Result;

/// A filter instance bound to one input format.
pub trait Filter: Send {
    /// Format of the data produced by [`filter`](Self::filter).
    fn out_format(&self) -> AudioFormat;

    /// Transform one block of PCM data.
    fn filter(&mut self, src: &[u8]) -> Result<Vec<u8>>;

    /// Discard internal state after a cancel/seek.
    fn reset(&mut self) {}
}

/// Factory creating [`Filter`] instances for a concrete input format.
pub trait PreparedFilter: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn Filter>>;
}
