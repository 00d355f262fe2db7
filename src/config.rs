//! Engine configuration
//!
//! The surrounding daemon parses its configuration file and hands the engine
//! one of these. Defaults follow the classic 4 MiB chunk pool with a 10%
//! pre-play buffer.

use serde::{Deserialize, Serialize};

use crate::audio::chunk::CHUNK_SIZE;
use crate::audio::format::AudioFormat;
use crate::replay_gain::ReplayGainConfig;

/// Default chunk pool size: 4 MiB worth of chunks.
pub const DEFAULT_BUFFER_CHUNKS: usize = 4 * 1024 * 1024 / CHUNK_SIZE;

/// Static configuration of the playback engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Number of chunks in the shared allocator pool
    pub buffer_chunks: usize,

    /// Number of decoded chunks to accumulate before playback starts
    pub buffered_before_play: usize,

    /// Force this output format regardless of what the decoder produces;
    /// `None` follows the song's native format
    pub audio_format: Option<AudioFormat>,

    /// Replay-gain preamp/limit settings
    pub replay_gain: ReplayGainConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: DEFAULT_BUFFER_CHUNKS,
            buffered_before_play: DEFAULT_BUFFER_CHUNKS / 10,
            audio_format: None,
            replay_gain: ReplayGainConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Clamp nonsensical values to workable minimums.
    pub fn sanitize(mut self) -> Self {
        if self.buffer_chunks < 4 {
            self.buffer_chunks = 4;
        }
        if self.buffered_before_play >= self.buffer_chunks {
            self.buffered_before_play = self.buffer_chunks / 2;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.buffer_chunks, 1024);
        assert_eq!(config.buffered_before_play, 102);
        assert!(config.audio_format.is_none());
    }

    #[test]
    fn sanitize_clamps() {
        let config = PlayerConfig {
            buffer_chunks: 1,
            buffered_before_play: 50,
            ..Default::default()
        }
        .sanitize();
        assert_eq!(config.buffer_chunks, 4);
        assert!(config.buffered_before_play < config.buffer_chunks);
    }
}
