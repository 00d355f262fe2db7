//! Replay-gain filter
//!
//! Applies the per-song gain as a streaming multiplication. The output source
//! feeds it new gain data whenever a chunk's replay-gain serial changes; a
//! scale of exactly 1.0 short-circuits into a copy.

use tracing::debug;

use crate::audio::format::{AudioFormat, SampleFormat};
use crate::error::Result;
use crate::filter::{Filter, PreparedFilter};
use crate::replay_gain::{ReplayGainConfig, ReplayGainInfo, ReplayGainMode};

/// Factory for [`ReplayGainFilter`] instances.
#[derive(Debug, Clone)]
pub struct PreparedReplayGainFilter {
    config: ReplayGainConfig,
}

impl PreparedReplayGainFilter {
    pub fn new(config: ReplayGainConfig) -> Self {
        Self { config }
    }

    /// Open the concrete filter type. The output source needs the concrete
    /// type (not `dyn Filter`) so it can push new gain data mid-stream.
    pub fn open(&self, format: AudioFormat) -> ReplayGainFilter {
        ReplayGainFilter {
            format,
            config: self.config,
            mode: ReplayGainMode::Off,
            info: None,
            scale: 1.0,
        }
    }
}

impl PreparedFilter for PreparedReplayGainFilter {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn Filter>> {
        Ok(Box::new(PreparedReplayGainFilter::open(self, format)))
    }
}

/// Streaming gain multiplier for one output.
pub struct ReplayGainFilter {
    format: AudioFormat,
    config: ReplayGainConfig,
    mode: ReplayGainMode,
    info: Option<ReplayGainInfo>,
    scale: f32,
}

impl ReplayGainFilter {
    pub fn set_mode(&mut self, mode: ReplayGainMode) {
        if self.mode != mode {
            self.mode = mode;
            self.update();
        }
    }

    /// Replace the gain data when a new song (serial) starts.
    pub fn set_info(&mut self, info: Option<ReplayGainInfo>) {
        self.info = info;
        self.update();
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    fn update(&mut self) {
        self.scale = if self.mode == ReplayGainMode::Off {
            1.0
        } else {
            let tuple = self.info.unwrap_or_default().get(self.mode);
            tuple.calc_scale(&self.config)
        };
        debug!(scale = self.scale, mode = ?self.mode, "replay gain updated");
    }

    fn apply(&self, src: &[u8]) -> Vec<u8> {
        match self.format.format {
            SampleFormat::S16 => src
                .chunks_exact(2)
                .flat_map(|b| {
                    let sample = i16::from_ne_bytes([b[0], b[1]]) as f32 * self.scale;
                    let sample = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    sample.to_ne_bytes()
                })
                .collect(),
            SampleFormat::S32 => src
                .chunks_exact(4)
                .flat_map(|b| {
                    let sample =
                        i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64 * self.scale as f64;
                    let sample = sample.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                    sample.to_ne_bytes()
                })
                .collect(),
            SampleFormat::F32 => src
                .chunks_exact(4)
                .flat_map(|b| {
                    let sample = f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) * self.scale;
                    sample.to_ne_bytes()
                })
                .collect(),
        }
    }
}

impl Filter for ReplayGainFilter {
    fn out_format(&self) -> AudioFormat {
        self.format
    }

    fn filter(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        if self.scale == 1.0 {
            return Ok(src.to_vec());
        }
        Ok(self.apply(src))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay_gain::ReplayGainTuple;

    fn filter() -> ReplayGainFilter {
        PreparedReplayGainFilter::new(ReplayGainConfig::default())
            .open(AudioFormat::new(44100, SampleFormat::F32, 2))
    }

    fn info(gain: f32) -> ReplayGainInfo {
        ReplayGainInfo {
            track: ReplayGainTuple { gain, peak: 0.0 },
            album: ReplayGainTuple::UNDEFINED,
        }
    }

    #[test]
    fn off_mode_is_unity() {
        let mut f = filter();
        f.set_info(Some(info(-6.0)));
        assert_eq!(f.scale(), 1.0);
    }

    #[test]
    fn track_mode_scales_samples() {
        let mut f = filter();
        f.set_mode(ReplayGainMode::Track);
        f.set_info(Some(info(-6.0)));
        let scale = f.scale();
        assert!((scale - 0.501).abs() < 0.01);

        let src: Vec<u8> = 1.0f32.to_ne_bytes().to_vec();
        let out = f.filter(&src).unwrap();
        let sample = f32::from_ne_bytes([out[0], out[1], out[2], out[3]]);
        assert!((sample - scale).abs() < 1e-6);
    }

    #[test]
    fn missing_info_uses_missing_preamp() {
        let mut f = PreparedReplayGainFilter::new(ReplayGainConfig {
            missing_preamp: -20.0,
            ..Default::default()
        })
        .open(AudioFormat::new(44100, SampleFormat::S16, 2));
        f.set_mode(ReplayGainMode::Track);
        f.set_info(None);
        assert!((f.scale() - 0.1).abs() < 0.001);

        let src: Vec<u8> = 10000i16.to_ne_bytes().to_vec();
        let out = f.filter(&src).unwrap();
        let sample = i16::from_ne_bytes([out[0], out[1]]);
        assert!((sample - 1000).abs() < 10);
    }
}
