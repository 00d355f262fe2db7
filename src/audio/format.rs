//! PCM audio format descriptor
//!
//! Every chunk that flows through the pipe carries one of these so that the
//! outputs can detect format changes and rebuild their filter chains.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample encoding of interleaved PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16 bit native-endian integers
    S16,
    /// Signed 32 bit native-endian integers
    S32,
    /// 32 bit floats in the range [-1.0, 1.0]
    F32,
}

impl SampleFormat {
    /// Size of one sample of this format in bytes
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::S16 => write!(f, "16"),
            SampleFormat::S32 => write!(f, "32"),
            SampleFormat::F32 => write!(f, "f"),
        }
    }
}

/// Description of an interleaved PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Sample encoding
    pub format: SampleFormat,

    /// Number of interleaved channels
    pub channels: u8,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, format: SampleFormat, channels: u8) -> Self {
        Self {
            sample_rate,
            format,
            channels,
        }
    }

    /// A format is valid when all three attributes are plausible.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.sample_rate < 192_000 * 4 && self.channels > 0 && self.channels <= 8
    }

    /// Size of one frame (one sample per channel) in bytes
    pub fn frame_size(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }

    /// Number of bytes per second of audio in this format
    pub fn time_rate(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }

    /// Convert a duration to the (frame-aligned) number of bytes it occupies
    pub fn time_to_size(&self, t: Duration) -> usize {
        let frames = (t.as_secs_f64() * self.sample_rate as f64) as usize;
        frames * self.frame_size()
    }

    /// Convert a byte count to the playback time it represents
    pub fn size_to_time(&self, size: usize) -> Duration {
        let frames = size / self.frame_size();
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.format, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        assert_eq!(af.frame_size(), 4);
        assert_eq!(af.time_rate(), 176_400);

        let af = AudioFormat::new(48000, SampleFormat::F32, 2);
        assert_eq!(af.frame_size(), 8);
    }

    #[test]
    fn time_size_round_trip() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        let size = af.time_to_size(Duration::from_secs(1));
        assert_eq!(size, 176_400);
        assert_eq!(af.size_to_time(size), Duration::from_secs(1));
    }

    #[test]
    fn display() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        assert_eq!(af.to_string(), "44100:16:2");
        let af = AudioFormat::new(48000, SampleFormat::F32, 1);
        assert_eq!(af.to_string(), "48000:f:1");
    }

    #[test]
    fn validity() {
        assert!(AudioFormat::new(44100, SampleFormat::S16, 2).is_valid());
        assert!(!AudioFormat::new(0, SampleFormat::S16, 2).is_valid());
        assert!(!AudioFormat::new(44100, SampleFormat::S16, 0).is_valid());
    }
}
