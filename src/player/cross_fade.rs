//! Cross-fade planner
//!
//! Decides how many chunks of overlap two songs get. The plain mode overlaps
//! a fixed number of seconds with a linear ramp; MixRamp mode aligns the
//! overlap by the loudness markers both songs carry in their tags, shifted by
//! the configured threshold.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::chunk::CHUNK_SIZE;
use crate::audio::format::AudioFormat;

/// User-facing cross-fade settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossFadeSettings {
    /// Overlap duration in seconds; 0 disables cross-fading
    pub duration: f32,

    /// MixRamp threshold in dB, relative to full scale
    pub mixramp_db: f32,

    /// Extra overlap subtracted from the MixRamp alignment, in seconds;
    /// values <= 0 disable MixRamp mode
    pub mixramp_delay: f32,
}

impl Default for CrossFadeSettings {
    fn default() -> Self {
        Self {
            duration: 0.0,
            mixramp_db: 0.0,
            mixramp_delay: 0.0,
        }
    }
}

impl CrossFadeSettings {
    pub fn is_enabled(&self) -> bool {
        self.duration > 0.0 || self.is_mixramp_enabled()
    }

    pub fn is_mixramp_enabled(&self) -> bool {
        self.mixramp_delay > 0.0
    }

    /// Number of chunks of the outgoing song to overlap with the next song,
    /// or 0 when cross-fading is not possible for this transition.
    ///
    /// `total_time` is the next song's duration, `af` its audio format and
    /// `old_format` the format currently playing; a mismatch disables the
    /// fade. `max_chunks` caps the overlap at what the chunk pool can hold.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate(
        &self,
        total_time: Option<Duration>,
        replay_gain_db: f32,
        replay_gain_prev_db: f32,
        mixramp_start: Option<&str>,
        mixramp_prev_end: Option<&str>,
        af: AudioFormat,
        old_format: AudioFormat,
        max_chunks: usize,
    ) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        let duration = self.duration as f64;
        if let Some(total) = total_time {
            if duration >= total.as_secs_f64() {
                // song shorter than the fade: play it normally
                return 0;
            }
        }

        if af != old_format {
            debug!(%af, %old_format, "cross-fade refused: audio formats differ");
            return 0;
        }

        let chunks_per_second = af.time_rate() as f64 / CHUNK_SIZE as f64;

        let chunks = if self.is_mixramp_enabled() {
            match self.mixramp_overlap(
                replay_gain_db,
                replay_gain_prev_db,
                mixramp_start,
                mixramp_prev_end,
            ) {
                Some(overlap) if overlap > self.mixramp_delay as f64 => {
                    (chunks_per_second * (overlap - self.mixramp_delay as f64)) as usize
                }
                _ => {
                    debug!("no MixRamp overlap, falling back to fixed duration");
                    (chunks_per_second * duration + 0.5) as usize
                }
            }
        } else {
            (chunks_per_second * duration + 0.5) as usize
        };

        chunks.min(max_chunks)
    }

    /// Seconds of MixRamp overlap: the time the next song takes to ramp up
    /// to the threshold plus the time the previous song spends below it.
    fn mixramp_overlap(
        &self,
        replay_gain_db: f32,
        replay_gain_prev_db: f32,
        mixramp_start: Option<&str>,
        mixramp_prev_end: Option<&str>,
    ) -> Option<f64> {
        let start = mixramp_interpolate(mixramp_start?, self.mixramp_db - replay_gain_db)?;
        let end = mixramp_interpolate(mixramp_prev_end?, self.mixramp_db - replay_gain_prev_db)?;
        Some(start + end)
    }
}

/// Find the time at which a MixRamp marker list reaches `required_db`,
/// interpolating linearly between adjacent markers.
///
/// A marker list is `"<dB> <seconds>"` pairs separated by semicolons, in
/// ramp order.
fn mixramp_interpolate(marker_list: &str, required_db: f32) -> Option<f64> {
    let mut last: Option<(f64, f64)> = None;

    for entry in marker_list.split(';') {
        let mut fields = entry.split_whitespace();
        let db: f64 = fields.next()?.trim().parse().ok()?;
        let seconds: f64 = fields.next()?.trim().parse().ok()?;

        if db >= required_db as f64 {
            return Some(match last {
                None => seconds,
                Some((last_db, last_seconds)) if db > last_db => {
                    last_seconds + (seconds - last_seconds) * (required_db as f64 - last_db)
                        / (db - last_db)
                }
                Some(_) => seconds,
            });
        }
        last = Some((db, seconds));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleFormat;

    fn format() -> AudioFormat {
        AudioFormat::new(44100, SampleFormat::S16, 2)
    }

    #[test]
    fn disabled_by_default() {
        let settings = CrossFadeSettings::default();
        assert!(!settings.is_enabled());
        let chunks = settings.calculate(
            Some(Duration::from_secs(180)),
            0.0,
            0.0,
            None,
            None,
            format(),
            format(),
            512,
        );
        assert_eq!(chunks, 0);
    }

    #[test]
    fn duration_to_chunks() {
        let settings = CrossFadeSettings {
            duration: 4.0,
            ..Default::default()
        };
        let chunks = settings.calculate(
            Some(Duration::from_secs(180)),
            0.0,
            0.0,
            None,
            None,
            format(),
            format(),
            10_000,
        );
        // 176400 bytes/s over 4096-byte chunks for 4 seconds
        let expected = (176_400.0 * 4.0 / 4096.0 + 0.5) as usize;
        assert_eq!(chunks, expected);
    }

    #[test]
    fn format_mismatch_disables() {
        let settings = CrossFadeSettings {
            duration: 4.0,
            ..Default::default()
        };
        let other = AudioFormat::new(48000, SampleFormat::S16, 2);
        let chunks = settings.calculate(
            Some(Duration::from_secs(180)),
            0.0,
            0.0,
            None,
            None,
            other,
            format(),
            512,
        );
        assert_eq!(chunks, 0);
    }

    #[test]
    fn short_song_disables() {
        let settings = CrossFadeSettings {
            duration: 10.0,
            ..Default::default()
        };
        let chunks = settings.calculate(
            Some(Duration::from_secs(5)),
            0.0,
            0.0,
            None,
            None,
            format(),
            format(),
            512,
        );
        assert_eq!(chunks, 0);
    }

    #[test]
    fn capped_by_buffer() {
        let settings = CrossFadeSettings {
            duration: 30.0,
            ..Default::default()
        };
        let chunks = settings.calculate(
            Some(Duration::from_secs(180)),
            0.0,
            0.0,
            None,
            None,
            format(),
            format(),
            64,
        );
        assert_eq!(chunks, 64);
    }

    #[test]
    fn interpolate_exact_and_between() {
        // ramp hitting -3 dB at 1.0s and 0 dB at 2.0s
        let list = "-3.0 1.0;0.0 2.0";
        assert_eq!(mixramp_interpolate(list, -3.0), Some(1.0));
        let mid = mixramp_interpolate(list, -1.5).unwrap();
        assert!((mid - 1.5).abs() < 1e-9);
        // required level never reached
        assert_eq!(mixramp_interpolate(list, 3.0), None);
    }

    #[test]
    fn mixramp_mode_aligns_by_markers() {
        let settings = CrossFadeSettings {
            duration: 0.0,
            mixramp_db: -3.0,
            mixramp_delay: 1.0,
        };
        assert!(settings.is_mixramp_enabled());

        // next song ramps up to -3 dB at 2s; previous song's tail crosses
        // -3 dB at 3s: overlap 5s minus 1s delay = 4s worth of chunks
        let chunks = settings.calculate(
            Some(Duration::from_secs(180)),
            0.0,
            0.0,
            Some("-6.0 0.0;-3.0 2.0"),
            Some("-6.0 1.0;-3.0 3.0"),
            format(),
            format(),
            10_000,
        );
        let expected = (176_400.0 * 4.0 / 4096.0) as usize;
        assert_eq!(chunks, expected);
    }
}
