//! Replay-gain data and gain math
//!
//! Per-song loudness normalization. The decoder reads replay-gain data from
//! the stream and stamps it onto chunks; the output source turns it into a
//! linear scale factor applied by the replay-gain filter.

use serde::{Deserialize, Serialize};

/// Gain/peak pair for one scope (track or album), in dB / linear peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainTuple {
    /// Gain adjustment in dB
    pub gain: f32,

    /// Peak sample amplitude (linear, 1.0 = full scale); 0 when unknown
    pub peak: f32,
}

impl ReplayGainTuple {
    pub const UNDEFINED: Self = Self {
        gain: f32::NEG_INFINITY,
        peak: 0.0,
    };

    pub fn is_defined(&self) -> bool {
        self.gain > f32::NEG_INFINITY
    }
}

impl Default for ReplayGainTuple {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// Replay-gain data for one song, holding both scopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    pub track: ReplayGainTuple,
    pub album: ReplayGainTuple,
}

impl ReplayGainInfo {
    pub fn is_defined(&self) -> bool {
        self.track.is_defined() || self.album.is_defined()
    }

    /// The tuple selected by `mode`, falling back to the other scope when the
    /// preferred one is undefined.
    pub fn get(&self, mode: ReplayGainMode) -> ReplayGainTuple {
        match mode {
            ReplayGainMode::Off => ReplayGainTuple::UNDEFINED,
            ReplayGainMode::Track | ReplayGainMode::Auto => {
                if self.track.is_defined() {
                    self.track
                } else {
                    self.album
                }
            }
            ReplayGainMode::Album => {
                if self.album.is_defined() {
                    self.album
                } else {
                    self.track
                }
            }
        }
    }
}

/// Which replay-gain scope to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
    /// Track mode, letting callers switch to album for album playback
    Auto,
}

/// Static replay-gain configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayGainConfig {
    /// Preamp in dB applied to songs with replay-gain data
    pub preamp: f32,

    /// Preamp in dB applied to songs without replay-gain data
    pub missing_preamp: f32,

    /// Prevent the scale from pushing the known peak past full scale
    pub limit: bool,
}

impl Default for ReplayGainConfig {
    fn default() -> Self {
        Self {
            preamp: 0.0,
            missing_preamp: 0.0,
            limit: true,
        }
    }
}

impl ReplayGainTuple {
    /// Linear scale factor for this tuple under the given configuration.
    pub fn calc_scale(&self, config: &ReplayGainConfig) -> f32 {
        if !self.is_defined() {
            return db_to_scale(config.missing_preamp);
        }

        let mut scale = db_to_scale(self.gain + config.preamp);
        if config.limit && self.peak > 0.0 && scale * self.peak > 1.0 {
            scale = 1.0 / self.peak;
        }
        scale
    }
}

fn db_to_scale(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_tuple() {
        let t = ReplayGainTuple::default();
        assert!(!t.is_defined());

        let t = ReplayGainTuple { gain: -6.0, peak: 0.5 };
        assert!(t.is_defined());
    }

    #[test]
    fn mode_selection_falls_back() {
        let info = ReplayGainInfo {
            track: ReplayGainTuple { gain: -3.0, peak: 1.0 },
            album: ReplayGainTuple::UNDEFINED,
        };
        // Album mode falls back to the track tuple
        assert_eq!(info.get(ReplayGainMode::Album).gain, -3.0);
        assert!(!info.get(ReplayGainMode::Off).is_defined());
    }

    #[test]
    fn scale_math() {
        let config = ReplayGainConfig::default();
        let t = ReplayGainTuple { gain: -6.0, peak: 0.0 };
        let scale = t.calc_scale(&config);
        assert!((scale - 0.501).abs() < 0.01);

        // +20 dB would scale 10x, but the peak limit caps it at 1/peak
        let t = ReplayGainTuple { gain: 20.0, peak: 0.5 };
        let scale = t.calc_scale(&config);
        assert!((scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn missing_preamp_applies_without_info() {
        let config = ReplayGainConfig {
            missing_preamp: -6.0,
            ..Default::default()
        };
        let scale = ReplayGainTuple::UNDEFINED.calc_scale(&config);
        assert!((scale - 0.501).abs() < 0.01);
    }
}
