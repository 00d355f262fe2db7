//! Cross-fade PCM mixing
//!
//! Blends two buffers of equal length and format in place. A ratio in [0,1]
//! produces a linear blend (with triangular dither for 16 bit output); the
//! MixRamp mode sums both signals and relies on saturation to contain the
//! overlap.

use crate::audio::format::SampleFormat;
use crate::error::{Error, Result};

/// Triangular dither state for 16 bit blends.
///
/// Uses a deterministic xorshift generator so that identical inputs always
/// produce identical output, which the engine's reproducibility guarantees
/// depend on.
pub struct PcmDither {
    state: u32,
    previous: i32,
}

impl PcmDither {
    pub fn new() -> Self {
        Self {
            state: 0x2545_F491,
            previous: 0,
        }
    }

    fn next_noise(&mut self) -> i32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        // map to a small symmetric range, one LSB of 16 bit output
        (x & 0x3) as i32 - 2
    }

    /// Quantize a wide intermediate sample to i16 with triangular dither.
    fn dither_s16(&mut self, sample: i32) -> i16 {
        let noise = self.next_noise();
        let triangular = noise - self.previous;
        self.previous = noise;
        (sample + triangular).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl Default for PcmDither {
    fn default() -> Self {
        Self::new()
    }
}

/// Mix `other` into `dest` in place.
///
/// With `portion1` in [0,1]: `dest = dest * portion1 + other * (1 - portion1)`.
/// With a negative `portion1` (MixRamp): `dest = dest + other`, saturating.
///
/// Both buffers must have the same length, aligned to whole samples of
/// `format`.
pub fn mix(
    format: SampleFormat,
    dest: &mut [u8],
    other: &[u8],
    portion1: f32,
    dither: &mut PcmDither,
) -> Result<()> {
    if dest.len() != other.len() {
        return Err(Error::FormatMismatch(format));
    }

    match format {
        SampleFormat::S16 => mix_s16(dest, other, portion1, dither),
        SampleFormat::S32 => mix_s32(dest, other, portion1),
        SampleFormat::F32 => mix_f32(dest, other, portion1),
    }
    Ok(())
}

fn mix_s16(dest: &mut [u8], other: &[u8], portion1: f32, dither: &mut PcmDither) {
    for (d, o) in dest.chunks_exact_mut(2).zip(other.chunks_exact(2)) {
        let a = i16::from_ne_bytes([d[0], d[1]]) as i32;
        let b = i16::from_ne_bytes([o[0], o[1]]) as i32;
        let mixed = if portion1 < 0.0 {
            a + b
        } else {
            (a as f32 * portion1 + b as f32 * (1.0 - portion1)) as i32
        };
        let sample = dither.dither_s16(mixed);
        d.copy_from_slice(&sample.to_ne_bytes());
    }
}

fn mix_s32(dest: &mut [u8], other: &[u8], portion1: f32) {
    for (d, o) in dest.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
        let a = i32::from_ne_bytes([d[0], d[1], d[2], d[3]]) as i64;
        let b = i32::from_ne_bytes([o[0], o[1], o[2], o[3]]) as i64;
        let mixed = if portion1 < 0.0 {
            a + b
        } else {
            (a as f64 * portion1 as f64 + b as f64 * (1.0 - portion1 as f64)) as i64
        };
        let sample = mixed.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        d.copy_from_slice(&sample.to_ne_bytes());
    }
}

fn mix_f32(dest: &mut [u8], other: &[u8], portion1: f32) {
    for (d, o) in dest.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
        let a = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
        let b = f32::from_ne_bytes([o[0], o[1], o[2], o[3]]);
        let mixed = if portion1 < 0.0 {
            a + b
        } else {
            a * portion1 + b * (1.0 - portion1)
        };
        d.copy_from_slice(&mixed.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn f32_from(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn f32_linear_blend() {
        let mut dest = f32_bytes(&[1.0, 0.0]);
        let other = f32_bytes(&[0.0, 1.0]);
        let mut dither = PcmDither::new();
        mix(SampleFormat::F32, &mut dest, &other, 0.25, &mut dither).unwrap();
        let out = f32_from(&dest);
        assert!((out[0] - 0.25).abs() < 1e-6);
        assert!((out[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn f32_mixramp_sums() {
        let mut dest = f32_bytes(&[0.5, -0.25]);
        let other = f32_bytes(&[0.25, -0.25]);
        let mut dither = PcmDither::new();
        mix(SampleFormat::F32, &mut dest, &other, -1.0, &mut dither).unwrap();
        let out = f32_from(&dest);
        assert!((out[0] - 0.75).abs() < 1e-6);
        assert!((out[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn s16_blend_is_close_to_exact() {
        let a: i16 = 10000;
        let b: i16 = -10000;
        let mut dest: Vec<u8> = a.to_ne_bytes().to_vec();
        let other: Vec<u8> = b.to_ne_bytes().to_vec();
        let mut dither = PcmDither::new();
        mix(SampleFormat::S16, &mut dest, &other, 0.5, &mut dither).unwrap();
        let out = i16::from_ne_bytes([dest[0], dest[1]]);
        assert!(out.abs() < 8, "expected ~0, got {out}");
    }

    #[test]
    fn s16_mixramp_saturates() {
        let a: i16 = 30000;
        let b: i16 = 30000;
        let mut dest: Vec<u8> = a.to_ne_bytes().to_vec();
        let other: Vec<u8> = b.to_ne_bytes().to_vec();
        let mut dither = PcmDither::new();
        mix(SampleFormat::S16, &mut dest, &other, -1.0, &mut dither).unwrap();
        let out = i16::from_ne_bytes([dest[0], dest[1]]);
        assert!(out >= i16::MAX - 4);
    }

    #[test]
    fn length_mismatch_fails() {
        let mut dest = vec![0u8; 8];
        let other = vec![0u8; 4];
        let mut dither = PcmDither::new();
        let err = mix(SampleFormat::F32, &mut dest, &other, 0.5, &mut dither);
        assert!(err.is_err());
    }
}
