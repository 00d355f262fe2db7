//! Symphonia decoder plugin
//!
//! Streaming decode of the common container/codec families (MP3, FLAC, OGG
//! Vorbis, WAV) via symphonia. Decoded audio is submitted as interleaved f32
//! samples; file streams are seekable with coarse (packet) precision.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

use crate::audio::format::{AudioFormat, SampleFormat};
use crate::decoder::command::DecoderCommand;
use crate::decoder::plugin::{DecoderClient, DecoderPlugin};
use crate::error::{Error, Result};
use crate::replay_gain::{ReplayGainInfo, ReplayGainTuple};
use crate::tag::{MixRampInfo, Tag, TagType};

const SUFFIXES: &[&str] = &["mp3", "flac", "ogg", "oga", "wav", "wave", "mka"];

pub struct SymphoniaDecoderPlugin;

impl DecoderPlugin for SymphoniaDecoderPlugin {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn supports_suffix(&self, suffix: &str) -> bool {
        SUFFIXES.iter().any(|s| suffix.eq_ignore_ascii_case(s))
    }

    fn decode(&self, client: &mut dyn DecoderClient, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(suffix) = path.extension().and_then(|s| s.to_str()) {
            hint.with_extension(suffix);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decoder(format!("probe failed: {e}")))?;
        let mut reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decoder("no audio track found".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Decoder("sample rate unknown".into()))?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u8)
            .ok_or_else(|| Error::Decoder("channel count unknown".into()))?;

        let total_time = codec_params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decoder(format!("no codec: {e}")))?;

        let format = AudioFormat::new(sample_rate, SampleFormat::F32, channels);
        debug!(%format, ?total_time, "stream opened");
        client.ready(format, true, total_time);

        // metadata known up front: tag snapshot plus replay gain
        {
            let metadata = reader.metadata();
            if let Some(revision) = metadata.current() {
                let (tag, replay_gain) = convert_metadata(revision, total_time);
                client.submit_replay_gain(replay_gain);
                if tag.has(TagType::MixRampStart) || tag.has(TagType::MixRampEnd) {
                    client.submit_mix_ramp(MixRampInfo::from_tag(&tag));
                }
                if !tag.is_empty() && client.submit_tag(tag) == DecoderCommand::Stop {
                    return Ok(());
                }
            }
        }

        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            match client.get_command() {
                DecoderCommand::Stop => return Ok(()),
                DecoderCommand::Seek => {
                    let target = client.seek_time();
                    let seek_to = SeekTo::Time {
                        time: Time::from(target.as_secs_f64()),
                        track_id: Some(track_id),
                    };
                    match reader.seek(SeekMode::Coarse, seek_to) {
                        Ok(_) => {
                            decoder.reset();
                            client.command_finished();
                        }
                        Err(e) => {
                            warn!(%e, "seek failed");
                            client.seek_error();
                        }
                    }
                }
                _ => {}
            }

            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(Error::Decoder(format!("read failed: {e}"))),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // recoverable corruption; skip the packet
                    warn!(%e, "decode error, skipping packet");
                    continue;
                }
                Err(e) => return Err(Error::Decoder(format!("decode failed: {e}"))),
            };

            let spec = *decoded.spec();
            let needed_samples = decoded.capacity() * spec.channels.count();
            let needs_new = match sample_buf.as_ref() {
                Some(buf) => buf.capacity() < needed_samples,
                None => true,
            };
            if needs_new {
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let bytes: Vec<u8> = buf
                .samples()
                .iter()
                .flat_map(|s| s.to_ne_bytes())
                .collect();

            let frames = buf.samples().len() / channels as usize;
            let kbit_rate = packet_kbit_rate(packet.data.len(), frames, sample_rate);

            match client.submit_data(&bytes, kbit_rate) {
                DecoderCommand::Stop => return Ok(()),
                _ => continue,
            }
        }

        Ok(())
    }
}

/// Rough instantaneous bit rate of the compressed stream in kbit/s.
fn packet_kbit_rate(compressed_len: usize, frames: usize, sample_rate: u32) -> u16 {
    if frames == 0 {
        return 0;
    }
    let seconds = frames as f64 / sample_rate as f64;
    ((compressed_len * 8) as f64 / seconds / 1000.0) as u16
}

fn convert_metadata(
    revision: &MetadataRevision,
    total_time: Option<Duration>,
) -> (Tag, Option<ReplayGainInfo>) {
    let mut tag = Tag::new();
    tag.duration = total_time;
    let mut replay_gain = ReplayGainInfo::default();

    for item in revision.tags() {
        let value = item.value.to_string();
        match item.std_key {
            Some(StandardTagKey::Artist) => tag.add(TagType::Artist, value),
            Some(StandardTagKey::Album) => tag.add(TagType::Album, value),
            Some(StandardTagKey::AlbumArtist) => tag.add(TagType::AlbumArtist, value),
            Some(StandardTagKey::TrackTitle) => tag.add(TagType::Title, value),
            Some(StandardTagKey::TrackNumber) => tag.add(TagType::Track, value),
            Some(StandardTagKey::Genre) => tag.add(TagType::Genre, value),
            Some(StandardTagKey::Date) => tag.add(TagType::Date, value),
            Some(StandardTagKey::Comment) => tag.add(TagType::Comment, value),
            Some(StandardTagKey::ReplayGainTrackGain) => {
                if let Some(gain) = parse_db(&value) {
                    replay_gain.track.gain = gain;
                }
            }
            Some(StandardTagKey::ReplayGainTrackPeak) => {
                if let Ok(peak) = value.trim().parse() {
                    replay_gain.track.peak = peak;
                }
            }
            Some(StandardTagKey::ReplayGainAlbumGain) => {
                if let Some(gain) = parse_db(&value) {
                    replay_gain.album.gain = gain;
                }
            }
            Some(StandardTagKey::ReplayGainAlbumPeak) => {
                if let Ok(peak) = value.trim().parse() {
                    replay_gain.album.peak = peak;
                }
            }
            _ => match item.key.to_ascii_uppercase().as_str() {
                "MIXRAMP_START" => tag.add(TagType::MixRampStart, value),
                "MIXRAMP_END" => tag.add(TagType::MixRampEnd, value),
                _ => {}
            },
        }
    }

    let replay_gain = replay_gain.is_defined().then_some(replay_gain);
    (tag, replay_gain)
}

/// Parse a replay-gain value like "-6.50 dB".
fn parse_db(value: &str) -> Option<f32> {
    value
        .trim()
        .trim_end_matches("dB")
        .trim_end_matches("DB")
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_support() {
        let plugin = SymphoniaDecoderPlugin;
        assert!(plugin.supports_suffix("mp3"));
        assert!(plugin.supports_suffix("FLAC"));
        assert!(!plugin.supports_suffix("txt"));
    }

    #[test]
    fn db_parsing() {
        assert_eq!(parse_db("-6.50 dB"), Some(-6.5));
        assert_eq!(parse_db("2.1"), Some(2.1));
        assert_eq!(parse_db("junk"), None);
    }

    #[test]
    fn bit_rate_estimate() {
        // 417 bytes for 1152 frames at 44100 Hz is ~128 kbit/s
        let rate = packet_kbit_rate(417, 1152, 44100);
        assert!((120..140).contains(&rate));
        assert_eq!(packet_kbit_rate(100, 0, 44100), 0);
    }

    #[test]
    fn replay_gain_tuple_from_tags() {
        let tuple = ReplayGainTuple { gain: -6.5, peak: 0.9 };
        assert!(tuple.is_defined());
    }
}
