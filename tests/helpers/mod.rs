//! Shared test fixtures: a deterministic tone decoder plugin, a recording
//! output driver and an engine builder.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use aulos::audio::format::{AudioFormat, SampleFormat};
use aulos::config::PlayerConfig;
use aulos::decoder::command::DecoderCommand;
use aulos::decoder::plugin::{DecoderClient, DecoderPlugin};
use aulos::error::{Error, Result};
use aulos::events::EventBus;
use aulos::filter::PreparedFilterChain;
use aulos::output::driver::AudioOutputDriver;
use aulos::player::PlayerControl;
use aulos::replay_gain::ReplayGainInfo;
use aulos::song::Song;
use aulos::tag::Tag;

/// Frames per submission; one chunk's worth for f32 stereo.
const BLOCK_FRAMES: u64 = 512;

/// Decoder plugin producing a constant sample value, configured through the
/// file name: `<value>_<seconds>[_<sample_rate>].mock`. The value doubles as
/// a watermark so tests can tell the songs apart in recorded output.
pub struct MockDecoderPlugin {
    pub seekable: bool,
    pub replay_gain: Option<ReplayGainInfo>,

    /// Deliver a mid-stream title update once this position is reached
    pub tag_at: Option<(f64, &'static str)>,
}

impl Default for MockDecoderPlugin {
    fn default() -> Self {
        Self {
            seekable: true,
            replay_gain: None,
            tag_at: None,
        }
    }
}

struct MockParams {
    value: f32,
    seconds: f64,
    sample_rate: u32,
}

fn parse_params(path: &Path) -> Result<MockParams> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Decoder("mock: bad file name".into()))?;
    let mut fields = stem.split('_');

    let value: f32 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::FileRead {
            path: path.to_path_buf(),
            message: "mock: cannot open".into(),
        })?;
    let seconds: f64 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1.0);
    let sample_rate: u32 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(44100);

    Ok(MockParams {
        value,
        seconds,
        sample_rate,
    })
}

impl DecoderPlugin for MockDecoderPlugin {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supports_suffix(&self, suffix: &str) -> bool {
        suffix == "mock"
    }

    fn decode(&self, client: &mut dyn DecoderClient, path: &Path) -> Result<()> {
        let params = parse_params(path)?;
        let format = AudioFormat::new(params.sample_rate, SampleFormat::F32, 2);
        let total_frames = (params.seconds * params.sample_rate as f64) as u64;
        let total = Duration::from_secs_f64(params.seconds);

        client.ready(format, self.seekable, Some(total));
        client.submit_replay_gain(self.replay_gain);

        let mut position: u64 = 0;
        let mut tag_sent = false;
        loop {
            match client.get_command() {
                DecoderCommand::Stop => return Ok(()),
                DecoderCommand::Seek => {
                    if self.seekable {
                        let target = client.seek_time();
                        position = ((target.as_secs_f64() * params.sample_rate as f64) as u64)
                            .min(total_frames);
                        client.command_finished();
                    } else {
                        client.seek_error();
                    }
                }
                _ => {}
            }

            if let Some((at, title)) = self.tag_at {
                if !tag_sent && position as f64 / params.sample_rate as f64 >= at {
                    tag_sent = true;
                    let mut tag = Tag::new();
                    tag.add(aulos::tag::TagType::Title, title);
                    if client.submit_tag(tag) == DecoderCommand::Stop {
                        return Ok(());
                    }
                }
            }

            if position >= total_frames {
                break;
            }

            let frames = BLOCK_FRAMES.min(total_frames - position);
            let bytes: Vec<u8> = std::iter::repeat(params.value)
                .take(frames as usize * 2)
                .flat_map(|s| s.to_ne_bytes())
                .collect();
            position += frames;

            if client.submit_data(&bytes, 128) == DecoderCommand::Stop {
                return Ok(());
            }
        }

        Ok(())
    }
}

/// Everything the recording driver observed, shared with the test body.
#[derive(Clone, Default)]
pub struct Recording {
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Default)]
struct RecordingInner {
    opens: Vec<AudioFormat>,
    data: Vec<u8>,
    tags: Vec<Tag>,
    cancels: usize,
    pauses: usize,
}

impl Recording {
    pub fn opens(&self) -> Vec<AudioFormat> {
        self.inner.lock().unwrap().opens.clone()
    }

    pub fn data(&self) -> Vec<u8> {
        self.inner.lock().unwrap().data.clone()
    }

    pub fn data_len(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.inner.lock().unwrap().tags.clone()
    }

    pub fn pauses(&self) -> usize {
        self.inner.lock().unwrap().pauses
    }

    pub fn cancels(&self) -> usize {
        self.inner.lock().unwrap().cancels
    }

    /// Recorded bytes reinterpreted as f32 samples.
    pub fn samples(&self) -> Vec<f32> {
        self.data()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

/// Output driver that stores everything it is told to play.
pub struct RecordingOutputDriver {
    recording: Recording,
    open: bool,

    /// Sleep this long per play call, to slow playback down enough for the
    /// test body to interleave commands
    throttle: Option<Duration>,

    /// When set, the next play call fails
    pub fail_play: Arc<AtomicBool>,
}

impl RecordingOutputDriver {
    pub fn new(recording: Recording, throttle: Option<Duration>) -> Self {
        Self {
            recording,
            open: false,
            throttle,
            fail_play: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl AudioOutputDriver for RecordingOutputDriver {
    fn open(&mut self, format: AudioFormat) -> Result<()> {
        self.recording.inner.lock().unwrap().opens.push(format);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn play(&mut self, data: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::Output("recording driver is not open".into()));
        }
        if self.fail_play.load(Ordering::Relaxed) {
            return Err(Error::Output("injected play failure".into()));
        }
        if let Some(throttle) = self.throttle {
            sleep(throttle);
        }
        self.recording.inner.lock().unwrap().data.extend_from_slice(data);
        Ok(data.len())
    }

    fn cancel(&mut self) {
        self.recording.inner.lock().unwrap().cancels += 1;
    }

    fn pause(&mut self) {
        self.recording.inner.lock().unwrap().pauses += 1;
    }

    fn send_tag(&mut self, tag: &Tag) {
        self.recording.inner.lock().unwrap().tags.push(tag.clone());
    }
}

/// A complete engine wired to the mock plugin and one recording output.
pub struct TestEngine {
    pub player: Arc<PlayerControl>,
    pub recording: Recording,
    pub events: Arc<EventBus>,
}

impl TestEngine {
    pub fn shutdown(self) {
        self.player.kill();
    }
}

pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        buffer_chunks: 128,
        buffered_before_play: 4,
        ..Default::default()
    }
}

pub fn engine() -> TestEngine {
    engine_with(MockDecoderPlugin::default(), None)
}

pub fn engine_with(plugin: MockDecoderPlugin, throttle: Option<Duration>) -> TestEngine {
    let events = Arc::new(EventBus::new());
    let player = PlayerControl::new(test_config(), vec![Box::new(plugin)], Arc::clone(&events));

    let recording = Recording::default();
    player.outputs().add(
        "recording",
        Box::new(RecordingOutputDriver::new(recording.clone(), throttle)),
        PreparedFilterChain::new(),
    );

    TestEngine {
        player,
        recording,
        events,
    }
}

/// A mock song: constant `value` for `seconds` at 44.1 kHz.
pub fn mock_song(value: f32, seconds: f64) -> Song {
    Song::new(format!("{value}_{seconds}.mock"))
}

/// A mock song at a specific sample rate.
pub fn mock_song_at(value: f32, seconds: f64, sample_rate: u32) -> Song {
    Song::new(format!("{value}_{seconds}_{sample_rate}.mock"))
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    false
}
