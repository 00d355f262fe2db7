//! Decoder control
//!
//! Owns the decoder thread and the synchronous command handshake with the
//! player. The mutable state lives inside the control mutex shared with the
//! player control, which makes the decoder-player rendezvous a single
//! critical section; see [`ControlShared`].
//!
//! Condition variable pairing:
//! - `decoder_cond` wakes the decoder thread after a command was set (and
//!   when the chunk pool has free chunks again);
//! - `player_cond` wakes the waiting client (the player thread) when the
//!   decoder finished a command or changed state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::audio::buffer::MusicBuffer;
use crate::audio::format::AudioFormat;
use crate::audio::pipe::MusicPipe;
use crate::decoder::command::{DecoderCommand, DecoderState};
use crate::decoder::plugin::DecoderPlugin;
use crate::decoder::thread as decoder_thread;
use crate::error::{Error, Result};
use crate::player::control::{ControlInner, ControlShared};
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};
use crate::song::Song;
use crate::tag::MixRampInfo;

/// Mutable decoder state, stored inside the shared control mutex.
pub(crate) struct DecoderInner {
    pub state: DecoderState,
    pub command: DecoderCommand,

    /// The error of the last failed start/decode; valid while `state` is
    /// [`DecoderState::Error`]
    pub error: Option<Error>,

    pub quit: bool,

    /// Is the client currently waiting for the decoder? When false, chunk
    /// submission may skip the wakeup signal.
    pub client_is_waiting: bool,

    pub seek_error: bool,
    pub seekable: bool,
    pub seek_time: Duration,

    /// Format of the song file, set by `set_ready`
    pub in_audio_format: Option<AudioFormat>,

    /// Format of the chunks sent into the pipe
    pub out_audio_format: Option<AudioFormat>,

    /// The song currently being decoded; set by the player together with the
    /// start command
    pub song: Option<Arc<Song>>,

    /// Initial seek position of the current song
    pub start_time: Duration,

    /// Decoding stops at this position; `None` plays to the end
    pub end_time: Option<Duration>,

    pub total_time: Option<Duration>,

    /// Chunk allocator, set by the start command
    pub buffer: Option<Arc<MusicBuffer>>,

    /// Destination pipe for decoded chunks, set by the start command
    pub pipe: Option<Arc<MusicPipe>>,

    pub replay_gain_mode: ReplayGainMode,

    /// Replay gain of the current and previous song in dB, for the MixRamp
    /// cross-fade planner
    pub replay_gain_db: f32,
    pub replay_gain_prev_db: f32,

    pub mix_ramp: MixRampInfo,
    pub previous_mix_ramp: MixRampInfo,
}

impl DecoderInner {
    fn new() -> Self {
        Self {
            state: DecoderState::Stop,
            command: DecoderCommand::None,
            error: None,
            quit: false,
            client_is_waiting: false,
            seek_error: false,
            seekable: false,
            seek_time: Duration::ZERO,
            in_audio_format: None,
            out_audio_format: None,
            song: None,
            start_time: Duration::ZERO,
            end_time: None,
            total_time: None,
            buffer: None,
            pipe: None,
            replay_gain_mode: ReplayGainMode::Off,
            replay_gain_db: 0.0,
            replay_gain_prev_db: 0.0,
            mix_ramp: MixRampInfo::default(),
            previous_mix_ramp: MixRampInfo::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecoderState::Stop | DecoderState::Error)
    }

    pub fn is_starting(&self) -> bool {
        self.state == DecoderState::Start
    }

    pub fn has_failed(&self) -> bool {
        debug_assert_eq!(self.command, DecoderCommand::None);
        self.state == DecoderState::Error
    }

    /// Is the given song the one currently being decoded (or started)?
    pub fn is_current_song(&self, song: &Song) -> bool {
        match self.state {
            DecoderState::Stop | DecoderState::Error => false,
            DecoderState::Start | DecoderState::Decode => self
                .song
                .as_ref()
                .map(|s| s.id == song.id)
                .unwrap_or(false),
        }
    }

    /// Checks whether an error occurred, and if so, returns a copy.
    pub fn check_rethrow_error(&self) -> Result<()> {
        debug_assert_eq!(self.command, DecoderCommand::None);
        if self.state == DecoderState::Error {
            let error = self
                .error
                .clone()
                .unwrap_or_else(|| Error::Decoder("unknown decoder failure".into()));
            return Err(error);
        }
        Ok(())
    }

    /// Clear the error condition, if any.
    pub fn clear_error(&mut self) {
        if self.state == DecoderState::Error {
            self.error = None;
            self.state = DecoderState::Stop;
        }
    }

    /// Move `mix_ramp.end` into the previous slot and clear the current
    /// markers; called when decoding moves on to the next song.
    pub fn cycle_mix_ramp(&mut self) {
        self.previous_mix_ramp = std::mem::take(&mut self.mix_ramp);
        self.mix_ramp.clear();
    }
}

impl Default for DecoderInner {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle owning the decoder thread and the command surface towards it.
pub struct DecoderControl {
    shared: Arc<ControlShared>,
    plugins: Vec<Box<dyn DecoderPlugin>>,
    replay_gain_config: ReplayGainConfig,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DecoderControl {
    /// Create the control and spawn the decoder thread.
    pub(crate) fn new(
        shared: Arc<ControlShared>,
        plugins: Vec<Box<dyn DecoderPlugin>>,
        replay_gain_config: ReplayGainConfig,
    ) -> Arc<Self> {
        let dc = Arc::new(Self {
            shared,
            plugins,
            replay_gain_config,
            thread: Mutex::new(None),
        });
        let handle = decoder_thread::spawn(Arc::clone(&dc));
        *dc.thread.lock().unwrap() = Some(handle);
        dc
    }

    pub(crate) fn shared(&self) -> &Arc<ControlShared> {
        &self.shared
    }

    pub(crate) fn plugins(&self) -> &[Box<dyn DecoderPlugin>] {
        &self.plugins
    }

    pub(crate) fn replay_gain_config(&self) -> &ReplayGainConfig {
        &self.replay_gain_config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.shared.mutex.lock().unwrap()
    }

    /// Wake the decoder thread after `command` was modified.
    pub(crate) fn signal(&self) {
        self.shared.decoder_cond.notify_all();
    }

    /// Decoder thread: wait for a signal on the decoder condvar.
    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, ControlInner>,
    ) -> MutexGuard<'a, ControlInner> {
        self.shared.decoder_cond.wait(guard).unwrap()
    }

    /// Client (player thread): wait until the decoder signals an event.
    /// While waiting, `client_is_waiting` is visible to the decoder so it
    /// knows the wakeup signal is worth sending.
    pub(crate) fn wait_for_decoder<'a>(
        &self,
        mut guard: MutexGuard<'a, ControlInner>,
    ) -> MutexGuard<'a, ControlInner> {
        guard.decoder.client_is_waiting = true;
        let mut guard = self.shared.player_cond.wait(guard).unwrap();
        guard.decoder.client_is_waiting = false;
        guard
    }

    /// Decoder thread: mark the pending command as finished and wake the
    /// client.
    pub(crate) fn command_finished(&self, guard: &mut MutexGuard<'_, ControlInner>) {
        debug_assert_ne!(guard.decoder.command, DecoderCommand::None);
        guard.decoder.command = DecoderCommand::None;
        self.shared.player_cond.notify_all();
    }

    /// Decoder thread: transition from start to decode and publish the
    /// stream parameters.
    pub(crate) fn set_ready(
        &self,
        guard: &mut MutexGuard<'_, ControlInner>,
        format: AudioFormat,
        seekable: bool,
        total_time: Option<Duration>,
    ) {
        debug_assert_eq!(guard.decoder.state, DecoderState::Start);
        guard.decoder.in_audio_format = Some(format);
        guard.decoder.out_audio_format = Some(format);
        guard.decoder.seekable = seekable;
        guard.decoder.total_time = total_time;
        guard.decoder.state = DecoderState::Decode;
        debug!(%format, seekable, "decoder ready");
        self.shared.player_cond.notify_all();
    }

    fn synchronous_command<'a>(
        &self,
        mut guard: MutexGuard<'a, ControlInner>,
        cmd: DecoderCommand,
    ) -> MutexGuard<'a, ControlInner> {
        debug_assert_eq!(guard.decoder.command, DecoderCommand::None);
        guard.decoder.command = cmd;
        self.signal();
        while guard.decoder.command != DecoderCommand::None {
            guard = self.wait_for_decoder(guard);
        }
        guard
    }

    /// Start decoding a song. Returns when the decoder has acknowledged the
    /// command; readiness (or failure) is observed via the state.
    pub(crate) fn start(
        &self,
        song: Arc<Song>,
        start_time: Duration,
        end_time: Option<Duration>,
        buffer: Arc<MusicBuffer>,
        pipe: Arc<MusicPipe>,
    ) {
        let mut guard = self.lock();
        guard.decoder.clear_error();
        guard.decoder.song = Some(song);
        guard.decoder.start_time = start_time;
        guard.decoder.end_time = end_time;
        guard.decoder.buffer = Some(buffer);
        guard.decoder.pipe = Some(pipe);
        let _guard = self.synchronous_command(guard, DecoderCommand::Start);
    }

    /// Abort the current decode.
    pub(crate) fn stop(&self) {
        let guard = self.lock();
        if guard.decoder.command != DecoderCommand::None {
            // an async command (quit) is in flight; no need to stop again
            return;
        }
        if guard.decoder.is_idle() {
            return;
        }
        let _guard = self.synchronous_command(guard, DecoderCommand::Stop);
    }

    /// Reposition the running decoder.
    pub(crate) fn seek(&self, t: Duration) -> Result<()> {
        let mut guard = self.lock();
        debug_assert_ne!(guard.decoder.state, DecoderState::Error);
        guard.decoder.seek_error = false;
        guard.decoder.seek_time = t;
        let mut guard = self.synchronous_command(guard, DecoderCommand::Seek);
        if guard.decoder.seek_error {
            guard.decoder.seek_error = false;
            return Err(Error::SeekUnsupported);
        }
        Ok(())
    }

    /// Ask the decoder thread to exit and join it.
    pub(crate) fn quit(&self) {
        {
            let mut guard = self.lock();
            guard.decoder.quit = true;
            guard.decoder.command = DecoderCommand::Stop;
            self.signal();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::thread::sleep;
    use std::time::Instant;

    use crate::audio::format::{AudioFormat, SampleFormat};
    use crate::decoder::plugin::{DecoderClient, DecoderPlugin};
    use crate::player::control::ControlShared;

    /// Minimal in-process plugin: silence for `<seconds>.tone`, failure for
    /// `fail.tone`.
    struct TonePlugin {
        seekable: bool,
    }

    impl DecoderPlugin for TonePlugin {
        fn name(&self) -> &'static str {
            "tone"
        }

        fn supports_suffix(&self, suffix: &str) -> bool {
            suffix == "tone"
        }

        fn decode(&self, client: &mut dyn DecoderClient, path: &Path) -> Result<()> {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            let seconds: f64 = stem
                .parse()
                .map_err(|_| Error::Decoder(format!("cannot open {stem}")))?;

            let format = AudioFormat::new(44100, SampleFormat::S16, 2);
            let total_frames = (seconds * 44100.0) as u64;
            client.ready(
                format,
                self.seekable,
                Some(Duration::from_secs_f64(seconds)),
            );

            let mut position: u64 = 0;
            let block = vec![0u8; 512 * 4];
            loop {
                match client.get_command() {
                    DecoderCommand::Stop => return Ok(()),
                    DecoderCommand::Seek => {
                        if self.seekable {
                            let target = client.seek_time();
                            position =
                                ((target.as_secs_f64() * 44100.0) as u64).min(total_frames);
                            client.command_finished();
                        } else {
                            client.seek_error();
                        }
                    }
                    _ => {}
                }

                if position >= total_frames {
                    return Ok(());
                }
                position += 512;
                if client.submit_data(&block, 705) == DecoderCommand::Stop {
                    return Ok(());
                }
            }
        }
    }

    fn control(seekable: bool) -> Arc<DecoderControl> {
        DecoderControl::new(
            ControlShared::new(),
            vec![Box::new(TonePlugin { seekable })],
            ReplayGainConfig::default(),
        )
    }

    fn wait_until(dc: &DecoderControl, mut pred: impl FnMut(&DecoderInner) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if pred(&dc.lock().decoder) {
                return true;
            }
            sleep(Duration::from_millis(2));
        }
        false
    }

    fn song(uri: &str) -> Arc<Song> {
        Arc::new(Song::new(uri))
    }

    #[test]
    fn start_decodes_to_completion() {
        let dc = control(true);
        let buffer = Arc::new(MusicBuffer::new(256));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(
            song("0.2.tone"),
            Duration::ZERO,
            None,
            Arc::clone(&buffer),
            Arc::clone(&pipe),
        );

        assert!(wait_until(&dc, |d| d.state == DecoderState::Decode
            || d.state == DecoderState::Stop));
        {
            let guard = dc.lock();
            assert_eq!(
                guard.decoder.out_audio_format,
                Some(AudioFormat::new(44100, SampleFormat::S16, 2))
            );
            assert!(guard.decoder.seekable);
            assert_eq!(guard.decoder.total_time, Some(Duration::from_millis(200)));
        }

        assert!(wait_until(&dc, |d| d.state == DecoderState::Stop));
        assert!(pipe.size() > 0);

        pipe.clear(&buffer);
        let stats = buffer.stats();
        assert_eq!(stats.free, stats.capacity);

        dc.quit();
    }

    #[test]
    fn unsupported_stream_sets_error_state() {
        let dc = control(true);
        let buffer = Arc::new(MusicBuffer::new(16));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(song("x.wav"), Duration::ZERO, None, buffer, pipe);

        assert!(wait_until(&dc, |d| d.state == DecoderState::Error));
        {
            let mut guard = dc.lock();
            let err = guard.decoder.check_rethrow_error().unwrap_err();
            assert!(matches!(err, Error::UnsupportedUri(_)));

            // rethrow leaves the error in place until it is cleared
            assert!(guard.decoder.check_rethrow_error().is_err());
            guard.decoder.clear_error();
            assert_eq!(guard.decoder.state, DecoderState::Stop);
            assert!(guard.decoder.check_rethrow_error().is_ok());
        }

        dc.quit();
    }

    #[test]
    fn plugin_failure_is_stored() {
        let dc = control(true);
        let buffer = Arc::new(MusicBuffer::new(16));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(song("fail.tone"), Duration::ZERO, None, buffer, pipe);

        assert!(wait_until(&dc, |d| d.state == DecoderState::Error));
        let guard = dc.lock();
        assert!(matches!(
            guard.decoder.check_rethrow_error(),
            Err(Error::Decoder(_))
        ));
        drop(guard);
        dc.quit();
    }

    #[test]
    fn stop_interrupts_a_blocked_decoder() {
        let dc = control(true);
        // tiny pool: the decoder must block on exhaustion
        let buffer = Arc::new(MusicBuffer::new(4));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(
            song("600.tone"),
            Duration::ZERO,
            None,
            Arc::clone(&buffer),
            Arc::clone(&pipe),
        );

        assert!(wait_until(&dc, |d| d.state == DecoderState::Decode));
        // wait for the pool to drain
        let deadline = Instant::now() + Duration::from_secs(10);
        while buffer.stats().free > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(2));
        }
        assert_eq!(buffer.stats().free, 0);

        dc.stop();
        assert!(wait_until(&dc, |d| d.state == DecoderState::Stop));

        pipe.clear(&buffer);
        let stats = buffer.stats();
        assert_eq!(stats.free, stats.capacity);

        dc.quit();
    }

    #[test]
    fn backpressure_resumes_after_chunks_return() {
        let dc = control(true);
        let buffer = Arc::new(MusicBuffer::new(4));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(
            song("600.tone"),
            Duration::ZERO,
            None,
            Arc::clone(&buffer),
            Arc::clone(&pipe),
        );
        assert!(wait_until(&dc, |d| d.state == DecoderState::Decode));

        let deadline = Instant::now() + Duration::from_secs(10);
        while buffer.stats().free > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(2));
        }

        // return one chunk; the decoder must pick up again
        let before = pipe.size();
        let chunk = pipe.shift().expect("pipe cannot be empty while blocked");
        buffer.return_chunk(chunk);
        dc.signal();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut resumed = false;
        while Instant::now() < deadline {
            if pipe.size() >= before {
                resumed = true;
                break;
            }
            sleep(Duration::from_millis(2));
        }
        assert!(resumed, "decoder did not resume after a chunk was freed");

        dc.stop();
        pipe.clear(&buffer);
        dc.quit();
    }

    #[test]
    fn seek_repositions_the_stream() {
        let dc = control(true);
        let buffer = Arc::new(MusicBuffer::new(64));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(
            song("30.tone"),
            Duration::ZERO,
            None,
            Arc::clone(&buffer),
            Arc::clone(&pipe),
        );
        assert!(wait_until(&dc, |d| d.state == DecoderState::Decode));

        dc.seek(Duration::from_secs(10)).unwrap();

        // everything decoded before the ack is stale; drop it and wake the
        // decoder, which may be blocked on the exhausted pool
        pipe.clear(&buffer);
        dc.signal();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(chunk) = pipe.shift() {
                let time = chunk.time.expect("chunks carry their song time");
                assert!(time >= Duration::from_secs(10), "stale chunk at {time:?}");
                buffer.return_chunk(chunk);
                break;
            }
            assert!(Instant::now() < deadline, "no post-seek chunk arrived");
            sleep(Duration::from_millis(2));
        }

        dc.stop();
        pipe.clear(&buffer);
        dc.quit();
    }

    #[test]
    fn seek_on_unseekable_stream_fails() {
        let dc = control(false);
        let buffer = Arc::new(MusicBuffer::new(64));
        let pipe = Arc::new(MusicPipe::new());

        dc.start(
            song("30.tone"),
            Duration::ZERO,
            None,
            Arc::clone(&buffer),
            Arc::clone(&pipe),
        );
        assert!(wait_until(&dc, |d| d.state == DecoderState::Decode));

        assert_eq!(dc.seek(Duration::from_secs(5)), Err(Error::SeekUnsupported));

        dc.stop();
        pipe.clear(&buffer);
        dc.quit();
    }
}
