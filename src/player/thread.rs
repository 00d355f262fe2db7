//! Player thread
//!
//! Orchestrates the decoder and the outputs: starts and activates decodes,
//! enforces the pre-play buffering threshold, attaches cross-fade companion
//! chunks, detects song borders and propagates both error classes. The
//! thread body waits for commands when stopped; [`Player::session`] is the
//! playback session that a seek or queue command starts.

use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::buffer::MusicBuffer;
use crate::audio::chunk::MusicChunk;
use crate::audio::format::AudioFormat;
use crate::audio::pipe::MusicPipe;
use crate::config::PlayerConfig;
use crate::decoder::control::DecoderControl;
use crate::error::Error;
use crate::events::{EventBus, IdleEvent};
use crate::output::multiple::MultipleOutputs;
use crate::player::control::{
    ControlInner, ControlShared, PlayerCommand, PlayerErrorKind, PlayerState,
};
use crate::song::Song;
use crate::tag::Tag;

/// Maximum depth of the outputs-side pipe; keeps cancel responsive.
const OUTPUT_PIPE_MAX: usize = 8;

pub(crate) struct PlayerContext {
    pub shared: Arc<ControlShared>,
    pub dc: Arc<DecoderControl>,
    pub outputs: Arc<MultipleOutputs>,
    pub buffer: Arc<MusicBuffer>,
    pub events: Arc<EventBus>,
    pub config: PlayerConfig,
}

pub(crate) fn spawn(ctx: PlayerContext) -> JoinHandle<()> {
    thread::Builder::new()
        .name("player".into())
        .spawn(move || run(ctx))
        .expect("failed to spawn player thread")
}

type Guard<'a> = MutexGuard<'a, ControlInner>;

fn command_finished(ctx: &PlayerContext, guard: &mut Guard<'_>) {
    debug_assert_ne!(guard.player.command, PlayerCommand::None);
    guard.player.command = PlayerCommand::None;
    ctx.shared.client_cond.notify_all();
}

/// Outer loop: idle until a command arrives; a seek or queue command starts
/// a playback session.
fn run(ctx: PlayerContext) {
    debug!("player thread started");
    let mut guard = ctx.shared.mutex.lock().unwrap();

    loop {
        match guard.player.command {
            PlayerCommand::Seek | PlayerCommand::Queue => {
                let player = Player::new(&ctx);
                guard = player.session(guard);
                ctx.events.emit(IdleEvent::Player);
                // an EXIT that ended the session is still pending
                if guard.player.command == PlayerCommand::Exit {
                    continue;
                }
            }

            PlayerCommand::Pause | PlayerCommand::Refresh => {
                // nothing is playing
                command_finished(&ctx, &mut guard);
            }

            PlayerCommand::Cancel => {
                guard.player.next_song = None;
                command_finished(&ctx, &mut guard);
            }

            PlayerCommand::CloseAudio => {
                drop(guard);
                ctx.outputs.close();
                guard = ctx.shared.mutex.lock().unwrap();
                command_finished(&ctx, &mut guard);
            }

            PlayerCommand::UpdateAudio => {
                drop(guard);
                ctx.outputs.update();
                guard = ctx.shared.mutex.lock().unwrap();
                command_finished(&ctx, &mut guard);
            }

            PlayerCommand::Exit => {
                command_finished(&ctx, &mut guard);
                drop(guard);
                debug!("player thread exiting");
                return;
            }

            PlayerCommand::None => {
                guard = ctx.shared.player_cond.wait(guard).unwrap();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossFadeState {
    /// Cross-fade settings disabled, or the transition cannot fade
    Disabled,

    /// A next song is being decoded; the overlap has not been computed yet
    Unknown,

    /// The overlap was computed and fading will happen
    Enabled,
}

/// One playback session: from the starting seek/queue command until playback
/// ends or is stopped.
struct Player<'a> {
    ctx: &'a PlayerContext,

    /// The pipe the current song's chunks come from
    pipe: Arc<MusicPipe>,

    /// The song currently being played
    song: Option<Arc<Song>>,

    /// A next song was queued but its decoder not started yet
    queued: bool,

    paused: bool,
    output_open: bool,

    /// Accumulate `buffered_before_play` chunks before opening the output
    buffering: bool,

    /// The current song's decoder has not reported its format yet
    decoder_starting: bool,

    /// Format of the chunks currently being played
    play_audio_format: Option<AudioFormat>,

    /// Format the outputs were actually opened with; a mismatch with
    /// `play_audio_format` forces a drain-and-reopen
    output_format: Option<AudioFormat>,

    xfade: CrossFadeState,
    cross_fade_chunks: usize,
    cross_fading: bool,

    /// Tag of the next song delivered during the overlap, postponed until
    /// its first audible chunk
    cross_fade_tag: Option<Tag>,
}

/// Why the session loop ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// All songs played to completion
    Finished,

    /// A stop-class command (CLOSE_AUDIO, EXIT) arrived
    Commanded,
}

impl<'a> Player<'a> {
    fn new(ctx: &'a PlayerContext) -> Self {
        Self {
            ctx,
            pipe: Arc::new(MusicPipe::new()),
            song: None,
            queued: false,
            paused: false,
            output_open: false,
            buffering: true,
            decoder_starting: false,
            play_audio_format: None,
            output_format: None,
            xfade: CrossFadeState::Disabled,
            cross_fade_chunks: 0,
            cross_fading: false,
            cross_fade_tag: None,
        }
    }

    fn wait(&self, guard: Guard<'a>) -> Guard<'a> {
        self.ctx.shared.player_cond.wait(guard).unwrap()
    }

    /// Is the decoder working on (or done with) a pipe other than ours,
    /// i.e. pre-decoding the next song?
    fn decoder_at_next_song(&self, guard: &Guard<'_>) -> bool {
        guard
            .decoder
            .pipe
            .as_ref()
            .map(|p| !Arc::ptr_eq(p, &self.pipe))
            .unwrap_or(false)
    }

    fn decoder_filling_our_pipe(&self, guard: &Guard<'_>) -> bool {
        !guard.decoder.is_idle() && !self.decoder_at_next_song(guard)
    }

    /// Entry point. `guard.player.command` is the starting SEEK or QUEUE.
    fn session(mut self, mut guard: Guard<'a>) -> Guard<'a> {
        let start_command = guard.player.command;
        let Some(song) = guard.player.next_song.clone() else {
            warn!("play command without a song");
            command_finished(self.ctx, &mut guard);
            return guard;
        };

        // start the decoder and wait for it synchronously, so that startup
        // failures surface in the client's blocked call
        let mut start_at = song.start_time;
        if start_command == PlayerCommand::Seek {
            start_at += guard.player.seek_time;
        }

        guard = self.start_decoder(guard, Arc::clone(&song), start_at, Arc::clone(&self.pipe));
        guard = self.wait_decoder_startup(guard);

        if guard.decoder.has_failed() {
            let error = guard
                .decoder
                .check_rethrow_error()
                .err()
                .unwrap_or_else(|| Error::Decoder("decoder failed".into()));
            guard.player.set_error(PlayerErrorKind::Decoder, error);
            guard.player.state = PlayerState::Stop;
            guard.player.next_song = None;
            command_finished(self.ctx, &mut guard);
            return guard;
        }

        // decoder is ready: activate the song
        guard = self.activate_decoder(guard);
        guard.player.state = PlayerState::Play;
        if start_command == PlayerCommand::Seek {
            guard.player.elapsed_time = start_at;
        }
        command_finished(self.ctx, &mut guard);

        let (guard, _end) = self.play_loop(guard);
        self.shutdown(guard)
    }

    /// Start the decoder for `song` into `pipe` with the occupied window
    /// visible to refresh callers.
    fn start_decoder(
        &mut self,
        mut guard: Guard<'a>,
        song: Arc<Song>,
        start_at: Duration,
        pipe: Arc<MusicPipe>,
    ) -> Guard<'a> {
        self.decoder_starting = true;
        guard.player.occupied = true;
        let end_time = song.end_time;
        drop(guard);

        self.ctx.dc.start(
            song,
            start_at,
            end_time,
            Arc::clone(&self.ctx.buffer),
            pipe,
        );

        let mut guard = self.ctx.shared.mutex.lock().unwrap();
        guard.player.occupied = false;
        guard
    }

    /// Wait until the decoder leaves the starting state. The occupied flag
    /// keeps refresh callers from blocking on us meanwhile.
    fn wait_decoder_startup(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        guard.player.occupied = true;
        while guard.decoder.is_starting() {
            guard = self.ctx.dc.wait_for_decoder(guard);
        }
        guard.player.occupied = false;
        self.decoder_starting = false;
        guard
    }

    /// Make the decoder's song the current song.
    fn activate_decoder(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        self.song = guard.player.next_song.take();
        guard.player.tagged_song = None;

        if let Some(song) = self.song.as_ref() {
            info!(uri = %song.uri, "playing");
            guard.player.elapsed_time = song.start_time;
        }
        guard.player.current_song_id = self.song.as_ref().map(|s| s.id);
        guard.player.total_time = guard.decoder.total_time;
        guard.player.audio_format = guard.decoder.out_audio_format;
        guard.player.bit_rate = 0;
        self.play_audio_format = guard.decoder.out_audio_format;
        self.buffering = true;
        guard
    }

    /// The playback loop; returns why it ended.
    fn play_loop(&mut self, mut guard: Guard<'a>) -> (Guard<'a>, SessionEnd) {
        loop {
            let (g, flow) = self.process_command(guard);
            guard = g;
            if flow == Some(SessionEnd::Commanded) {
                return (guard, SessionEnd::Commanded);
            }

            // start pre-decoding the queued song once the decoder finished
            // the current one
            if self.queued && guard.decoder.is_idle() && !self.decoder_at_next_song(&guard) {
                guard = self.start_prefetch(guard);
                continue;
            }

            // adopt format/duration when the current song's decoder becomes
            // ready (after a song border); watch for its failure too
            if self.decoder_starting {
                if guard.decoder.is_starting() {
                    guard = self.ctx.dc.wait_for_decoder(guard);
                    continue;
                }
                guard = self.check_decoder_startup(guard);
                continue;
            }

            // compute the cross-fade plan once the next song's decoder is up
            if self.xfade == CrossFadeState::Unknown
                && self.decoder_at_next_song(&guard)
                && !guard.decoder.is_starting()
                && !guard.decoder.has_failed()
            {
                guard = self.plan_cross_fade(guard);
            }

            // pre-play buffering gate
            if self.buffering {
                let enough = self.pipe.size() >= self.ctx.config.buffered_before_play;
                if enough || !self.decoder_filling_our_pipe(&guard) {
                    self.buffering = false;
                } else {
                    guard = self.ctx.dc.wait_for_decoder(guard);
                }
                continue;
            }

            // the output side needs to exist before chunks can flow
            if !self.output_open && !self.paused {
                guard = self.open_output(guard);
                if !self.output_open {
                    // open failed; we are paused now with a stored error
                    continue;
                }
            }

            // a format change (song border, seek to another song) means the
            // outputs must be drained and rebuilt before more chunks flow
            if self.output_open && !self.paused && self.output_format != self.play_audio_format {
                guard = self.drain_outputs(guard);
                guard = self.open_output(guard);
                continue;
            }

            // aggregate asynchronous output failures
            if self.output_open && !self.ctx.outputs.has_open_output() {
                let error = self
                    .ctx
                    .outputs
                    .collect_error()
                    .unwrap_or_else(|| Error::Output("all outputs failed".into()));
                warn!(%error, "output failure");
                guard.player.set_output_error(error);
                self.paused = true;
                self.output_open = false;
                self.ctx.events.emit(IdleEvent::Player);
                continue;
            }

            if self.paused {
                if guard.player.command == PlayerCommand::None {
                    guard = self.wait(guard);
                }
            } else if !self.pipe.is_empty() {
                guard = self.play_next_chunk(guard);
            } else if self.decoder_at_next_song(&guard) {
                // the current song is fully played; move to the next one
                let (g, ended) = self.song_border(guard);
                guard = g;
                if ended {
                    return (guard, SessionEnd::Finished);
                }
            } else if guard.decoder.is_idle() {
                // nothing left to decode or play
                return (guard, SessionEnd::Finished);
            } else {
                // pipe underrun while the decoder is still working
                guard = self.ctx.dc.wait_for_decoder(guard);
            }
        }
    }

    /// Handle one pending command inside the session.
    fn process_command(&mut self, mut guard: Guard<'a>) -> (Guard<'a>, Option<SessionEnd>) {
        match guard.player.command {
            PlayerCommand::None => (guard, None),

            PlayerCommand::Queue => {
                debug_assert!(guard.player.next_song.is_some());
                self.queued = true;
                command_finished(self.ctx, &mut guard);
                (guard, None)
            }

            PlayerCommand::Pause => {
                self.paused = !self.paused;
                if self.paused {
                    guard.player.state = PlayerState::Pause;
                    drop(guard);
                    self.ctx.outputs.set_pause(true);
                    guard = self.ctx.shared.mutex.lock().unwrap();
                } else {
                    guard.player.state = PlayerState::Play;
                    drop(guard);
                    self.ctx.outputs.set_pause(false);
                    guard = self.ctx.shared.mutex.lock().unwrap();
                }
                command_finished(self.ctx, &mut guard);
                (guard, None)
            }

            PlayerCommand::Seek => {
                guard = self.seek_decoder(guard);
                (guard, None)
            }

            PlayerCommand::Cancel => {
                if self.decoder_at_next_song(&guard) {
                    // the decoder is pre-decoding the song being cancelled
                    let decoder_pipe = guard.decoder.pipe.clone();
                    drop(guard);
                    self.ctx.dc.stop();
                    if let Some(pipe) = decoder_pipe {
                        pipe.clear(&self.ctx.buffer);
                    }
                    guard = self.ctx.shared.mutex.lock().unwrap();
                    guard.decoder.pipe = None;
                    guard.decoder.song = None;
                }
                guard.player.next_song = None;
                self.queued = false;
                self.xfade = CrossFadeState::Disabled;
                self.cross_fade_tag = None;
                command_finished(self.ctx, &mut guard);
                (guard, None)
            }

            PlayerCommand::Refresh => {
                // elapsed time, bit rate and format are maintained on every
                // played chunk; nothing further to collect
                command_finished(self.ctx, &mut guard);
                (guard, None)
            }

            PlayerCommand::UpdateAudio => {
                drop(guard);
                self.ctx.outputs.update();
                guard = self.ctx.shared.mutex.lock().unwrap();
                command_finished(self.ctx, &mut guard);
                (guard, None)
            }

            PlayerCommand::CloseAudio | PlayerCommand::Exit => {
                (guard, Some(SessionEnd::Commanded))
            }
        }
    }

    /// Begin decoding the queued song into a fresh pipe while the current
    /// one keeps playing from ours.
    fn start_prefetch(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        let Some(song) = guard.player.next_song.clone() else {
            self.queued = false;
            return guard;
        };

        debug!(uri = %song.uri, "pre-decoding next song");
        self.queued = false;
        self.xfade = CrossFadeState::Unknown;
        self.cross_fading = false;

        let new_pipe = Arc::new(MusicPipe::new());
        let start_at = song.start_time;
        guard = self.start_decoder(guard, song, start_at, new_pipe);
        // not the current song: readiness is observed by the cross-fade
        // planner and at the song border
        self.decoder_starting = false;
        guard
    }

    /// The current song's decoder finished starting: adopt its parameters,
    /// or surface its failure.
    fn check_decoder_startup(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        self.decoder_starting = false;

        if guard.decoder.has_failed() {
            let error = guard
                .decoder
                .check_rethrow_error()
                .err()
                .unwrap_or_else(|| Error::Decoder("decoder failed".into()));
            guard.player.set_error(PlayerErrorKind::Decoder, error);
            // pause instead of stopping: the client may clear the error and
            // skip to another song
            guard.player.state = PlayerState::Pause;
            self.paused = true;
            self.ctx.events.emit(IdleEvent::Player);
            return guard;
        }

        guard.player.total_time = guard.decoder.total_time;
        let new_format = guard.decoder.out_audio_format;
        guard.player.audio_format = new_format;
        if self.output_open && self.play_audio_format != new_format {
            info!(
                old = ?self.play_audio_format,
                new = ?new_format,
                "audio format changed"
            );
        }
        // the play loop notices the mismatch with the outputs' format and
        // drains/reopens them before playing on
        self.play_audio_format = new_format;
        guard
    }

    /// Wait until every chunk queued on the outputs has been played.
    fn drain_outputs(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        loop {
            if guard.player.command != PlayerCommand::None {
                return guard;
            }
            drop(guard);
            let remaining = self.ctx.outputs.check();
            guard = self.ctx.shared.mutex.lock().unwrap();
            if remaining == 0 || !self.ctx.outputs.has_open_output() {
                return guard;
            }
            guard = self.wait(guard);
        }
    }

    fn open_output(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        let Some(format) = self.play_audio_format else {
            return guard;
        };
        drop(guard);
        let result = self.ctx.outputs.open(format, Arc::clone(&self.ctx.buffer));
        guard = self.ctx.shared.mutex.lock().unwrap();

        match result {
            Ok(()) => {
                self.output_open = true;
                self.output_format = Some(format);
            }
            Err(error) => {
                warn!(%error, "failed to open outputs");
                guard.player.set_output_error(error);
                self.paused = true;
                self.output_open = false;
                self.ctx.events.emit(IdleEvent::Player);
            }
        }
        guard
    }

    /// Compute the cross-fade overlap for the upcoming transition.
    fn plan_cross_fade(&mut self, guard: Guard<'a>) -> Guard<'a> {
        let settings = guard.player.cross_fade;
        let max_chunks = self
            .ctx
            .config
            .buffer_chunks
            .saturating_sub(self.ctx.config.buffered_before_play);

        let old_format = self.play_audio_format;
        let next_format = guard.decoder.out_audio_format;

        self.cross_fade_chunks = match (old_format, next_format) {
            (Some(old), Some(next)) => settings.calculate(
                guard.decoder.total_time,
                guard.decoder.replay_gain_db,
                guard.decoder.replay_gain_prev_db,
                guard.decoder.mix_ramp.start(),
                guard.decoder.previous_mix_ramp.end(),
                next,
                old,
                max_chunks,
            ),
            _ => 0,
        };

        self.xfade = if self.cross_fade_chunks > 0 {
            debug!(chunks = self.cross_fade_chunks, "cross-fade planned");
            CrossFadeState::Enabled
        } else {
            CrossFadeState::Disabled
        };
        guard
    }

    /// Play one chunk: attach a cross-fade companion if the overlap has
    /// begun, surface mid-stream tags, update the status fields and hand the
    /// chunk to the outputs.
    fn play_next_chunk(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        // bound the outputs pipe; wait for consumption instead of flooding it
        loop {
            if guard.player.command != PlayerCommand::None {
                return guard;
            }
            drop(guard);
            let queued = self.ctx.outputs.check();
            guard = self.ctx.shared.mutex.lock().unwrap();
            if queued < OUTPUT_PIPE_MAX {
                break;
            }
            guard = self.wait(guard);
        }

        let mut chunk: Box<MusicChunk>;
        let position = self.pipe.size();

        if self.xfade == CrossFadeState::Enabled
            && self.decoder_at_next_song(&guard)
            && position <= self.cross_fade_chunks
        {
            // inside the overlap: mix the next song's head into our tail
            let other = guard.decoder.pipe.as_ref().and_then(|p| p.shift());
            match other {
                Some(mut other) => {
                    if !self.cross_fading {
                        debug!("cross-fade begins");
                        self.cross_fading = true;
                    }

                    // tags of the next song are postponed to its activation
                    if let Some(tag) = other.tag.take() {
                        self.cross_fade_tag = Some(match self.cross_fade_tag.take() {
                            Some(pending) => pending.merge(&tag),
                            None => tag,
                        });
                    }

                    let Some(current) = self.pipe.shift() else {
                        return guard;
                    };
                    chunk = current;

                    if other.is_empty() {
                        // tag-only chunk: play ours unmixed
                        self.ctx.buffer.return_chunk(other);
                    } else {
                        let mixramp = guard.player.cross_fade.is_mixramp_enabled();
                        chunk.mix_ratio = if mixramp {
                            -1.0
                        } else {
                            position as f32 / self.cross_fade_chunks as f32
                        };
                        chunk.other = Some(other);
                    }
                }
                None => {
                    if guard.decoder.is_idle() {
                        // the next song is fully decoded and shorter than
                        // the overlap; stop fading and play out
                        self.xfade = CrossFadeState::Disabled;
                    }
                    let Some(current) = self.pipe.shift() else {
                        return guard;
                    };
                    chunk = current;
                }
            }
        } else {
            let Some(current) = self.pipe.shift() else {
                return guard;
            };
            chunk = current;
        }

        // mid-stream tag: hand the updated song to the client
        if let Some(tag) = chunk.tag.as_ref() {
            if let Some(song) = self.song.as_ref() {
                let merged = song.tag.merge(tag);
                guard.player.tagged_song = Some(song.as_ref().clone().with_tag(merged));
                self.ctx.events.emit(IdleEvent::Player);
            }
        }

        if let Some(time) = chunk.time {
            guard.player.elapsed_time = time;
        }
        guard.player.bit_rate = chunk.bit_rate;
        if let Some(format) = chunk.format {
            guard.player.total_play_time += format.size_to_time(chunk.length).as_secs_f64();
        }

        drop(guard);
        let result = self.ctx.outputs.play(chunk);
        let mut guard = self.ctx.shared.mutex.lock().unwrap();

        if let Err(error) = result {
            warn!(%error, "output rejected chunk");
            guard.player.set_output_error(error);
            self.paused = true;
            self.output_open = false;
            self.ctx.events.emit(IdleEvent::Player);
            return guard;
        }

        // keep the decoder busy while the pipe is running low
        let threshold =
            (self.ctx.config.buffered_before_play + self.ctx.config.buffer_chunks * 3) / 4;
        if !guard.decoder.is_idle() {
            if let Some(pipe) = guard.decoder.pipe.as_ref() {
                if pipe.size() <= threshold {
                    self.ctx.dc.signal();
                }
            }
        }

        guard
    }

    /// The current song was played to its end: activate the next one.
    /// Returns true when the session is over (border pause with nothing to
    /// activate cannot happen; false continues the loop).
    fn song_border(&mut self, mut guard: Guard<'a>) -> (Guard<'a>, bool) {
        if let Some(song) = self.song.as_ref() {
            info!(uri = %song.uri, "song played");
        }

        // adopt the next song's pipe as ours
        let next_pipe = guard.decoder.pipe.clone();
        let old_pipe = match next_pipe {
            Some(pipe) => std::mem::replace(&mut self.pipe, pipe),
            None => return (guard, true),
        };
        old_pipe.clear(&self.ctx.buffer);

        // apply the postponed cross-fade tag to the incoming song
        if let Some(tag) = self.cross_fade_tag.take() {
            if let Some(song) = guard.player.next_song.as_ref() {
                let merged = song.tag.merge(&tag);
                let mut updated = song.as_ref().clone();
                updated.tag = merged;
                guard.player.next_song = Some(Arc::new(updated));
            }
        }

        guard = self.activate_decoder(guard);
        self.decoder_starting = true;
        self.buffering = false;
        self.xfade = CrossFadeState::Disabled;
        self.cross_fading = false;
        self.ctx.events.emit(IdleEvent::Player);

        // border pause: hold right at the boundary instead of playing on
        if guard.player.border_pause && !self.paused {
            info!("border pause");
            self.paused = true;
            guard.player.state = PlayerState::Pause;
            drop(guard);
            self.ctx.outputs.set_pause(true);
            guard = self.ctx.shared.mutex.lock().unwrap();
            self.ctx.events.emit(IdleEvent::Player);
        }

        (guard, false)
    }

    /// Seek inside the session: restart or reposition the decoder, flush
    /// everything downstream of it.
    fn seek_decoder(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        let Some(target) = guard.player.next_song.clone() else {
            command_finished(self.ctx, &mut guard);
            return guard;
        };
        let seek_time = guard.player.seek_time;

        if !guard.decoder.is_current_song(&target) {
            // switch to the target song: restart the decoder on it
            let decoder_pipe = guard.decoder.pipe.clone();
            guard.player.occupied = true;
            drop(guard);
            self.ctx.dc.stop();
            if let Some(pipe) = decoder_pipe {
                pipe.clear(&self.ctx.buffer);
            }
            self.pipe.clear(&self.ctx.buffer);
            guard = self.ctx.shared.mutex.lock().unwrap();
            guard.player.occupied = false;

            self.pipe = Arc::new(MusicPipe::new());
            let start_at = target.start_time;
            guard = self.start_decoder(guard, Arc::clone(&target), start_at, Arc::clone(&self.pipe));
            guard = self.wait_decoder_startup(guard);

            if guard.decoder.has_failed() {
                let error = guard
                    .decoder
                    .check_rethrow_error()
                    .err()
                    .unwrap_or_else(|| Error::Decoder("decoder failed".into()));
                guard.player.set_error(PlayerErrorKind::Decoder, error);
                guard.player.next_song = None;
                command_finished(self.ctx, &mut guard);
                return guard;
            }
        }

        // reject a seek beyond the known end of the song
        let song_time = target.start_time + seek_time;
        if let Some(total) = guard.decoder.total_time {
            if song_time > target.start_time + total {
                guard.player.set_error(
                    PlayerErrorKind::Decoder,
                    Error::SeekOutOfRange(seek_time),
                );
                guard.player.next_song = None;
                command_finished(self.ctx, &mut guard);
                return guard;
            }
        }

        // reposition; the occupied window covers the synchronous wait
        guard.player.occupied = true;
        drop(guard);
        let result = self.ctx.dc.seek(song_time);
        // drop everything decoded before the seek point
        self.pipe.clear(&self.ctx.buffer);
        self.ctx.outputs.cancel();
        guard = self.ctx.shared.mutex.lock().unwrap();
        guard.player.occupied = false;

        match result {
            Ok(()) => {
                guard = self.activate_decoder(guard);
                guard.player.elapsed_time = song_time;
                self.xfade = CrossFadeState::Disabled;
                self.cross_fading = false;
                self.cross_fade_tag = None;
                self.queued = false;
            }
            Err(error) => {
                guard.player.set_error(PlayerErrorKind::Decoder, error);
                guard.player.next_song = None;
            }
        }
        command_finished(self.ctx, &mut guard);
        guard
    }

    /// Leave the session: stop the decoder, flush the pipes and settle the
    /// final state.
    fn shutdown(&mut self, mut guard: Guard<'a>) -> Guard<'a> {
        let end_command = guard.player.command;
        let decoder_pipe = guard.decoder.pipe.clone();
        drop(guard);

        self.ctx.dc.stop();
        if let Some(pipe) = decoder_pipe {
            pipe.clear(&self.ctx.buffer);
        }
        self.pipe.clear(&self.ctx.buffer);

        // on a natural end, let the outputs play out what they still hold
        if end_command == PlayerCommand::None {
            while self.ctx.outputs.has_open_output() && self.ctx.outputs.check() > 0 {
                let inner = self.ctx.shared.mutex.lock().unwrap();
                if inner.player.command != PlayerCommand::None {
                    drop(inner);
                    break;
                }
                drop(self.wait(inner));
            }
        } else {
            self.ctx.outputs.cancel();
        }

        if end_command == PlayerCommand::CloseAudio || end_command == PlayerCommand::Exit {
            self.ctx.outputs.close();
        }

        let mut guard = self.ctx.shared.mutex.lock().unwrap();
        guard.player.state = PlayerState::Stop;
        guard.player.next_song = None;
        guard.player.current_song_id = None;
        guard.player.audio_format = None;
        guard.player.bit_rate = 0;
        self.queued = false;

        match end_command {
            PlayerCommand::CloseAudio => {
                command_finished(self.ctx, &mut guard);
            }
            // EXIT is acknowledged by the outer loop
            _ => {}
        }

        info!("playback session ended");
        guard
    }
}
