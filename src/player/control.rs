//! Player control
//!
//! The client-facing surface of the engine. Every command travels through a
//! single command slot protected by the control mutex; synchronous callers
//! signal the player thread and sleep on the client condvar until the slot
//! is cleared. The same mutex also protects the decoder state, making the
//! player-decoder rendezvous one critical section.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::buffer::MusicBuffer;
use crate::audio::format::AudioFormat;
use crate::config::PlayerConfig;
use crate::decoder::control::{DecoderControl, DecoderInner};
use crate::decoder::plugin::DecoderPlugin;
use crate::error::{Error, Result};
use crate::events::{EventBus, IdleEvent};
use crate::output::control::AudioOutputClient;
use crate::output::multiple::MultipleOutputs;
use crate::player::cross_fade::CrossFadeSettings;
use crate::player::thread as player_thread;
use crate::replay_gain::ReplayGainMode;
use crate::song::Song;

/// Playback state as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Stop,
    Pause,
    Play,
}

/// Commands delivered to the player thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerCommand {
    #[default]
    None,
    Exit,
    Pause,

    /// Seek to `seek_time` in `next_song`; also used to start playback
    Seek,
    CloseAudio,

    /// At least one output's enabled flag changed; apply it
    UpdateAudio,

    /// `next_song` was updated
    Queue,

    /// Drop the pre-decoded `next_song`
    Cancel,

    /// Refresh status information (elapsed time etc.)
    Refresh,
}

/// Which side produced the stored error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerErrorKind {
    #[default]
    None,
    Decoder,
    Output,
}

/// Snapshot returned by [`PlayerControl::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub bit_rate: u16,
    pub audio_format: Option<AudioFormat>,
    pub total_time: Option<Duration>,
    pub elapsed_time: Duration,
}

/// Player-side mutable state, inside the shared control mutex.
pub(crate) struct PlayerInner {
    pub command: PlayerCommand,
    pub state: PlayerState,

    pub error_kind: PlayerErrorKind,
    pub error: Option<Error>,

    /// The next queued song, owned here until the player thread activates it
    pub next_song: Option<Arc<Song>>,

    /// Identity of the song currently playing, if any
    pub current_song_id: Option<uuid::Uuid>,

    /// Current song with tags updated mid-stream; drained by the client
    pub tagged_song: Option<Song>,

    pub seek_time: Duration,

    pub audio_format: Option<AudioFormat>,
    pub bit_rate: u16,
    pub elapsed_time: Duration,
    pub total_time: Option<Duration>,

    pub cross_fade: CrossFadeSettings,
    pub replay_gain_mode: ReplayGainMode,

    /// Auto-pause at the end of the current song instead of starting the
    /// next one
    pub border_pause: bool,

    /// The player thread is inside a long decoder wait and cannot answer a
    /// refresh promptly
    pub occupied: bool,

    /// Accumulated playback time in seconds
    pub total_play_time: f64,
}

impl PlayerInner {
    fn new() -> Self {
        Self {
            command: PlayerCommand::None,
            state: PlayerState::Stop,
            error_kind: PlayerErrorKind::None,
            error: None,
            next_song: None,
            current_song_id: None,
            tagged_song: None,
            seek_time: Duration::ZERO,
            audio_format: None,
            bit_rate: 0,
            elapsed_time: Duration::ZERO,
            total_time: None,
            cross_fade: CrossFadeSettings::default(),
            replay_gain_mode: ReplayGainMode::Off,
            border_pause: false,
            occupied: false,
            total_play_time: 0.0,
        }
    }

    pub fn set_error(&mut self, kind: PlayerErrorKind, error: Error) {
        debug_assert_ne!(kind, PlayerErrorKind::None);
        self.error_kind = kind;
        self.error = Some(error);
    }

    /// Output failures force a pause: the user may resume once an output
    /// becomes available again.
    pub fn set_output_error(&mut self, error: Error) {
        self.set_error(PlayerErrorKind::Output, error);
        self.state = PlayerState::Pause;
    }

    pub fn clear_error(&mut self) {
        self.error_kind = PlayerErrorKind::None;
        self.error = None;
    }
}

/// State shared by the client, the player thread and the decoder thread.
pub(crate) struct ControlShared {
    pub mutex: Mutex<ControlInner>,

    /// Wakes the player thread: commands, decoder events, chunks consumed
    pub player_cond: Condvar,

    /// Wakes a client waiting for player command completion
    pub client_cond: Condvar,

    /// Wakes the decoder thread: commands, freed chunks
    pub decoder_cond: Condvar,
}

pub(crate) struct ControlInner {
    pub player: PlayerInner,
    pub decoder: DecoderInner,
}

impl ControlShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mutex: Mutex::new(ControlInner {
                player: PlayerInner::new(),
                decoder: DecoderInner::default(),
            }),
            player_cond: Condvar::new(),
            client_cond: Condvar::new(),
            decoder_cond: Condvar::new(),
        })
    }
}

/// Signals chunk consumption from the output threads back to the player.
struct PlayerOutputClient {
    shared: Arc<ControlShared>,
}

impl AudioOutputClient for PlayerOutputClient {
    fn chunks_consumed(&self) {
        let _guard = self.shared.mutex.lock().unwrap();
        self.shared.player_cond.notify_all();
    }
}

/// The engine handle: owns the player thread, the decoder control, the
/// outputs and the chunk pool.
pub struct PlayerControl {
    shared: Arc<ControlShared>,
    dc: Arc<DecoderControl>,
    outputs: Arc<MultipleOutputs>,
    buffer: Arc<MusicBuffer>,
    events: Arc<EventBus>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerControl {
    /// Build the engine: allocates the chunk pool and spawns the decoder and
    /// player threads. Outputs are added afterwards with
    /// [`outputs`](Self::outputs)`.add(...)`.
    pub fn new(
        config: PlayerConfig,
        plugins: Vec<Box<dyn DecoderPlugin>>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let config = config.sanitize();
        let shared = ControlShared::new();
        let buffer = Arc::new(MusicBuffer::new(config.buffer_chunks));

        let output_client = Arc::new(PlayerOutputClient {
            shared: Arc::clone(&shared),
        });
        let outputs = Arc::new(MultipleOutputs::new(output_client, config.replay_gain));

        let dc = DecoderControl::new(Arc::clone(&shared), plugins, config.replay_gain);

        let context = player_thread::PlayerContext {
            shared: Arc::clone(&shared),
            dc: Arc::clone(&dc),
            outputs: Arc::clone(&outputs),
            buffer: Arc::clone(&buffer),
            events: Arc::clone(&events),
            config: config.clone(),
        };
        let handle = player_thread::spawn(context);

        Arc::new(Self {
            shared,
            dc,
            outputs,
            buffer,
            events,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// The output facade, for registering and toggling outputs.
    pub fn outputs(&self) -> &MultipleOutputs {
        &self.outputs
    }

    /// Pool statistics, mostly for diagnostics and tests.
    pub fn buffer(&self) -> &MusicBuffer {
        &self.buffer
    }

    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.shared.mutex.lock().unwrap()
    }

    /// Send a command and wait until the player thread has processed it.
    fn synchronous_command<'a>(
        &self,
        mut guard: MutexGuard<'a, ControlInner>,
        command: PlayerCommand,
    ) -> MutexGuard<'a, ControlInner> {
        // only one in-flight command is permitted
        while guard.player.command != PlayerCommand::None {
            guard = self.shared.client_cond.wait(guard).unwrap();
        }
        guard.player.command = command;
        self.shared.player_cond.notify_all();
        while guard.player.command != PlayerCommand::None {
            guard = self.shared.client_cond.wait(guard).unwrap();
        }
        guard
    }

    /// Start playing `song` from its beginning. Unpauses if needed. Decoder
    /// failures at startup surface here.
    pub fn play(&self, song: Song) -> Result<()> {
        let guard = self.lock();
        let guard = self.seek_locked(guard, song, Duration::ZERO)?;
        if guard.player.state == PlayerState::Pause {
            let _guard = self.synchronous_command(guard, PlayerCommand::Pause);
        }
        self.events.emit(IdleEvent::Player);
        Ok(())
    }

    /// Seek within `song` (switching to it if it is not current).
    pub fn seek(&self, song: Song, position: Duration) -> Result<()> {
        let guard = self.lock();
        let _guard = self.seek_locked(guard, song, position)?;
        self.events.emit(IdleEvent::Player);
        Ok(())
    }

    fn seek_locked<'a>(
        &self,
        mut guard: MutexGuard<'a, ControlInner>,
        song: Song,
        position: Duration,
    ) -> Result<MutexGuard<'a, ControlInner>> {
        // the SEEK command consumes next_song; drop a queued one first
        if guard.player.next_song.is_some() {
            guard = self.synchronous_command(guard, PlayerCommand::Cancel);
        }
        debug_assert!(guard.player.next_song.is_none());

        guard.player.clear_error();
        guard.player.next_song = Some(Arc::new(song));
        guard.player.seek_time = position;
        let guard = self.synchronous_command(guard, PlayerCommand::Seek);

        debug_assert!(guard.player.next_song.is_none());
        if guard.player.error_kind != PlayerErrorKind::None {
            let error = guard
                .player
                .error
                .clone()
                .unwrap_or_else(|| Error::InvalidState("seek failed".into()));
            return Err(error);
        }
        Ok(guard)
    }

    /// Queue `song` to be played (and pre-decoded) after the current one.
    /// Starts playback when stopped.
    pub fn enqueue_song(&self, song: Song) -> Result<()> {
        let mut guard = self.lock();
        if guard.player.next_song.is_some() {
            guard = self.synchronous_command(guard, PlayerCommand::Cancel);
        }
        guard.player.next_song = Some(Arc::new(song));
        guard.player.seek_time = Duration::ZERO;
        let guard = self.synchronous_command(guard, PlayerCommand::Queue);

        if guard.player.error_kind != PlayerErrorKind::None {
            let error = guard
                .player
                .error
                .clone()
                .unwrap_or_else(|| Error::InvalidState("queue failed".into()));
            return Err(error);
        }
        Ok(())
    }

    /// Drop the queued next song.
    pub fn cancel(&self) {
        let guard = self.lock();
        let guard = self.synchronous_command(guard, PlayerCommand::Cancel);
        debug_assert!(guard.player.next_song.is_none());
    }

    /// Stop playback and close the outputs.
    pub fn stop(&self) {
        let guard = self.lock();
        let _guard = self.synchronous_command(guard, PlayerCommand::CloseAudio);
        self.events.emit(IdleEvent::Player);
    }

    /// Toggle between play and pause.
    pub fn pause(&self) {
        let guard = self.lock();
        self.pause_locked(guard);
    }

    fn pause_locked(&self, guard: MutexGuard<'_, ControlInner>) {
        if guard.player.state != PlayerState::Stop {
            let _guard = self.synchronous_command(guard, PlayerCommand::Pause);
            self.events.emit(IdleEvent::Player);
        }
    }

    /// Set the pause flag explicitly; a no-op when stopped.
    pub fn set_pause(&self, pause: bool) {
        let guard = self.lock();
        match guard.player.state {
            PlayerState::Stop => {}
            PlayerState::Play => {
                if pause {
                    self.pause_locked(guard);
                }
            }
            PlayerState::Pause => {
                if !pause {
                    self.pause_locked(guard);
                }
            }
        }
    }

    /// Auto-pause before the next song starts ("single" playback).
    pub fn set_border_pause(&self, border_pause: bool) {
        self.lock().player.border_pause = border_pause;
    }

    /// Re-apply the outputs' enabled flags.
    pub fn update_audio(&self) {
        let guard = self.lock();
        let _guard = self.synchronous_command(guard, PlayerCommand::UpdateAudio);
    }

    /// Current status. Fresh values are fetched from the player thread
    /// unless it is occupied, in which case the last cached values are
    /// returned without blocking.
    pub fn get_status(&self) -> PlayerStatus {
        let mut guard = self.lock();
        if !guard.player.occupied {
            guard = self.synchronous_command(guard, PlayerCommand::Refresh);
        }

        let player = &guard.player;
        if player.state == PlayerState::Stop {
            PlayerStatus {
                state: PlayerState::Stop,
                bit_rate: 0,
                audio_format: None,
                total_time: None,
                elapsed_time: Duration::ZERO,
            }
        } else {
            PlayerStatus {
                state: player.state,
                bit_rate: player.bit_rate,
                audio_format: player.audio_format,
                total_time: player.total_time,
                elapsed_time: player.elapsed_time,
            }
        }
    }

    pub fn get_state(&self) -> PlayerState {
        self.lock().player.state
    }

    /// The stored error, if any.
    pub fn get_error(&self) -> Option<(PlayerErrorKind, Error)> {
        let guard = self.lock();
        let kind = guard.player.error_kind;
        if kind == PlayerErrorKind::None {
            return None;
        }
        guard.player.error.clone().map(|error| (kind, error))
    }

    /// Reset the stored error; also recovers the decoder from its error
    /// state so the client may retry.
    pub fn clear_error(&self) {
        let mut guard = self.lock();
        guard.player.clear_error();
        guard.decoder.clear_error();
        debug!("error cleared");
    }

    /// Read and clear the tag-updated current song.
    pub fn read_tagged_song(&self) -> Option<Song> {
        self.lock().player.tagged_song.take()
    }

    /// Identity of the song currently playing.
    pub fn current_song_id(&self) -> Option<uuid::Uuid> {
        self.lock().player.current_song_id
    }

    /// Accumulated playback time in seconds.
    pub fn total_play_time(&self) -> f64 {
        self.lock().player.total_play_time
    }

    pub fn set_cross_fade(&self, seconds: f32) {
        self.lock().player.cross_fade.duration = seconds.max(0.0);
        self.events.emit(IdleEvent::Options);
    }

    pub fn cross_fade(&self) -> f32 {
        self.lock().player.cross_fade.duration
    }

    pub fn set_mixramp_db(&self, db: f32) {
        self.lock().player.cross_fade.mixramp_db = db;
        self.events.emit(IdleEvent::Options);
    }

    pub fn set_mixramp_delay(&self, seconds: f32) {
        self.lock().player.cross_fade.mixramp_delay = seconds;
        self.events.emit(IdleEvent::Options);
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        {
            let mut guard = self.lock();
            guard.player.replay_gain_mode = mode;
            guard.decoder.replay_gain_mode = mode;
        }
        self.outputs.set_replay_gain_mode(mode);
        self.events.emit(IdleEvent::Options);
    }

    /// Shut the engine down: stops the player thread, the decoder thread and
    /// every output thread, then joins them.
    pub fn kill(&self) {
        {
            let guard = self.lock();
            let _guard = self.synchronous_command(guard, PlayerCommand::Exit);
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.dc.quit();
        self.outputs.kill();
        self.events.emit(IdleEvent::Player);
    }
}
