//! All configured outputs as one unit
//!
//! Owns the outputs-side pipe and fans every played chunk out to each open
//! output. The player talks to this facade only; individual outputs fail and
//! recover independently.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::audio::buffer::MusicBuffer;
use crate::audio::chunk::MusicChunk;
use crate::audio::format::AudioFormat;
use crate::error::{Error, Result};
use crate::filter::chain::PreparedFilterChain;
use crate::filter::replay_gain::PreparedReplayGainFilter;
use crate::output::control::{AudioOutputClient, AudioOutputControl};
use crate::output::driver::AudioOutputDriver;
use crate::output::pipe::{OutputPipe, SharedPipeConsumer};
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};

struct OutputsState {
    open: bool,
    in_format: Option<AudioFormat>,
    buffer: Option<Arc<MusicBuffer>>,
    replay_gain_mode: ReplayGainMode,
}

/// The set of configured outputs plus their shared pipe.
pub struct MultipleOutputs {
    client: Arc<dyn AudioOutputClient>,
    replay_gain_config: ReplayGainConfig,
    pipe: Arc<OutputPipe>,
    outputs: Mutex<Vec<Arc<AudioOutputControl>>>,
    state: Mutex<OutputsState>,
}

impl MultipleOutputs {
    pub fn new(client: Arc<dyn AudioOutputClient>, replay_gain_config: ReplayGainConfig) -> Self {
        Self {
            client,
            replay_gain_config,
            pipe: Arc::new(OutputPipe::new()),
            outputs: Mutex::new(Vec::new()),
            state: Mutex::new(OutputsState {
                open: false,
                in_format: None,
                buffer: None,
                replay_gain_mode: ReplayGainMode::Off,
            }),
        }
    }

    /// Register an output. Outputs added while playback is running stay
    /// closed until the next update.
    pub fn add(
        &self,
        name: impl Into<String>,
        driver: Box<dyn AudioOutputDriver>,
        prepared_filter: PreparedFilterChain,
    ) {
        let control = AudioOutputControl::new(
            name,
            driver,
            Some(PreparedReplayGainFilter::new(self.replay_gain_config)),
            Some(PreparedReplayGainFilter::new(self.replay_gain_config)),
            prepared_filter,
            Arc::clone(&self.client),
        );
        self.outputs.lock().unwrap().push(control);
    }

    fn controls(&self) -> Vec<Arc<AudioOutputControl>> {
        self.outputs.lock().unwrap().clone()
    }

    /// Open every enabled output for the given input format. Fails only when
    /// no output at all could be opened.
    pub fn open(&self, format: AudioFormat, buffer: Arc<MusicBuffer>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.in_format = Some(format);
            state.buffer = Some(buffer);
        }
        let replay_gain_mode = self.state.lock().unwrap().replay_gain_mode;

        let mut opened = 0usize;
        let mut first_error = None;
        for control in self.controls() {
            if !control.is_enabled() {
                continue;
            }
            let consumer = SharedPipeConsumer::new(Arc::clone(&self.pipe));
            if control.open(format, consumer, replay_gain_mode) {
                opened += 1;
            } else if first_error.is_none() {
                first_error = control.take_error();
            }
        }

        if opened == 0 {
            self.state.lock().unwrap().open = false;
            return Err(first_error
                .unwrap_or_else(|| Error::Output("no audio output could be opened".into())));
        }

        debug!(opened, %format, "outputs open");
        self.state.lock().unwrap().open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    /// Queue one chunk on every open output.
    pub fn play(&self, chunk: Box<MusicChunk>) -> Result<()> {
        let open_controls: Vec<_> = self
            .controls()
            .into_iter()
            .filter(|c| c.is_open())
            .collect();
        if open_controls.is_empty() {
            // give the chunk back before failing
            if let Some(buffer) = self.state.lock().unwrap().buffer.clone() {
                buffer.return_chunk(chunk);
            }
            return Err(Error::Output("all audio outputs are closed".into()));
        }

        self.pipe.push(chunk);
        for control in open_controls {
            control.signal_play();
        }
        Ok(())
    }

    pub fn set_pause(&self, pause: bool) {
        for control in self.controls() {
            if control.is_open() {
                control.set_pause(pause);
            }
        }
    }

    /// Drop all queued chunks and everything the outputs hold in flight.
    pub fn cancel(&self) {
        for control in self.controls() {
            if control.is_open() {
                control.cancel();
            }
        }
        if let Some(buffer) = self.state.lock().unwrap().buffer.clone() {
            self.pipe.clear(&buffer);
        }
    }

    /// Close all outputs and flush the pipe.
    pub fn close(&self) {
        for control in self.controls() {
            if control.is_open() {
                control.close();
            }
        }
        let mut state = self.state.lock().unwrap();
        if let Some(buffer) = state.buffer.clone() {
            self.pipe.clear(&buffer);
        }
        state.open = false;
        state.in_format = None;
        state.buffer = None;
    }

    /// Return fully-played chunks to the pool; reports the number of chunks
    /// still queued.
    pub fn check(&self) -> usize {
        let buffer = self.state.lock().unwrap().buffer.clone();
        match buffer {
            Some(buffer) => self.pipe.collect(&buffer),
            None => self.pipe.size(),
        }
    }

    /// Aggregate the first stored failure of any output.
    pub fn collect_error(&self) -> Option<Error> {
        for control in self.controls() {
            if let Some(err) = control.take_error() {
                return Some(err);
            }
        }
        None
    }

    /// Are any outputs still able to play?
    pub fn has_open_output(&self) -> bool {
        self.controls().iter().any(|c| c.is_open())
    }

    /// Apply changed `enabled` flags: open newly enabled outputs (when
    /// playback is running) and close disabled ones.
    pub fn update(&self) {
        let (open, format, replay_gain_mode) = {
            let state = self.state.lock().unwrap();
            (state.open, state.in_format, state.replay_gain_mode)
        };

        for control in self.controls() {
            if control.is_enabled() && !control.is_open() {
                if let (true, Some(format)) = (open, format) {
                    let consumer = SharedPipeConsumer::new(Arc::clone(&self.pipe));
                    if !control.open(format, consumer, replay_gain_mode) {
                        warn!(output = control.name(), "re-enable failed");
                    }
                }
            } else if !control.is_enabled() && control.is_open() {
                control.close();
            }
        }
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        for control in self.controls() {
            if control.name() == name {
                control.set_enabled(enabled);
                return true;
            }
        }
        false
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        self.state.lock().unwrap().replay_gain_mode = mode;
    }

    /// Stop every output thread; the engine is shutting down.
    pub fn kill(&self) {
        self.close();
        for control in self.controls() {
            control.kill();
        }
    }
}
