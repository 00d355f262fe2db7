//! Per-output thread and command surface
//!
//! Each output runs its own thread that drains the shared pipe through its
//! [`AudioOutputSource`] and writes to the device driver. Commands from the
//! player are handed over through a small mutex/condvar handshake; the
//! driver and the source are owned by the worker thread, so no lock is ever
//! held across a blocking device write.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::audio::format::AudioFormat;
use crate::error::{Error, Result};
use crate::filter::chain::PreparedFilterChain;
use crate::filter::replay_gain::PreparedReplayGainFilter;
use crate::output::driver::AudioOutputDriver;
use crate::output::pipe::SharedPipeConsumer;
use crate::output::source::AudioOutputSource;
use crate::replay_gain::ReplayGainMode;

/// Hook back into the player: called whenever this output finished a chunk
/// so the player can collect it and refill the pipe.
pub trait AudioOutputClient: Send + Sync {
    fn chunks_consumed(&self);
}

enum OutputCommand {
    Open(Box<OpenRequest>),
    Close,
    Pause(bool),
    Cancel,
    Kill,
}

struct OpenRequest {
    format: AudioFormat,
    consumer: SharedPipeConsumer,
    replay_gain_mode: ReplayGainMode,
}

struct OutputInner {
    command: Option<OutputCommand>,
    open: bool,
    enabled: bool,
    pause: bool,

    /// Chunks were queued while the worker was not looking; prevents a lost
    /// wakeup between an empty fill and the wait
    play_pending: bool,

    /// The most recent failure; taken by the player when aggregating
    error: Option<Error>,
}

struct OutputShared {
    inner: Mutex<OutputInner>,

    /// Wakes the worker thread (new command, or new chunks in the pipe)
    cond: Condvar,

    /// Wakes a caller waiting for command completion
    client_cond: Condvar,
}

/// Handle to one output thread.
pub struct AudioOutputControl {
    name: String,
    shared: Arc<OutputShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioOutputControl {
    pub fn new(
        name: impl Into<String>,
        driver: Box<dyn AudioOutputDriver>,
        prepared_replay_gain: Option<PreparedReplayGainFilter>,
        prepared_other_replay_gain: Option<PreparedReplayGainFilter>,
        prepared_filter: PreparedFilterChain,
        client: Arc<dyn AudioOutputClient>,
    ) -> Arc<Self> {
        let name = name.into();
        let shared = Arc::new(OutputShared {
            inner: Mutex::new(OutputInner {
                command: None,
                open: false,
                enabled: true,
                pause: false,
                play_pending: false,
                error: None,
            }),
            cond: Condvar::new(),
            client_cond: Condvar::new(),
        });

        let worker = Worker {
            name: name.clone(),
            shared: Arc::clone(&shared),
            driver,
            source: AudioOutputSource::new(),
            prepared_replay_gain,
            prepared_other_replay_gain,
            prepared_filter,
            client,
        };
        let handle = thread::Builder::new()
            .name(format!("output:{name}"))
            .spawn(move || worker.run())
            .expect("failed to spawn output thread");

        let control = Arc::new(Self {
            name,
            shared,
            thread: Mutex::new(Some(handle)),
        });
        control
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn synchronous_command(&self, command: OutputCommand) {
        let mut inner = self.shared.inner.lock().unwrap();
        while inner.command.is_some() {
            inner = self.shared.client_cond.wait(inner).unwrap();
        }
        inner.command = Some(command);
        self.shared.cond.notify_all();
        while inner.command.is_some() {
            inner = self.shared.client_cond.wait(inner).unwrap();
        }
    }

    /// Open the output for the given input format. Errors surface through
    /// [`take_error`](Self::take_error).
    pub fn open(
        &self,
        format: AudioFormat,
        consumer: SharedPipeConsumer,
        replay_gain_mode: ReplayGainMode,
    ) -> bool {
        self.synchronous_command(OutputCommand::Open(Box::new(OpenRequest {
            format,
            consumer,
            replay_gain_mode,
        })));
        self.shared.inner.lock().unwrap().open
    }

    pub fn close(&self) {
        self.synchronous_command(OutputCommand::Close);
    }

    pub fn set_pause(&self, pause: bool) {
        self.synchronous_command(OutputCommand::Pause(pause));
    }

    pub fn cancel(&self) {
        self.synchronous_command(OutputCommand::Cancel);
    }

    /// Wake the worker because new chunks were queued.
    pub fn signal_play(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.play_pending = true;
        self.shared.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.shared.inner.lock().unwrap().open
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.inner.lock().unwrap().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.inner.lock().unwrap().enabled = enabled;
    }

    /// Take the stored failure, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.inner.lock().unwrap().error.take()
    }

    /// Stop the worker thread and join it.
    pub fn kill(&self) {
        self.synchronous_command(OutputCommand::Kill);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Thread-owned half of one output.
struct Worker {
    name: String,
    shared: Arc<OutputShared>,
    driver: Box<dyn AudioOutputDriver>,
    source: AudioOutputSource,
    prepared_replay_gain: Option<PreparedReplayGainFilter>,
    prepared_other_replay_gain: Option<PreparedReplayGainFilter>,
    prepared_filter: PreparedFilterChain,
    client: Arc<dyn AudioOutputClient>,
}

impl Worker {
    fn run(mut self) {
        debug!(output = %self.name, "output thread started");

        loop {
            let command = {
                let mut inner = self.shared.inner.lock().unwrap();
                loop {
                    if let Some(command) = inner.command.take() {
                        break Some(command);
                    }
                    if inner.open && !inner.pause {
                        break None;
                    }
                    inner = self.shared.cond.wait(inner).unwrap();
                }
            };

            match command {
                Some(OutputCommand::Open(request)) => self.handle_open(*request),
                Some(OutputCommand::Close) => {
                    self.close(false);
                    self.finish_command(|inner| inner.open = false);
                }
                Some(OutputCommand::Pause(pause)) => {
                    if pause {
                        self.driver.pause();
                    }
                    self.finish_command(|inner| inner.pause = pause);
                }
                Some(OutputCommand::Cancel) => {
                    self.source.cancel();
                    self.driver.cancel();
                    self.finish_command(|_| {});
                }
                Some(OutputCommand::Kill) => {
                    self.close(false);
                    self.finish_command(|inner| inner.open = false);
                    break;
                }
                None => match self.play_once() {
                    Ok(true) => {}
                    Ok(false) => {
                        // pipe empty: wait until the player queues more
                        let mut inner = self.shared.inner.lock().unwrap();
                        if inner.play_pending {
                            // a push raced with the empty fill; retry
                            inner.play_pending = false;
                        } else if inner.command.is_none() {
                            let _unused = self.shared.cond.wait(inner).unwrap();
                        }
                    }
                    Err(err) => {
                        error!(output = %self.name, %err, "output failed");
                        self.close(false);
                        {
                            let mut inner = self.shared.inner.lock().unwrap();
                            inner.open = false;
                            inner.error = Some(err);
                        }
                        // wake the player so it notices the failure
                        self.client.chunks_consumed();
                    }
                },
            }
        }

        debug!(output = %self.name, "output thread exiting");
    }

    fn handle_open(&mut self, request: OpenRequest) {
        if self.source.is_open() {
            // re-open (format change): release the device first
            self.driver.drain();
            self.driver.close();
        }

        let opened = self.source.open(
            request.format,
            request.consumer,
            self.prepared_replay_gain.as_ref(),
            self.prepared_other_replay_gain.as_ref(),
            &self.prepared_filter,
        );
        let result = match opened {
            Ok(out_format) => {
                self.source.set_replay_gain_mode(request.replay_gain_mode);
                self.driver.open(out_format)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                info!(output = %self.name, format = %request.format, "output opened");
                self.finish_command(|inner| {
                    inner.open = true;
                    inner.pause = false;
                });
            }
            Err(err) => {
                warn!(output = %self.name, %err, "open failed");
                self.source.close();
                self.finish_command(|inner| {
                    inner.open = false;
                    inner.error = Some(err);
                });
            }
        }
    }

    fn close(&mut self, drain: bool) {
        if self.source.is_open() {
            if drain {
                self.driver.drain();
            } else {
                self.driver.cancel();
            }
            self.driver.close();
            self.source.close();
            info!(output = %self.name, "output closed");
        }
    }

    fn finish_command(&self, update: impl FnOnce(&mut OutputInner)) {
        let mut inner = self.shared.inner.lock().unwrap();
        update(&mut inner);
        self.shared.client_cond.notify_all();
    }

    /// Pull one bite of data through the source and into the driver.
    /// `Ok(false)` means the pipe had nothing for us.
    fn play_once(&mut self) -> Result<bool> {
        if !self.source.fill()? {
            return Ok(false);
        }

        if let Some(tag) = self.source.read_tag() {
            self.driver.send_tag(&tag);
        }

        let data = self.source.peek_data();
        if data.is_empty() {
            // tag-only chunk; the next fill() consumes it
            if self.source.consume_data(0) {
                self.client.chunks_consumed();
            }
            return Ok(true);
        }

        let nbytes = self.driver.play(data)?;
        if nbytes == 0 {
            return Err(Error::Output(format!(
                "{}: driver made no progress",
                self.name
            )));
        }

        if self.source.consume_data(nbytes) {
            self.client.chunks_consumed();
        }
        Ok(true)
    }
}
