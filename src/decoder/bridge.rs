//! Decoder-side plugin bridge
//!
//! Implements the [`DecoderClient`] contract on top of the decoder control:
//! allocates chunks from the shared pool (waiting cooperatively when it is
//! exhausted), stamps them with timing and replay-gain data and pushes them
//! into the pipe. One bridge exists per decoded song, owned by the decoder
//! thread.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::audio::buffer::MusicBuffer;
use crate::audio::chunk::MusicChunk;
use crate::audio::format::AudioFormat;
use crate::audio::pipe::MusicPipe;
use crate::decoder::command::DecoderCommand;
use crate::decoder::control::DecoderControl;
use crate::decoder::plugin::DecoderClient;
use crate::replay_gain::ReplayGainInfo;
use crate::tag::{MixRampInfo, Tag, TagType};

/// Serial source for replay-gain scopes. Global so that consecutive songs
/// never reuse a serial within one playback session.
static NEXT_REPLAY_GAIN_SERIAL: AtomicU32 = AtomicU32::new(1);

fn next_replay_gain_serial() -> u32 {
    NEXT_REPLAY_GAIN_SERIAL.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct DecoderBridge<'a> {
    dc: &'a DecoderControl,
    buffer: Arc<MusicBuffer>,
    pipe: Arc<MusicPipe>,

    /// End of the playable range; submission past it reports a stop
    end_time: Option<Duration>,

    /// Pending seek to the song's start offset, issued as a virtual seek
    /// command before the first data arrives
    initial_seek: Option<Duration>,
    initial_seek_running: bool,

    /// Format announced via `ready`
    format: Option<AudioFormat>,

    /// Song time of the next submitted sample, in seconds
    timestamp: f64,

    current_chunk: Option<Box<MusicChunk>>,

    replay_gain_serial: u32,
    replay_gain_info: Option<ReplayGainInfo>,
}

impl<'a> DecoderBridge<'a> {
    pub fn new(
        dc: &'a DecoderControl,
        buffer: Arc<MusicBuffer>,
        pipe: Arc<MusicPipe>,
        start_time: Duration,
        end_time: Option<Duration>,
    ) -> Self {
        Self {
            dc,
            buffer,
            pipe,
            end_time,
            initial_seek: (start_time > Duration::ZERO).then_some(start_time),
            initial_seek_running: false,
            format: None,
            timestamp: 0.0,
            current_chunk: None,
            replay_gain_serial: 0,
            replay_gain_info: None,
        }
    }

    /// Push the current (possibly partial) chunk into the pipe.
    pub fn flush(&mut self) {
        let Some(chunk) = self.current_chunk.take() else {
            return;
        };
        if chunk.is_empty() && chunk.tag.is_none() {
            self.buffer.return_chunk(chunk);
            return;
        }

        self.pipe.push(chunk);

        // wake the player only if it is actually listening
        let guard = self.dc.lock();
        if guard.decoder.client_is_waiting {
            self.dc.shared().player_cond.notify_all();
        }
    }

    /// Drop the current chunk without submitting it (after a seek).
    fn discard_current_chunk(&mut self) {
        if let Some(chunk) = self.current_chunk.take() {
            self.buffer.return_chunk(chunk);
        }
    }

    /// Make sure a writable chunk is available, waiting for the pool when it
    /// is exhausted. Returns the pending command if one arrived meanwhile.
    fn ensure_chunk(&mut self) -> Option<DecoderCommand> {
        if self.current_chunk.is_some() {
            return None;
        }

        loop {
            if let Some(mut chunk) = self.buffer.allocate() {
                chunk.replay_gain_serial = self.replay_gain_serial;
                chunk.replay_gain_info = (self.replay_gain_serial != 0)
                    .then_some(self.replay_gain_info)
                    .flatten();
                chunk.time = Some(Duration::from_secs_f64(self.timestamp));
                self.current_chunk = Some(chunk);
                return None;
            }

            trace!("chunk pool exhausted, decoder waiting");
            let guard = self.dc.lock();
            let cmd = guard.decoder.command;
            if cmd != DecoderCommand::None {
                return Some(cmd);
            }
            let _guard = self.dc.wait(guard);
        }
    }

    fn pending_command(&self) -> DecoderCommand {
        self.dc.lock().decoder.command
    }
}

impl DecoderClient for DecoderBridge<'_> {
    fn ready(&mut self, format: AudioFormat, seekable: bool, total_time: Option<Duration>) {
        debug_assert!(self.format.is_none(), "ready must be called once");
        debug_assert!(format.is_valid());
        self.format = Some(format);

        let mut guard = self.dc.lock();
        self.dc.set_ready(&mut guard, format, seekable, total_time);
    }

    fn get_command(&mut self) -> DecoderCommand {
        {
            let guard = self.dc.lock();
            if guard.decoder.command != DecoderCommand::None {
                return guard.decoder.command;
            }
            if self.initial_seek.is_some() {
                if guard.decoder.seekable {
                    self.initial_seek_running = true;
                    return DecoderCommand::Seek;
                }
                // not seekable: give up the start offset, play from the head
                self.initial_seek = None;
            }
        }
        DecoderCommand::None
    }

    fn command_finished(&mut self) {
        if self.initial_seek_running {
            // the virtual initial seek completed; no client to notify
            self.initial_seek_running = false;
            if let Some(t) = self.initial_seek.take() {
                self.timestamp = t.as_secs_f64();
            }
            return;
        }

        let mut guard = self.dc.lock();
        if guard.decoder.command == DecoderCommand::Seek {
            self.timestamp = guard.decoder.seek_time.as_secs_f64();
        }
        drop(guard);
        self.discard_current_chunk();

        let mut guard = self.dc.lock();
        self.dc.command_finished(&mut guard);
    }

    fn seek_time(&mut self) -> Duration {
        if self.initial_seek_running {
            if let Some(t) = self.initial_seek {
                return t;
            }
        }
        self.dc.lock().decoder.seek_time
    }

    fn seek_error(&mut self) {
        if self.initial_seek_running {
            // the song is not seekable after all; play from the head
            self.initial_seek_running = false;
            self.initial_seek = None;
            return;
        }

        let mut guard = self.dc.lock();
        guard.decoder.seek_error = true;
        self.dc.command_finished(&mut guard);
    }

    fn submit_data(&mut self, mut data: &[u8], kbit_rate: u16) -> DecoderCommand {
        let Some(format) = self.format else {
            debug_assert!(false, "submit_data before ready");
            return DecoderCommand::Stop;
        };

        let cmd = self.pending_command();
        if cmd != DecoderCommand::None {
            return cmd;
        }

        // stop once the configured end of the playable range is reached
        if let Some(end) = self.end_time {
            if self.timestamp >= end.as_secs_f64() {
                return DecoderCommand::Stop;
            }
        }

        let frame_size = format.frame_size();

        while !data.is_empty() {
            if let Some(cmd) = self.ensure_chunk() {
                return cmd;
            }

            let (copied, full) = {
                // ensure_chunk just guaranteed a chunk is present
                let Some(chunk) = self.current_chunk.as_mut() else {
                    return DecoderCommand::Stop;
                };
                match chunk.write(format) {
                    None => (0, true),
                    Some(dest) => {
                        let mut n = dest.len().min(data.len());
                        n -= n % frame_size;
                        if n == 0 {
                            (0, true)
                        } else {
                            dest[..n].copy_from_slice(&data[..n]);
                            chunk.bit_rate = kbit_rate;
                            (n, chunk.expand(format, n))
                        }
                    }
                }
            };

            if copied == 0 {
                // the chunk had no room for a whole frame
                self.flush();
                continue;
            }

            data = &data[copied..];
            let frames = copied / frame_size;
            self.timestamp += frames as f64 / format.sample_rate as f64;

            if full {
                self.flush();
            }
        }

        DecoderCommand::None
    }

    fn submit_tag(&mut self, tag: Tag) -> DecoderCommand {
        debug!(?tag, "tag received");

        // MixRamp markers ride on tags; keep them in the control for the
        // cross-fade planner
        if tag.has(TagType::MixRampStart) || tag.has(TagType::MixRampEnd) {
            let mut guard = self.dc.lock();
            guard.decoder.mix_ramp = MixRampInfo::from_tag(&tag);
        }

        let cmd = self.pending_command();
        if cmd != DecoderCommand::None {
            return cmd;
        }

        // the snapshot travels in its own chunk so ordering relative to the
        // surrounding PCM data is preserved
        self.flush();
        if let Some(cmd) = self.ensure_chunk() {
            return cmd;
        }
        if let Some(chunk) = self.current_chunk.as_mut() {
            chunk.tag = Some(tag);
        }
        self.flush();
        DecoderCommand::None
    }

    fn submit_replay_gain(&mut self, info: Option<ReplayGainInfo>) {
        match info {
            Some(info) if info.is_defined() => {
                self.replay_gain_serial = next_replay_gain_serial();
                self.replay_gain_info = Some(info);

                // remember the applied dB value for the MixRamp planner
                let mut guard = self.dc.lock();
                let mode = guard.decoder.replay_gain_mode;
                let tuple = info.get(mode);
                if tuple.is_defined() {
                    let scale = tuple.calc_scale(self.dc.replay_gain_config());
                    guard.decoder.replay_gain_db = 20.0 * scale.log10();
                }
            }
            _ => {
                self.replay_gain_serial = 0;
                self.replay_gain_info = None;
            }
        }
    }

    fn submit_mix_ramp(&mut self, info: MixRampInfo) {
        let mut guard = self.dc.lock();
        guard.decoder.mix_ramp = info;
    }
}

impl Drop for DecoderBridge<'_> {
    fn drop(&mut self) {
        // never leak a chunk held by an aborted decode
        self.discard_current_chunk();
    }
}
