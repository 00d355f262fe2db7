//! Decoder thread
//!
//! Waits for commands on the shared condvar, opens the song, selects a
//! plugin and runs it through the [`DecoderBridge`]. Any failure during the
//! start phase or mid-decode lands in the stored error with state `Error`;
//! a clean end of stream goes back to `Stop`.

use std::path::Path;
use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::decoder::bridge::DecoderBridge;
use crate::decoder::command::{DecoderCommand, DecoderState};
use crate::decoder::control::DecoderControl;
use crate::decoder::plugin::find_plugin;
use crate::error::{Error, Result};
use crate::player::control::ControlInner;
use crate::song::Song;

pub(crate) fn spawn(dc: Arc<DecoderControl>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("decoder".into())
        .spawn(move || run(&dc))
        .expect("failed to spawn decoder thread")
}

fn run(dc: &DecoderControl) {
    debug!("decoder thread started");
    let mut guard = dc.lock();
    loop {
        if guard.decoder.quit {
            break;
        }

        match guard.decoder.command {
            DecoderCommand::Start => {
                guard.decoder.cycle_mix_ramp();
                guard.decoder.replay_gain_prev_db = guard.decoder.replay_gain_db;
                guard.decoder.replay_gain_db = 0.0;
                guard = run_decoder(dc, guard);
            }

            DecoderCommand::Seek => {
                // this seek arrived after the decoder already finished the
                // song; re-run the decode from the seek position
                if guard.decoder.song.is_some() {
                    guard = run_decoder(dc, guard);
                } else {
                    guard.decoder.seek_error = true;
                    dc.command_finished(&mut guard);
                }
            }

            DecoderCommand::Stop => {
                dc.command_finished(&mut guard);
            }

            DecoderCommand::None => {
                guard = dc.wait(guard);
            }
        }
    }
    debug!("decoder thread exiting");
}

/// Acknowledge the start (or late-seek) command and decode one song to its
/// end, a stop command or an error.
fn run_decoder<'a>(
    dc: &'a DecoderControl,
    mut guard: MutexGuard<'a, ControlInner>,
) -> MutexGuard<'a, ControlInner> {
    let late_seek = guard.decoder.command == DecoderCommand::Seek;

    guard.decoder.state = DecoderState::Start;
    guard.decoder.error = None;
    guard.decoder.in_audio_format = None;
    guard.decoder.out_audio_format = None;
    guard.decoder.seekable = false;

    let song = guard.decoder.song.clone();
    let buffer = guard.decoder.buffer.clone();
    let pipe = guard.decoder.pipe.clone();
    let start_time = if late_seek {
        guard.decoder.seek_time
    } else {
        guard.decoder.start_time
    };
    let end_time = guard.decoder.end_time;

    dc.command_finished(&mut guard);
    drop(guard);

    let result = match (song, buffer, pipe) {
        (Some(song), Some(buffer), Some(pipe)) => {
            decode_song(dc, &song, buffer, pipe, start_time, end_time)
        }
        _ => Err(Error::InvalidState("decoder started without a song".into())),
    };

    let mut guard = dc.lock();
    match result {
        Ok(()) => {
            guard.decoder.state = DecoderState::Stop;
        }
        Err(err) => {
            error!(%err, "decoder failed");
            guard.decoder.error = Some(err);
            guard.decoder.state = DecoderState::Error;
        }
    }

    // wake the player: end of decode and state changes are events it waits on
    dc.shared().player_cond.notify_all();
    guard
}

fn decode_song(
    dc: &DecoderControl,
    song: &Song,
    buffer: Arc<crate::audio::buffer::MusicBuffer>,
    pipe: Arc<crate::audio::pipe::MusicPipe>,
    start_time: Duration,
    end_time: Option<Duration>,
) -> Result<()> {
    info!(uri = %song.uri, "decoding");

    let plugin = find_plugin(dc.plugins(), song.suffix())
        .ok_or_else(|| Error::UnsupportedUri(song.uri.clone()))?;
    debug!(plugin = plugin.name(), "plugin selected");

    let mut bridge = DecoderBridge::new(dc, buffer, pipe, start_time, end_time);
    plugin.decode(&mut bridge, Path::new(&song.uri))?;

    // a decode that never became ready is a failure even if the plugin
    // returned cleanly
    {
        let guard = dc.lock();
        if guard.decoder.state == DecoderState::Start {
            return Err(Error::Decoder(format!(
                "plugin {} closed the stream without becoming ready",
                plugin.name()
            )));
        }
    }

    bridge.flush();
    info!(uri = %song.uri, "decode finished");
    Ok(())
}
