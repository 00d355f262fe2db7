//! Decoder plugin contract
//!
//! A plugin turns one input stream into a sequence of PCM submissions. The
//! engine talks to plugins exclusively through these two traits: the plugin
//! pulls commands and pushes data via the [`DecoderClient`] it is handed, and
//! never touches the chunk pipe or the control structures directly.

use std::path::Path;
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::decoder::command::DecoderCommand;
use crate::error::Result;
use crate::replay_gain::ReplayGainInfo;
use crate::tag::{MixRampInfo, Tag};

/// The engine-side interface handed to a running plugin.
///
/// `submit_data` blocks cooperatively while the chunk pool is exhausted and
/// returns the pending command, so a well-behaved plugin observes stop and
/// seek requests within one block of data.
pub trait DecoderClient {
    /// Announce the stream parameters; moves the decoder from "starting" to
    /// "decoding". Must be called exactly once, before any submission.
    fn ready(&mut self, format: AudioFormat, seekable: bool, total_time: Option<Duration>);

    /// The command the plugin should act on next.
    fn get_command(&mut self) -> DecoderCommand;

    /// Acknowledge the pending command (after a successful seek).
    fn command_finished(&mut self);

    /// Target position of the pending seek command.
    fn seek_time(&mut self) -> Duration;

    /// Report that the pending seek cannot be satisfied.
    fn seek_error(&mut self);

    /// Submit interleaved PCM data in the format announced by `ready`.
    /// Returns the command the plugin must handle, or `None` to continue.
    fn submit_data(&mut self, data: &[u8], kbit_rate: u16) -> DecoderCommand;

    /// Submit a metadata snapshot delivered by the stream.
    fn submit_tag(&mut self, tag: Tag) -> DecoderCommand;

    /// Submit replay-gain data; starts a new gain scope for chunks that
    /// follow. `None` closes the scope.
    fn submit_replay_gain(&mut self, info: Option<ReplayGainInfo>);

    /// Submit MixRamp loudness markers for the current song.
    fn submit_mix_ramp(&mut self, info: MixRampInfo);
}

/// A decoder implementation for one family of stream formats.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this plugin wants to handle streams with this file suffix.
    fn supports_suffix(&self, suffix: &str) -> bool;

    /// Decode the stream, submitting everything through `client`. Returning
    /// `Ok` after a stop command (or at end of stream) is the normal exit.
    fn decode(&self, client: &mut dyn DecoderClient, path: &Path) -> Result<()>;
}

/// Select the first plugin that accepts the given suffix.
pub fn find_plugin<'a>(
    plugins: &'a [Box<dyn DecoderPlugin>],
    suffix: Option<&str>,
) -> Option<&'a dyn DecoderPlugin> {
    let suffix = suffix?;
    plugins
        .iter()
        .find(|p| p.supports_suffix(suffix))
        .map(|p| p.as_ref())
}
