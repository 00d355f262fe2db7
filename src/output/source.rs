//! Per-output source stage
//!
//! Pulls chunks from the shared pipe cursor, applies the per-song replay
//! gain, performs cross-fade mixing when a chunk carries a companion, and
//! runs the output's filter chain. The result is a byte stream the output
//! thread feeds to its device driver in driver-sized bites.

use std::sync::Arc;

use tracing::debug;

use crate::audio::chunk::{MusicChunk, REPLAY_GAIN_IGNORE};
use crate::audio::format::AudioFormat;
use crate::error::{Error, Result};
use crate::filter::chain::{FilterChain, PreparedFilterChain};
use crate::filter::replay_gain::{PreparedReplayGainFilter, ReplayGainFilter};
use crate::filter::Filter;
use crate::output::pipe::SharedPipeConsumer;
use crate::pcm::mix::{mix, PcmDither};
use crate::replay_gain::ReplayGainMode;
use crate::tag::Tag;

/// The filter/mix stage between the pipe and one output driver.
pub struct AudioOutputSource {
    in_audio_format: Option<AudioFormat>,

    consumer: Option<SharedPipeConsumer>,

    /// The chunk currently being drained; exactly one chunk is in flight
    current_chunk: Option<Arc<MusicChunk>>,

    /// Tag snapshot of the current chunk, not yet forwarded to the driver
    pending_tag: Option<Tag>,

    /// Filtered bytes of the current chunk not yet written to the device
    pending_data: Vec<u8>,
    pending_offset: usize,

    replay_gain_filter: Option<ReplayGainFilter>,
    replay_gain_serial: u32,

    /// Separate gain filter for the cross-fade companion song
    other_replay_gain_filter: Option<ReplayGainFilter>,
    other_replay_gain_serial: u32,

    replay_gain_mode: ReplayGainMode,

    filter: Option<FilterChain>,

    cross_fade_dither: PcmDither,
}

impl AudioOutputSource {
    pub fn new() -> Self {
        Self {
            in_audio_format: None,
            consumer: None,
            current_chunk: None,
            pending_tag: None,
            pending_data: Vec::new(),
            pending_offset: 0,
            replay_gain_filter: None,
            replay_gain_serial: 0,
            other_replay_gain_filter: None,
            other_replay_gain_serial: 0,
            replay_gain_mode: ReplayGainMode::Off,
            filter: None,
            cross_fade_dither: PcmDither::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.in_audio_format.is_some()
    }

    /// Bind to a pipe cursor and build the filters. Re-opening with a
    /// different input format tears the filter chain down and rebuilds it.
    /// Returns the format the driver must be opened with.
    pub fn open(
        &mut self,
        format: AudioFormat,
        consumer: SharedPipeConsumer,
        prepared_replay_gain: Option<&PreparedReplayGainFilter>,
        prepared_other_replay_gain: Option<&PreparedReplayGainFilter>,
        prepared_filter: &PreparedFilterChain,
    ) -> Result<AudioFormat> {
        debug_assert!(format.is_valid());

        self.consumer = Some(consumer);

        if self.filter.is_some() && self.in_audio_format != Some(format) {
            // the filters must be rebuilt on any input format change
            self.close_filter();
        }

        if self.filter.is_none() {
            self.replay_gain_serial = 0;
            self.other_replay_gain_serial = 0;
            self.replay_gain_filter =
                prepared_replay_gain.map(|prepared| prepared.open(format));
            self.other_replay_gain_filter =
                prepared_other_replay_gain.map(|prepared| prepared.open(format));
            self.filter = Some(prepared_filter.open(format)?);
        }

        self.in_audio_format = Some(format);
        let out = self
            .filter
            .as_ref()
            .map(|f| f.out_format())
            .unwrap_or(format);
        Ok(out)
    }

    pub fn close(&mut self) {
        self.cancel();
        self.close_filter();
        self.consumer = None;
        self.in_audio_format = None;
    }

    /// Drop the chunk in flight and reset filter state.
    pub fn cancel(&mut self) {
        self.current_chunk = None;
        self.pending_tag = None;
        self.pending_data.clear();
        self.pending_offset = 0;

        if let Some(consumer) = self.consumer.as_mut() {
            consumer.cancel();
        }
        if let Some(filter) = self.replay_gain_filter.as_mut() {
            filter.reset();
        }
        if let Some(filter) = self.other_replay_gain_filter.as_mut() {
            filter.reset();
        }
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
    }

    fn close_filter(&mut self) {
        self.replay_gain_filter = None;
        self.other_replay_gain_filter = None;
        self.filter = None;
    }

    /// The player's current replay-gain mode, pushed down before each chunk.
    pub fn set_replay_gain_mode(&mut self, mode: ReplayGainMode) {
        self.replay_gain_mode = mode;
    }

    /// Make data available: finish the previous chunk if it is drained, pull
    /// the next one from the pipe and run it through the filters. Returns
    /// false when the pipe has nothing for this output yet.
    ///
    /// On a filter error the chunk is dropped and the error propagates as an
    /// output failure.
    pub fn fill(&mut self) -> Result<bool> {
        if self.current_chunk.is_some()
            && self.pending_tag.is_none()
            && self.pending_data[self.pending_offset..].is_empty()
        {
            self.finish_current_chunk();
        }

        if self.current_chunk.is_some() {
            return Ok(true);
        }

        let Some(consumer) = self.consumer.as_mut() else {
            return Ok(false);
        };
        let Some(chunk) = consumer.get() else {
            return Ok(false);
        };

        self.pending_tag = chunk.tag.clone();

        match self.filter_chunk(&chunk) {
            Ok(data) => {
                self.pending_data = data;
                self.pending_offset = 0;
                self.current_chunk = Some(chunk);
                Ok(true)
            }
            Err(err) => {
                drop(chunk);
                if let Some(consumer) = self.consumer.as_mut() {
                    consumer.cancel();
                }
                Err(err)
            }
        }
    }

    /// Take the tag snapshot of the current chunk, if any.
    pub fn read_tag(&mut self) -> Option<Tag> {
        self.pending_tag.take()
    }

    /// The filtered bytes not yet written to the device.
    pub fn peek_data(&self) -> &[u8] {
        &self.pending_data[self.pending_offset..]
    }

    /// Acknowledge `nbytes` written to the device. Returns true when the
    /// current chunk became fully consumed.
    pub fn consume_data(&mut self, nbytes: usize) -> bool {
        debug_assert!(self.pending_offset + nbytes <= self.pending_data.len());
        self.pending_offset += nbytes;

        if self.pending_data[self.pending_offset..].is_empty() && self.pending_tag.is_none() {
            self.finish_current_chunk();
            return true;
        }
        false
    }

    fn finish_current_chunk(&mut self) {
        if self.current_chunk.take().is_some() {
            self.pending_data.clear();
            self.pending_offset = 0;
            if let Some(consumer) = self.consumer.as_mut() {
                consumer.consume();
            }
        }
    }

    /// Apply the replay-gain filter for one chunk (primary or companion).
    fn chunk_data(
        chunk: &MusicChunk,
        filter: Option<&mut ReplayGainFilter>,
        serial: &mut u32,
        mode: ReplayGainMode,
    ) -> Result<Vec<u8>> {
        let data = chunk.data();
        if data.is_empty() {
            return Ok(Vec::new());
        }

        // IGNORE bypasses the gain filter entirely
        if chunk.replay_gain_serial == REPLAY_GAIN_IGNORE {
            return Ok(data.to_vec());
        }

        let Some(filter) = filter else {
            return Ok(data.to_vec());
        };

        filter.set_mode(mode);
        if chunk.replay_gain_serial != *serial {
            debug!(serial = chunk.replay_gain_serial, "new replay gain scope");
            filter.set_info(if chunk.replay_gain_serial != 0 {
                chunk.replay_gain_info
            } else {
                None
            });
            *serial = chunk.replay_gain_serial;
        }

        filter.filter(data)
    }

    /// Transform one chunk into output bytes: replay gain, cross-fade mix,
    /// filter chain.
    fn filter_chunk(&mut self, chunk: &MusicChunk) -> Result<Vec<u8>> {
        let in_format = self
            .in_audio_format
            .ok_or_else(|| Error::InvalidState("source is not open".into()))?;
        debug_assert!(chunk.check_format(&in_format));

        let mode = self.replay_gain_mode;
        let mut data = Self::chunk_data(
            chunk,
            self.replay_gain_filter.as_mut(),
            &mut self.replay_gain_serial,
            mode,
        )?;

        if let Some(other) = chunk.other.as_deref() {
            if !other.check_format(&in_format) {
                return Err(Error::FormatMismatch(in_format.format));
            }

            let other_data = Self::chunk_data(
                other,
                self.other_replay_gain_filter.as_mut(),
                &mut self.other_replay_gain_serial,
                mode,
            )?;

            if !other_data.is_empty() && !data.is_empty() {
                // The companion buffer becomes the output. Where both songs
                // overlap they are mixed; if the companion is longer, its
                // trailer is played as-is (the next song continuing alone).
                let mut mixed = other_data;
                let overlap = mixed.len().min(data.len());

                let portion1 = if chunk.mix_ratio >= 0.0 {
                    // invert: portion1 weights the companion buffer
                    1.0 - chunk.mix_ratio
                } else {
                    // MixRamp: additive overlap
                    chunk.mix_ratio
                };

                mix(
                    in_format.format,
                    &mut mixed[..overlap],
                    &data[..overlap],
                    portion1,
                    &mut self.cross_fade_dither,
                )?;
                data = mixed;
            }
        }

        match self.filter.as_mut() {
            Some(filter) => filter.filter(&data),
            None => Ok(data),
        }
    }
}

impl Default for AudioOutputSource {
    fn default() -> Self {
        Self::new()
    }
}
