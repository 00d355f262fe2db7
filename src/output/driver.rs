//! Output device driver contract
//!
//! A driver wraps one audio device (or sink). Drivers must not buffer more
//! than roughly one chunk without acknowledging, so that pause and cancel
//! stay responsive.

use crate::audio::format::AudioFormat;
use crate::error::Result;
use crate::tag::Tag;

pub trait AudioOutputDriver: Send {
    /// Open the device for the given format.
    fn open(&mut self, format: AudioFormat) -> Result<()>;

    /// Close the device.
    fn close(&mut self);

    /// Write PCM data, blocking until at least part of it was accepted.
    /// Returns the number of bytes written.
    fn play(&mut self, data: &[u8]) -> Result<usize>;

    /// Drop buffered data as quickly as possible.
    fn cancel(&mut self) {}

    /// The stream is pausing; release the device if it cannot hold silence.
    fn pause(&mut self) {}

    /// Play buffered data to the end before closing.
    fn drain(&mut self) {}

    /// A new metadata snapshot crossed this position in the stream.
    fn send_tag(&mut self, _tag: &Tag) {}
}
