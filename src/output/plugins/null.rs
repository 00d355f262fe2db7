//! Null output driver
//!
//! Discards everything it is given. With `sync` enabled it consumes data at
//! the natural playback rate, which makes it usable as a stand-in device for
//! the demo binary; without it, data is swallowed as fast as it arrives
//! (useful for tests).

use std::thread::sleep;

use crate::audio::format::AudioFormat;
use crate::error::{Error, Result};
use crate::output::driver::AudioOutputDriver;

pub struct NullOutputDriver {
    sync: bool,
    format: Option<AudioFormat>,
}

impl NullOutputDriver {
    pub fn new(sync: bool) -> Self {
        Self { sync, format: None }
    }
}

impl AudioOutputDriver for NullOutputDriver {
    fn open(&mut self, format: AudioFormat) -> Result<()> {
        self.format = Some(format);
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
    }

    fn play(&mut self, data: &[u8]) -> Result<usize> {
        let format = self
            .format
            .ok_or_else(|| Error::Output("null output is not open".into()))?;
        if self.sync {
            sleep(format.size_to_time(data.len()));
        }
        Ok(data.len())
    }
}
