//! Raw PCM operations shared by the output stage.

pub mod mix;
