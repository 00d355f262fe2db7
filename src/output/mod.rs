//! Output side of the engine: the per-output source and thread, the shared
//! outputs pipe, and the facade bundling all outputs.

pub mod control;
pub mod driver;
pub mod multiple;
pub mod pipe;
pub mod plugins;
pub mod source;

pub use control::{AudioOutputClient, AudioOutputControl};
pub use driver::AudioOutputDriver;
pub use multiple::MultipleOutputs;
pub use pipe::{OutputPipe, SharedPipeConsumer};
pub use source::AudioOutputSource;
