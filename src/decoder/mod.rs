//! Decoder side of the engine: control, thread, plugin contract and the
//! built-in plugins.

pub mod command;
pub mod control;
pub mod plugin;
pub mod plugins;

pub(crate) mod bridge;
pub(crate) mod thread;

pub use command::{DecoderCommand, DecoderState};
pub use control::DecoderControl;
pub use plugin::{DecoderClient, DecoderPlugin};
