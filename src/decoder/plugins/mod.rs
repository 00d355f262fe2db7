//! Built-in decoder plugins

pub mod symphonia;

use crate::decoder::plugin::DecoderPlugin;

/// The plugin set a stock engine ships with.
pub fn default_plugins() -> Vec<Box<dyn DecoderPlugin>> {
    vec![Box::new(self::symphonia::SymphoniaDecoderPlugin)]
}
