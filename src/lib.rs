//! # aulos
//!
//! The playback engine of a music daemon: a player thread orchestrating a
//! decoder thread and one output thread per configured output, all meeting
//! at a bounded pipe of fixed-size PCM chunks.
//!
//! Control flow runs client → player → decoder/outputs through synchronous
//! command handshakes over a shared mutex and per-role condition variables;
//! data flows decoder → pipe → player (cross-fade mixing) → outputs. The
//! finite chunk pool is the only backpressure mechanism: when the outputs
//! stall, the decoder blocks on the pool.
//!
//! ```no_run
//! use std::sync::Arc;
//! use aulos::config::PlayerConfig;
//! use aulos::decoder::plugins::default_plugins;
//! use aulos::events::EventBus;
//! use aulos::filter::PreparedFilterChain;
//! use aulos::output::plugins::NullOutputDriver;
//! use aulos::player::PlayerControl;
//! use aulos::song::Song;
//!
//! let events = Arc::new(EventBus::new());
//! let player = PlayerControl::new(PlayerConfig::default(), default_plugins(), events);
//! player.outputs().add(
//!     "null",
//!     Box::new(NullOutputDriver::new(true)),
//!     PreparedFilterChain::new(),
//! );
//! player.play(Song::new("/music/example.flac"))?;
//! # Ok::<(), aulos::error::Error>(())
//! ```

pub mod audio;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod filter;
pub mod output;
pub mod pcm;
pub mod player;
pub mod replay_gain;
pub mod song;
pub mod tag;

pub use error::{Error, Result};
pub use player::{PlayerControl, PlayerState, PlayerStatus};
pub use song::Song;
