//! Decoder command and state enums

use std::fmt;

/// Commands sent from the player thread to the decoder thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderCommand {
    /// No command pending; the owner has fully processed the last one
    #[default]
    None,

    /// Begin decoding the configured song
    Start,

    /// Abort the current decode
    Stop,

    /// Reposition within the current song
    Seek,
}

/// State of the decoder thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// Nothing is being decoded
    #[default]
    Stop,

    /// A start command was received; the stream is being opened
    Start,

    /// Chunks are being produced
    Decode,

    /// The last start failed: there was an I/O error or no plugin accepted
    /// the stream. Terminal until the next start, which implicitly clears it.
    Error,
}

impl fmt::Display for DecoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecoderCommand::None => "none",
            DecoderCommand::Start => "start",
            DecoderCommand::Stop => "stop",
            DecoderCommand::Seek => "seek",
        };
        f.write_str(s)
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecoderState::Stop => "stop",
            DecoderState::Start => "start",
            DecoderState::Decode => "decode",
            DecoderState::Error => "error",
        };
        f.write_str(s)
    }
}
