//! Demonstration player
//!
//! Plays the given files through the engine into the null output (paced to
//! real time), printing status lines. Exists to exercise the full pipeline
//! outside of tests; the real daemon embeds the library.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use aulos::config::PlayerConfig;
use aulos::decoder::plugins::default_plugins;
use aulos::events::EventBus;
use aulos::filter::PreparedFilterChain;
use aulos::output::plugins::NullOutputDriver;
use aulos::player::{PlayerControl, PlayerState};
use aulos::song::Song;

#[derive(Parser)]
#[command(name = "aulos", about = "Play audio files through the aulos engine")]
struct Args {
    /// Files to play, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Cross-fade duration between songs in seconds
    #[arg(long, default_value_t = 0.0)]
    crossfade: f32,

    /// Log filter, e.g. "debug" or "aulos=trace"
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let events = Arc::new(EventBus::new());
    let player = PlayerControl::new(PlayerConfig::default(), default_plugins(), events);
    player.outputs().add(
        "null",
        Box::new(NullOutputDriver::new(true)),
        PreparedFilterChain::new(),
    );
    player.set_cross_fade(args.crossfade);

    let mut files = args.files.into_iter();
    let first = files.next().expect("clap guarantees at least one file");
    player.play(Song::new(first.to_string_lossy()))?;

    let mut pending: Vec<PathBuf> = files.collect();
    pending.reverse();
    let mut queued_id = None;

    loop {
        sleep(Duration::from_millis(500));
        let status = player.get_status();

        match status.state {
            PlayerState::Stop => {
                if let Some((kind, error)) = player.get_error() {
                    eprintln!("playback failed ({kind:?}): {error}");
                    player.clear_error();
                }
                if let Some(next) = pending.pop() {
                    player.play(Song::new(next.to_string_lossy()))?;
                    continue;
                }
                break;
            }
            state => {
                // keep exactly one song queued so cross-fading can happen
                let current = player.current_song_id();
                if state == PlayerState::Play && (queued_id.is_none() || queued_id == current) {
                    if let Some(next) = pending.pop() {
                        info!(file = %next.display(), "queueing next song");
                        let song = Song::new(next.to_string_lossy());
                        queued_id = Some(song.id);
                        player.enqueue_song(song)?;
                    }
                }
                println!(
                    "{:>5.1}s / {} [{}] {} kbit/s",
                    status.elapsed_time.as_secs_f32(),
                    status
                        .total_time
                        .map(|t| format!("{:.1}s", t.as_secs_f32()))
                        .unwrap_or_else(|| "?".into()),
                    match state {
                        PlayerState::Play => "playing",
                        PlayerState::Pause => "paused",
                        PlayerState::Stop => "stopped",
                    },
                    status.bit_rate,
                );
            }
        }
    }

    player.kill();
    Ok(())
}
