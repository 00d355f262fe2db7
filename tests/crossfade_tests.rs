//! Cross-fade behavior through the whole engine: two constant-valued songs
//! make the mix directly observable in the recorded output.

mod helpers;

use std::time::Duration;

use aulos::player::PlayerState;

use helpers::{engine_with, mock_song, mock_song_at, wait_for, MockDecoderPlugin};

const WAIT: Duration = Duration::from_secs(15);

const A: f32 = 0.25;
const B: f32 = 0.75;
const EPS: f32 = 1e-4;

fn run_transition(crossfade: f32, second_rate: Option<u32>) -> helpers::Recording {
    let fixture = engine_with(
        MockDecoderPlugin::default(),
        Some(Duration::from_millis(1)),
    );
    let player = &fixture.player;

    player.set_cross_fade(crossfade);
    player.play(mock_song(A, 1.0)).unwrap();
    let second = match second_rate {
        Some(rate) => mock_song_at(B, 1.0, rate),
        None => mock_song(B, 1.0),
    };
    player.enqueue_song(second).unwrap();

    assert!(wait_for(|| player.get_state() == PlayerState::Stop, WAIT));
    let recording = fixture.recording.clone();
    fixture.shutdown();
    recording
}

#[test]
fn crossfade_blends_monotonically() {
    let recording = run_transition(0.3, None);
    let samples = recording.samples();
    assert!(!samples.is_empty());

    // begins as pure A, ends as pure B
    assert!((samples[0] - A).abs() < EPS);
    assert!((samples[samples.len() - 1] - B).abs() < EPS);

    // somewhere in between, both songs are audible at once
    assert!(
        samples.iter().any(|&s| s > A + 0.1 && s < B - 0.1),
        "no blended samples found: cross-fade did not mix"
    );

    // the blend moves towards the next song without ever stepping back
    let mut last = samples[0];
    for &sample in &samples {
        assert!(
            sample >= last - EPS,
            "mix went backwards: {last} -> {sample}"
        );
        last = last.max(sample);
    }
}

#[test]
fn crossfade_duration_zero_never_mixes() {
    let recording = run_transition(0.0, None);
    let samples = recording.samples();
    assert!(!samples.is_empty());

    for &sample in &samples {
        assert!(
            (sample - A).abs() < EPS || (sample - B).abs() < EPS,
            "unexpected blended sample {sample}"
        );
    }

    // the switch is a single hard edge
    let switches = samples
        .windows(2)
        .filter(|w| (w[0] - w[1]).abs() > 0.1)
        .count();
    assert_eq!(switches, 1);
}

#[test]
fn format_change_skips_crossfade_and_reopens_outputs() {
    let recording = run_transition(0.3, Some(48000));
    let samples = recording.samples();

    // no blending across the incompatible transition
    for &sample in &samples {
        assert!(
            (sample - A).abs() < EPS || (sample - B).abs() < EPS,
            "unexpected blended sample {sample}"
        );
    }

    // the output was rebuilt for the new sample rate
    let opens = recording.opens();
    assert!(opens.len() >= 2, "expected a reopen, got {opens:?}");
    assert_eq!(opens[0].sample_rate, 44100);
    assert_eq!(opens[opens.len() - 1].sample_rate, 48000);

    // both songs were played in full
    let a_bytes = samples.iter().filter(|&&s| (s - A).abs() < EPS).count() * 4;
    let b_bytes = samples.iter().filter(|&&s| (s - B).abs() < EPS).count() * 4;
    assert_eq!(a_bytes, 44100 * 8);
    assert_eq!(b_bytes, 48000 * 8);
}
