//! Interpolation hot-path benchmarks.
//!
//! The tick loop evaluates every track once per frame; these benches keep
//! an eye on `position_at` (binary search + easing) and a full sequence
//! snapshot at prop scale (16 channels, dense keyframes).

use criterion::{Criterion, criterion_group, criterion_main};
use marionette_sequencer::easing::EasingKind;
use marionette_sequencer::sequence::{Sequence, SequenceDef};
use marionette_sequencer::track::{Keyframe, Track};
use std::hint::black_box;

fn dense_track(channel_id: u8, keyframes: usize) -> Track {
    let easings = [
        EasingKind::Linear,
        EasingKind::EaseIn,
        EasingKind::EaseOut,
        EasingKind::EaseInOut,
        EasingKind::Bounce,
        EasingKind::Elastic,
    ];
    Track {
        channel_id,
        speed_multiplier: 1.0,
        keyframes: (0..keyframes)
            .map(|i| Keyframe {
                time_offset: i as f64 * 0.1,
                position_us: 1500.0 + 400.0 * ((i % 7) as f64 / 6.0 - 0.5),
                easing: easings[i % easings.len()],
            })
            .collect(),
    }
}

fn bench_track_position_at(c: &mut Criterion) {
    let track = dense_track(0, 64);
    let end = track.end_offset();

    c.bench_function("track_position_at_64kf", |b| {
        let mut t = 0.0;
        b.iter(|| {
            t = (t + 0.017) % end;
            black_box(track.position_at(black_box(t)))
        });
    });
}

fn bench_sequence_snapshot(c: &mut Criterion) {
    let tracks: Vec<Track> = (0..16).map(|ch| dense_track(ch, 32)).collect();
    let duration = tracks
        .iter()
        .map(Track::end_offset)
        .fold(0.0_f64, f64::max);
    let sequence = Sequence::compile(SequenceDef {
        name: "bench".into(),
        duration,
        frame_rate: 50,
        looped: true,
        tracks,
    })
    .expect("bench sequence compiles");

    c.bench_function("sequence_snapshot_16ch", |b| {
        let mut t = 0.0;
        b.iter(|| {
            t = (t + 0.02) % duration;
            black_box(sequence.positions_at(black_box(t)))
        });
    });
}

criterion_group!(benches, bench_track_position_at, bench_sequence_snapshot);
criterion_main!(benches);
