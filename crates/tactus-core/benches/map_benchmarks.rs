//! Tempo map query benchmarks
//!
//! The read path is O(sections) per query; these keep an eye on the walk
//! cost for a map with a realistic number of tempo changes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tactus_core::{BbtTime, CurveKind, LockStyle, Meter, Tempo, TempoMap};

const FR: i64 = 48_000;

fn busy_map() -> TempoMap {
    let map = TempoMap::new(FR);
    map.replace_tempo(
        map.first_tempo().id(),
        Tempo::quarter(120.0),
        0.0,
        0,
        CurveKind::Constant,
        LockStyle::AudioTime,
    )
    .expect("leading tempo");

    for i in 1..32i64 {
        let bpm = 100.0 + (i % 7) as f64 * 10.0;
        map.add_tempo(
            Tempo::quarter(bpm),
            i as f64,
            0,
            CurveKind::Ramp,
            LockStyle::MusicTime,
        )
        .expect("tempo insert");
    }
    map.add_meter(
        Meter::new(3.0, 4.0),
        32.0,
        BbtTime::new(9, 1, 0),
        0,
        LockStyle::MusicTime,
    )
    .expect("meter insert");
    map
}

fn bench_beat_at_frame(c: &mut Criterion) {
    let map = busy_map();
    c.bench_function("beat_at_frame", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for frame in (0..4_800_000).step_by(480_000) {
                acc += map.beat_at_frame(black_box(frame));
            }
            acc
        })
    });
}

fn bench_framepos_plus_beats(c: &mut Criterion) {
    let map = busy_map();
    c.bench_function("framepos_plus_beats", |b| {
        b.iter(|| map.framepos_plus_beats(black_box(240_000), black_box(7.5)))
    });
}

fn bench_get_grid(c: &mut Criterion) {
    let map = busy_map();
    c.bench_function("get_grid_60s", |b| {
        b.iter(|| map.get_grid(black_box(0), black_box(60 * FR)))
    });
}

criterion_group!(
    benches,
    bench_beat_at_frame,
    bench_framepos_plus_beats,
    bench_get_grid
);
criterion_main!(benches);
