//! Position arithmetic across tempo and meter changes
//!
//! Walking beats from frame positions, with and without tempo changes in
//! the walked range. 120 bpm is 24e3 samples per beat at 48k, 240 bpm is
//! 12e3.

use tactus_core::{BbtTime, CurveKind, LockStyle, Meter, Tempo, TempoMap};

const FR: i64 = 48_000;
const FRAMES_PER_BEAT: i64 = 24_000;

fn constant_120_map() -> TempoMap {
    let map = TempoMap::new(FR);
    map.replace_meter(
        map.first_meter().id(),
        Meter::new(4.0, 4.0),
        BbtTime::ONSET,
        0,
        LockStyle::AudioTime,
    )
    .unwrap();
    map.replace_tempo(
        map.first_tempo().id(),
        Tempo::quarter(120.0),
        0.0,
        0,
        CurveKind::Constant,
        LockStyle::AudioTime,
    )
    .unwrap();
    map
}

#[test]
fn test_walk_single_tempo() {
    let map = constant_120_map();

    // add 1 beat to beat 3 of the first bar
    let r = map.framepos_plus_beats(FRAMES_PER_BEAT * 2, 1.0);
    assert_eq!(r, FRAMES_PER_BEAT * 3);

    // add 4 beats to a negative frame one beat before zero
    let r = map.framepos_plus_beats(-FRAMES_PER_BEAT, 4.0);
    assert_eq!(r, FRAMES_PER_BEAT * 3);
}

#[test]
fn test_walk_over_tempo_change() {
    let map = constant_120_map();

    // 120 bpm at bar 1, 240 bpm at bar 4: bar 4 starts at 288e3
    map.add_tempo(
        Tempo::quarter(240.0),
        12.0 / 4.0,
        0,
        CurveKind::Constant,
        LockStyle::MusicTime,
    )
    .unwrap();

    // add 1 beat to 1|2
    let r = map.framepos_plus_beats(24_000, 1.0);
    assert_eq!(r, 48_000);

    // add 2 beats to 3|4, over the tempo change
    let r = map.framepos_plus_beats(264_000, 2.0);
    assert_eq!(r, 264_000 + 24_000 + 12_000);

    // add 2.5 beats to 3|3|960, over the tempo change
    let r = map.framepos_plus_beats(264_000 - 12_000, 2.5);
    assert_eq!(r, 264_000 + 24_000 + 12_000);
}

#[test]
fn test_walk_over_tempo_change_with_meter_change() {
    // a meter change at the tempo change must not affect beat arithmetic
    let map = constant_120_map();
    map.add_tempo(
        Tempo::quarter(240.0),
        12.0 / 4.0,
        0,
        CurveKind::Constant,
        LockStyle::MusicTime,
    )
    .unwrap();
    map.add_meter(
        Meter::new(3.0, 4.0),
        12.0,
        BbtTime::new(4, 1, 0),
        0,
        LockStyle::MusicTime,
    )
    .unwrap();

    let r = map.framepos_plus_beats(24_000, 1.0);
    assert_eq!(r, 48_000);

    let r = map.framepos_plus_beats(264_000, 2.0);
    assert_eq!(r, 300_000);

    let r = map.framepos_plus_beats(252_000, 2.5);
    assert_eq!(r, 300_000);
}

#[test]
fn test_walk_backwards() {
    let map = constant_120_map();
    assert_eq!(map.framepos_minus_beats(72_000, 1.0), 48_000);
    assert_eq!(map.framepos_minus_beats(24_000, 2.0), -24_000);
}

#[test]
fn test_framewalk_to_beats() {
    let map = constant_120_map();
    map.add_tempo(
        Tempo::quarter(240.0),
        3.0,
        0,
        CurveKind::Constant,
        LockStyle::MusicTime,
    )
    .unwrap();

    // 288e3 is 12 beats in, one more 240bpm beat past it is 12e3 frames
    assert_eq!(map.framewalk_to_beats(288_000, 12_000), 1.0);
    // two beats at 120 bpm
    assert_eq!(map.framewalk_to_beats(0, 48_000), 2.0);
}

#[test]
fn test_framepos_plus_bbt() {
    let map = constant_120_map();

    // one bar from the origin in 4/4
    let r = map.framepos_plus_bbt(0, BbtTime::new(1, 0, 0));
    assert_eq!(r, 96_000);

    // two beats from beat 2
    let r = map.framepos_plus_bbt(24_000, BbtTime::new(0, 2, 0));
    assert_eq!(r, 96_000 - 24_000);
}

#[test]
fn test_exact_roundtrip_at_arbitrary_frames() {
    let map = constant_120_map();
    map.add_tempo(
        Tempo::quarter(240.0),
        3.0,
        0,
        CurveKind::Constant,
        LockStyle::MusicTime,
    )
    .unwrap();

    for &frame in &[0, 1, 49, 24_001, 287_999, 288_000, 288_001, 500_017] {
        assert_eq!(
            map.frame_at_beat(map.beat_at_frame(frame)),
            frame,
            "round trip failed at frame {frame}"
        );
    }
}
