//! Tempo map solving scenarios
//!
//! End-to-end checks of the solver: recomputation across tempo and meter
//! changes, ramp math against audio-locked pairs, constraint rejection, and
//! mutation atomicity.

use tactus_core::{BbtTime, CurveKind, LockStyle, Meter, Tempo, TempoMap};

const FR: i64 = 48_000;

/// A 4/4 map whose leading tempo is a constant `bpm` quarters per minute.
fn map_with_constant_leader(bpm: f64) -> TempoMap {
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
        Tempo::quarter(bpm),
        0.0,
        0,
        CurveKind::Constant,
        LockStyle::AudioTime,
    )
    .unwrap();
    map
}

#[test]
fn test_recompute_across_tempo_and_meter_change() {
    let map = map_with_constant_leader(120.0);

    // 120 bpm at bar 1, 240 bpm at bar 4 (pulse 3), meter change 3/4 at
    // bar 4. 120 bpm is 24e3 samples per beat, so bar 4 starts at 288e3.
    map.add_tempo(
        Tempo::quarter(240.0),
        3.0,
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

    let sections = map.sections();
    assert_eq!(sections.first().unwrap().frame(), 0);
    assert_eq!(sections.last().unwrap().frame(), 288_000);
}

#[test]
fn test_audio_locked_ramp_pair() {
    let map = TempoMap::new(FR);
    map.replace_tempo(
        map.first_tempo().id(),
        Tempo::quarter(77.0),
        0.0,
        0,
        CurveKind::Ramp,
        LockStyle::AudioTime,
    )
    .unwrap();
    map.add_tempo(
        Tempo::quarter(217.0),
        0.0,
        60 * FR,
        CurveKind::Ramp,
        LockStyle::AudioTime,
    )
    .unwrap();
    map.replace_meter(
        map.first_meter().id(),
        Meter::new(4.0, 4.0),
        BbtTime::ONSET,
        0,
        LockStyle::AudioTime,
    )
    .unwrap();

    let sections = map.sections();
    let tempos: Vec<_> = sections.iter().filter_map(|s| s.as_tempo()).collect();
    assert_eq!(tempos.len(), 2);
    let (ta, tb) = (tempos[0], tempos[1]);

    // the solved pair agrees with the curve in both directions
    assert_eq!(tb.frame(), ta.frame_at_tempo(tb.pulses_per_minute(), 300.0, FR));
    assert_eq!(tb.frame(), ta.frame_at_pulse(tb.pulse(), FR));

    // tempo at pulse self-check at 125 bpm
    let ppm = 125.0 / 4.0;
    assert!((ta.tempo_at_pulse(ta.pulse_at_tempo(ppm, 0, FR)) - ppm).abs() < 1e-12);

    // frame at pulse self-check 20 seconds in
    let target = 20 * FR;
    assert_eq!(ta.frame_at_pulse(ta.pulse_at_frame(target, FR), FR), target);
}

#[test]
fn test_ramp_between_music_locked_tempos() {
    // 120 to 180 pulses/min over 8 pulses: c is (180 - 120) / 8
    let map = TempoMap::new(FR);
    map.replace_tempo(
        map.first_tempo().id(),
        Tempo::new(120.0, 1.0),
        0.0,
        0,
        CurveKind::Ramp,
        LockStyle::AudioTime,
    )
    .unwrap();
    map.add_tempo(
        Tempo::new(180.0, 1.0),
        8.0,
        0,
        CurveKind::Ramp,
        LockStyle::MusicTime,
    )
    .unwrap();

    let sections = map.sections();
    let ta = sections.iter().filter_map(|s| s.as_tempo()).next().unwrap();

    assert!((ta.c() - 7.5).abs() < 1e-9);
    assert!((ta.tempo_at_pulse(4.0) - 150.0).abs() < 1e-9);

    // tempo at the frame of pulse 4 agrees up to frame quantization
    let f4 = map.frame_at_pulse(4.0);
    assert!((map.tempo_at_frame(f4).beats_per_minute() - 150.0).abs() < 1e-3);
}

#[test]
fn test_meter_on_non_bar_start_is_corrected() {
    let map = map_with_constant_leader(120.0);

    // bar 2 beat 3 is requested; meters may only start bars
    let requested = BbtTime::new(2, 3, 0);
    let beat = map.beat_at_bbt(requested);
    assert_eq!(beat, 6.0);

    let m = map
        .add_meter(Meter::new(4.0, 4.0), beat, requested, 0, LockStyle::MusicTime)
        .unwrap();

    assert_eq!(m.bbt(), BbtTime::new(2, 1, 0));
    assert_eq!(m.beat(), 4.0);
    assert_eq!(m.frame(), 96_000);
    // the old requested position now reads against the corrected meter
    assert_eq!(map.beat_at_bbt(BbtTime::new(2, 3, 0)), 6.0);
}

#[test]
fn test_movable_tempo_at_leading_meter_frame_rejected() {
    let map = map_with_constant_leader(120.0);
    let before = map.state();

    let result = map.add_tempo(
        Tempo::quarter(140.0),
        0.0,
        0,
        CurveKind::Constant,
        LockStyle::AudioTime,
    );
    assert!(result.is_err());
    assert_eq!(map.state(), before);
}

#[test]
fn test_insert_then_remove_leaves_map_indistinguishable() {
    let map = map_with_constant_leader(120.0);
    map.add_tempo(
        Tempo::quarter(240.0),
        3.0,
        0,
        CurveKind::Constant,
        LockStyle::MusicTime,
    )
    .unwrap();
    let before = map.state();

    let added = map
        .add_tempo(
            Tempo::quarter(90.0),
            6.0,
            0,
            CurveKind::Constant,
            LockStyle::MusicTime,
        )
        .unwrap();
    assert_ne!(map.state(), before);

    map.remove_tempo(added.id()).unwrap();
    assert_eq!(map.state(), before);
}

#[test]
fn test_solved_map_is_strictly_monotonic() {
    let map = map_with_constant_leader(120.0);
    map.add_tempo(
        Tempo::quarter(240.0),
        3.0,
        0,
        CurveKind::Ramp,
        LockStyle::MusicTime,
    )
    .unwrap();
    map.add_tempo(
        Tempo::quarter(90.0),
        8.0,
        0,
        CurveKind::Ramp,
        LockStyle::MusicTime,
    )
    .unwrap();

    let sections = map.sections();
    let tempos: Vec<_> = sections
        .iter()
        .filter_map(|s| s.as_tempo())
        .filter(|t| t.active())
        .collect();
    for pair in tempos.windows(2) {
        assert!(pair[0].frame() < pair[1].frame());
        assert!(pair[0].pulse() < pair[1].pulse());
    }
}

#[test]
fn test_gui_move_tempo_snaps_and_commits() {
    let map = map_with_constant_leader(120.0);
    let added = map
        .add_tempo(
            Tempo::quarter(240.0),
            4.0,
            0,
            CurveKind::Constant,
            LockStyle::MusicTime,
        )
        .unwrap();
    // 4 pulses at 120 quarters/min is 384e3; drag near beat 12 with
    // whole-beat snap
    assert_eq!(added.frame(), 384_000);
    map.gui_move_tempo(added.id(), 289_000, 1).unwrap();

    let sections = map.sections();
    let moved = sections
        .iter()
        .filter_map(|s| s.as_tempo())
        .find(|t| t.id() == added.id())
        .unwrap();
    assert_eq!(moved.pulse(), 3.0);
    assert_eq!(moved.frame(), 288_000);
}

#[test]
fn test_gui_move_immovable_section_fails() {
    let map = map_with_constant_leader(120.0);
    let before = map.state();
    let first = map.first_tempo();

    assert!(map.gui_move_tempo(first.id(), 48_000, 0).is_err());
    assert_eq!(map.state(), before);
}

#[test]
fn test_audio_locked_meter_carries_locked_tempo() {
    let map = map_with_constant_leader(120.0);
    let m = map
        .add_meter(
            Meter::new(3.0, 4.0),
            8.0,
            BbtTime::new(3, 1, 0),
            192_000,
            LockStyle::AudioTime,
        )
        .unwrap();
    assert_eq!(m.lock_style(), LockStyle::AudioTime);
    assert_eq!(m.frame(), 192_000);

    let sections = map.sections();
    let locked = sections
        .iter()
        .filter_map(|s| s.as_tempo())
        .find(|t| t.locked_to_meter())
        .expect("audio-locked meter must carry a meter-locked tempo");
    assert_eq!(locked.frame(), m.frame());
    assert_eq!(locked.pulse(), m.pulse());

    // removing the meter takes the locked tempo with it
    map.remove_meter(m.id()).unwrap();
    assert!(!map
        .sections()
        .iter()
        .filter_map(|s| s.as_tempo())
        .any(|t| t.locked_to_meter()));
}

#[test]
fn test_predict_and_can_solve() {
    let map = map_with_constant_leader(120.0);
    let added = map
        .add_tempo(
            Tempo::quarter(240.0),
            4.0,
            0,
            CurveKind::Constant,
            LockStyle::MusicTime,
        )
        .unwrap();

    assert!(map.can_solve_bbt(added.id(), BbtTime::new(3, 1, 0)));
    let (pulse, frame) = map.predict_tempo_position(added.id(), BbtTime::new(3, 1, 0));
    assert_eq!(pulse, 2.0);
    assert_eq!(frame, 192_000);

    // the probe does not mutate the map
    let sections = map.sections();
    let unmoved = sections
        .iter()
        .filter_map(|s| s.as_tempo())
        .find(|t| t.id() == added.id())
        .unwrap();
    assert_eq!(unmoved.pulse(), 4.0);
}
