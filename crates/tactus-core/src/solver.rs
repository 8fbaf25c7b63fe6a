//! Map solver
//!
//! Recomputes the unanchored coordinate of every section after a mutation.
//! A tempo section anchored to audio time keeps its frame and gets a new
//! pulse; one anchored to music time keeps its pulse and gets a new frame.
//! The ramp constant of each tempo section is defined by the next tempo
//! section, so moving or editing one section invalidates its predecessor's
//! constant and the pass recomputes the whole chain.
//!
//! Solved means ordered by frame and by pulse simultaneously, with
//! frame-accurate agreement between each tempo's anchored position and the
//! position computed from its predecessor's curve (see `check_solved`).
//!
//! The solve entry points mutate the supplied store in place and report
//! whether the result is solved. Callers that need atomicity run them on a
//! clone first (see the mutation API).

use crate::bbt::BbtTime;
use crate::query;
use crate::section::{
    active_tempo_indices, meter_indices, section_index, sort_by_frame, sort_by_pulse, LockStyle,
    MeterSection, Metrics, SectionId, TempoSection,
};
use crate::{FrameCount, FramePos};

/// Upper bound on |c| accepted by `check_solved`. A policy knob, not a
/// verified bound; maps remain computable (if chaotic) beyond it.
pub(crate) const MAX_RAMP_GRADIENT: f64 = 1000.0;

pub(crate) fn tempo_mut_by_id(metrics: &mut Metrics, id: SectionId) -> Option<&mut TempoSection> {
    metrics
        .iter_mut()
        .find_map(|s| s.as_tempo_mut().filter(|t| t.id == id))
}

/// Recompute the pulse or frame of every active tempo section from its
/// predecessor's curve, refreshing each predecessor's ramp constant on the
/// way. The final section's constant is reset to 0.
pub(crate) fn recompute_tempi(metrics: &mut Metrics, frame_rate: FrameCount) {
    let idxs = active_tempo_indices(metrics);
    let mut prev_i: Option<usize> = None;

    for &i in &idxs {
        let Some(pi) = prev_i else {
            // the leading immovable tempo pins pulse 0
            if let Some(t) = metrics[i].as_tempo_mut() {
                if !t.movable {
                    t.pulse = 0.0;
                }
            }
            prev_i = Some(i);
            continue;
        };

        let Some(cur) = metrics[i].as_tempo().cloned() else { continue };
        let Some(mut prev) = metrics[pi].as_tempo().cloned() else { continue };

        match cur.lock_style {
            LockStyle::AudioTime => {
                prev.c = prev.compute_c_frame(cur.pulses_per_minute(), cur.frame, frame_rate);
                let pulse = prev.pulse_at_tempo(cur.pulses_per_minute(), cur.frame, frame_rate);
                if let Some(p) = metrics[pi].as_tempo_mut() {
                    p.c = prev.c;
                }
                if !cur.locked_to_meter {
                    if let Some(t) = metrics[i].as_tempo_mut() {
                        t.pulse = pulse;
                    }
                }
            }
            LockStyle::MusicTime => {
                prev.c = prev.compute_c_pulse(cur.pulses_per_minute(), cur.pulse);
                let frame = prev.frame_at_tempo(cur.pulses_per_minute(), cur.pulse, frame_rate);
                if let Some(p) = metrics[pi].as_tempo_mut() {
                    p.c = prev.c;
                }
                if let Some(t) = metrics[i].as_tempo_mut() {
                    t.frame = frame;
                }
            }
        }
        prev_i = Some(i);
    }

    // the ramp constant is undefined past the last tempo section
    if let Some(&last) = idxs.last() {
        if let Some(t) = metrics[last].as_tempo_mut() {
            t.c = 0.0;
        }
    }
}

/// Recompute meter positions. A meter's bbt (bar) is its base position unit:
/// an audio-locked meter keeps its frame and gets new pulse and beat, a
/// music-locked meter keeps its bar and gets new frame, pulse and beat.
/// Reordering against the previous meter corrects the bbt to the nearest
/// bar start.
pub(crate) fn recompute_meters(metrics: &mut Metrics, frame_rate: FrameCount) {
    let midxs = meter_indices(metrics);
    let mut prev_m: Option<MeterSection> = None;

    for &mi in &midxs {
        let Some(meter) = metrics[mi].as_meter().cloned() else { continue };

        match meter.lock_style {
            LockStyle::AudioTime => {
                let locked_ti = metrics.iter().position(|s| {
                    s.as_tempo()
                        .is_some_and(|t| (t.locked_to_meter || !t.movable) && t.frame == meter.frame)
                });

                let (pulse, beat, bbt) = if let Some(pm) = &prev_m {
                    let beats =
                        (meter.bbt.bars as f64 - pm.bbt.bars as f64) * pm.divisions_per_bar();
                    if beats + pm.beat != meter.beat {
                        // reordering caused a bbt change
                        (
                            pm.pulse + beats / pm.note_divisor(),
                            beats + pm.beat,
                            BbtTime::new(
                                (beats / pm.divisions_per_bar()) as u32 + pm.bbt.bars,
                                1,
                                0,
                            ),
                        )
                    } else {
                        (pm.pulse + beats / pm.note_divisor(), meter.beat, meter.bbt)
                    }
                } else {
                    (0.0, 0.0, BbtTime::ONSET)
                };

                if let Some(ti) = locked_ti {
                    if let Some(t) = metrics[ti].as_tempo_mut() {
                        t.pulse = pulse;
                    }
                }
                if let Some(m) = metrics[mi].as_meter_mut() {
                    m.beat = beat;
                    m.bbt = bbt;
                    m.pulse = pulse;
                }
            }
            LockStyle::MusicTime => {
                let (pulse, beat, bbt) = if let Some(pm) = &prev_m {
                    let beats =
                        (meter.bbt.bars as f64 - pm.bbt.bars as f64) * pm.divisions_per_bar();
                    let (beat, bbt) = if beats + pm.beat != meter.beat {
                        // reordering caused a bbt change
                        (
                            beats + pm.beat,
                            BbtTime::new(
                                (beats / pm.divisions_per_bar()) as u32 + pm.bbt.bars,
                                1,
                                0,
                            ),
                        )
                    } else {
                        (beats + pm.beat, meter.bbt)
                    };
                    ((beats / pm.note_divisor()) + pm.pulse, beat, bbt)
                } else {
                    // shouldn't happen: the first meter is audio-locked
                    (query::pulse_at_beat(metrics, meter.beat), meter.beat, meter.bbt)
                };

                let frame = query::frame_at_pulse(metrics, pulse, frame_rate);
                if let Some(m) = metrics[mi].as_meter_mut() {
                    m.beat = beat;
                    m.bbt = bbt;
                    m.pulse = pulse;
                    m.frame = frame;
                }
            }
        }

        prev_m = metrics[mi].as_meter().cloned();
    }
}

pub(crate) fn recompute_map(metrics: &mut Metrics, frame_rate: FrameCount) {
    recompute_tempi(metrics, frame_rate);
    recompute_meters(metrics, frame_rate);
}

/// True iff the store is solved: active tempos strictly increase in both
/// frame and pulse, every tempo's anchored position agrees exactly with its
/// predecessor's curve (meter-locked tempos excepted), no ramp exceeds the
/// gradient limit, and every audio-locked meter's frame is within one sample
/// of the frame computed from the preceding section of music.
///
/// The one-sample slack absorbs the pulse discontinuity an audio-locked
/// meter introduces by pinning an exact pulse to a frame; tightening it
/// rejects otherwise-valid configurations.
pub(crate) fn check_solved(metrics: &Metrics, frame_rate: FrameCount) -> bool {
    let mut prev_t: Option<&TempoSection> = None;
    let mut prev_m: Option<&MeterSection> = None;

    for section in metrics {
        if let Some(t) = section.as_tempo() {
            if !t.active {
                continue;
            }
            if let Some(p) = prev_t {
                if t.frame <= p.frame || t.pulse <= p.pulse {
                    return false;
                }

                // precision check ensures tempo and frames align
                if t.frame != p.frame_at_tempo(t.pulses_per_minute(), t.pulse, frame_rate)
                    && !t.locked_to_meter
                {
                    return false;
                }

                if p.c.abs() > MAX_RAMP_GRADIENT {
                    return false;
                }
            }
            prev_t = Some(t);
        } else if let Some(m) = section.as_meter() {
            if prev_m.is_some() && m.lock_style == LockStyle::AudioTime {
                let t = query::tempo_section_at_frame(metrics, m.frame - 1);
                let nascent_m_frame = t.frame_at_pulse(m.pulse, frame_rate);
                if nascent_m_frame > m.frame + 1 || nascent_m_frame < 0 {
                    return false;
                }
            }
            prev_m = Some(m);
        }
    }

    true
}

/// Deactivate movable audio-locked tempos that lie before `frame` (the new
/// first-meter frame) and revive those past it. Fails when one sits exactly
/// on `frame`.
pub(crate) fn set_active_tempos(metrics: &mut Metrics, frame: FramePos) -> bool {
    for section in metrics.iter_mut() {
        let Some(t) = section.as_tempo_mut() else { continue };
        if !t.movable {
            t.active = true;
            continue;
        }
        if t.lock_style == LockStyle::AudioTime {
            if t.active && t.frame < frame {
                t.active = false;
                t.pulse = 0.0;
            } else if t.frame > frame {
                t.active = true;
            } else if t.frame == frame {
                return false;
            }
        }
    }
    true
}

/// Place tempo section `id` at `frame`, anchoring frames left to right.
pub(crate) fn solve_tempo_frame(
    metrics: &mut Metrics,
    id: SectionId,
    frame: FramePos,
    frame_rate: FrameCount,
) -> bool {
    // can't move a tempo before the first meter
    let first_m_frame = metrics
        .iter()
        .filter_map(|s| s.as_meter())
        .find(|m| !m.movable)
        .map(|m| m.frame)
        .unwrap_or(0);

    let Some(si) = section_index(metrics, id) else {
        return false;
    };
    {
        let Some(s) = metrics[si].as_tempo_mut() else {
            return false;
        };
        if s.movable && frame <= first_m_frame {
            return false;
        }
        s.active = true;
        s.frame = frame;
    }

    let idxs = active_tempo_indices(metrics);
    let mut prev_i: Option<usize> = None;
    let mut section_prev: Option<usize> = None;

    for &i in &idxs {
        if let Some(pi) = prev_i {
            if i == si {
                section_prev = Some(pi);
                if metrics[i].as_tempo().is_some_and(|t| t.locked_to_meter) {
                    prev_i = Some(i);
                }
                continue;
            }

            let Some(cur) = metrics[i].as_tempo().cloned() else { continue };
            let Some(mut prev) = metrics[pi].as_tempo().cloned() else { continue };

            match cur.lock_style {
                LockStyle::MusicTime => {
                    prev.c = prev.compute_c_pulse(cur.pulses_per_minute(), cur.pulse);
                    let f = prev.frame_at_pulse(cur.pulse, frame_rate);
                    if let Some(p) = metrics[pi].as_tempo_mut() {
                        p.c = prev.c;
                    }
                    if let Some(t) = metrics[i].as_tempo_mut() {
                        t.frame = f;
                    }
                }
                LockStyle::AudioTime => {
                    prev.c = prev.compute_c_frame(cur.pulses_per_minute(), cur.frame, frame_rate);
                    let pulse = prev.pulse_at_frame(cur.frame, frame_rate);
                    if let Some(p) = metrics[pi].as_tempo_mut() {
                        p.c = prev.c;
                    }
                    if !cur.locked_to_meter {
                        if let Some(t) = metrics[i].as_tempo_mut() {
                            t.pulse = pulse;
                        }
                    }
                }
            }
        }
        prev_i = Some(i);
    }

    if let Some(pi) = section_prev {
        if let (Some(sec), Some(prev0)) = (
            metrics[si].as_tempo().cloned(),
            metrics[pi].as_tempo().cloned(),
        ) {
            let mut prev = prev0;
            prev.c = prev.compute_c_frame(sec.pulses_per_minute(), frame, frame_rate);
            let pulse = prev.pulse_at_frame(frame, frame_rate);
            if let Some(p) = metrics[pi].as_tempo_mut() {
                p.c = prev.c;
            }
            if !sec.locked_to_meter {
                if let Some(t) = metrics[si].as_tempo_mut() {
                    t.pulse = pulse;
                }
            }
        }
    }

    sort_by_frame(metrics);
    recompute_tempi(metrics, frame_rate);
    check_solved(metrics, frame_rate)
}

/// Place tempo section `id` at `pulse`, anchoring pulses left to right.
///
/// Reordering of music-locked ramps against each other can send a
/// cross-dragged solution far away; the `check_solved` gate is what rejects
/// those.
pub(crate) fn solve_tempo_pulse(
    metrics: &mut Metrics,
    id: SectionId,
    pulse: f64,
    frame_rate: FrameCount,
) -> bool {
    let Some(si) = section_index(metrics, id) else {
        return false;
    };
    {
        let Some(s) = metrics[si].as_tempo_mut() else {
            return false;
        };
        s.pulse = pulse;
    }

    let idxs = active_tempo_indices(metrics);
    let mut prev_i: Option<usize> = None;
    let mut section_prev: Option<usize> = None;

    for &i in &idxs {
        if metrics[i].as_tempo().is_some_and(|t| !t.movable) {
            if let Some(t) = metrics[i].as_tempo_mut() {
                t.pulse = 0.0;
            }
            prev_i = Some(i);
            continue;
        }

        if let Some(pi) = prev_i {
            if i == si {
                section_prev = Some(pi);
                continue;
            }

            let Some(cur) = metrics[i].as_tempo().cloned() else { continue };
            let Some(mut prev) = metrics[pi].as_tempo().cloned() else { continue };

            match cur.lock_style {
                LockStyle::MusicTime => {
                    prev.c = prev.compute_c_pulse(cur.pulses_per_minute(), cur.pulse);
                    let f = prev.frame_at_pulse(cur.pulse, frame_rate);
                    if let Some(p) = metrics[pi].as_tempo_mut() {
                        p.c = prev.c;
                    }
                    if let Some(t) = metrics[i].as_tempo_mut() {
                        t.frame = f;
                    }
                }
                LockStyle::AudioTime => {
                    prev.c = prev.compute_c_frame(cur.pulses_per_minute(), cur.frame, frame_rate);
                    let p_new = prev.pulse_at_frame(cur.frame, frame_rate);
                    if let Some(p) = metrics[pi].as_tempo_mut() {
                        p.c = prev.c;
                    }
                    if !cur.locked_to_meter {
                        if let Some(t) = metrics[i].as_tempo_mut() {
                            t.pulse = p_new;
                        }
                    }
                }
            }
        }
        prev_i = Some(i);
    }

    if let Some(pi) = section_prev {
        if let (Some(sec), Some(prev0)) = (
            metrics[si].as_tempo().cloned(),
            metrics[pi].as_tempo().cloned(),
        ) {
            let mut prev = prev0;
            prev.c = prev.compute_c_pulse(sec.pulses_per_minute(), pulse);
            let f = prev.frame_at_pulse(pulse, frame_rate);
            if let Some(p) = metrics[pi].as_tempo_mut() {
                p.c = prev.c;
            }
            if let Some(t) = metrics[si].as_tempo_mut() {
                t.frame = f;
            }
        }
    }

    sort_by_pulse(metrics);
    recompute_tempi(metrics, frame_rate);
    check_solved(metrics, frame_rate)
}

/// Place meter section `id` at `frame`. An audio-locked meter carries a
/// co-located meter-locked tempo; the two move in lockstep, verified on an
/// internal trial clone before the live store is touched.
pub(crate) fn solve_meter_frame(
    metrics: &mut Metrics,
    id: SectionId,
    frame: FramePos,
    frame_rate: FrameCount,
) -> bool {
    let Some(si) = section_index(metrics, id) else {
        return false;
    };
    let Some(section) = metrics[si].as_meter().cloned() else {
        return false;
    };

    // disallow moving the first meter past any subsequent one, and any
    // movable meter before the first one
    {
        let other = query::meter_section_at_frame(metrics, frame);
        if (!section.movable && other.movable)
            || (!other.movable && section.movable && other.frame >= frame)
        {
            return false;
        }
    }

    if !section.movable {
        // the first tempo follows the first meter
        if !set_active_tempos(metrics, frame) {
            return false;
        }
    }

    let Some(mlt_id) = metrics.iter().find_map(|s| {
        s.as_tempo()
            .filter(|t| (t.locked_to_meter || !t.movable) && t.frame == section.frame)
            .map(|t| t.id)
    }) else {
        return false;
    };

    let mut future: Metrics = metrics.clone();

    let mut prev_m: Option<MeterSection> = None;
    for &mi in &meter_indices(metrics) {
        let Some(m) = metrics[mi].as_meter().cloned() else { continue };
        if m.id != id {
            prev_m = Some(m);
            continue;
        }

        if let (Some(pm), true) = (prev_m.as_ref(), section.movable) {
            let beats =
                (query::pulse_at_frame(metrics, frame, frame_rate) - pm.pulse) * pm.note_divisor();
            if beats + pm.beat < section.beat {
                // an earlier time than this section's musical position has
                // been requested: use the frame/pulse of that position
                let new_pulse = ((section.beat - pm.beat) / pm.note_divisor()) + pm.pulse;
                let smallest_frame = query::frame_at_pulse(&future, new_pulse, frame_rate);

                if !solve_tempo_frame(&mut future, mlt_id, smallest_frame, frame_rate) {
                    return false;
                }
                if let Some(t) = tempo_mut_by_id(metrics, mlt_id) {
                    t.pulse = new_pulse;
                }
                solve_tempo_frame(metrics, mlt_id, smallest_frame, frame_rate);
                if let Some(si) = section_index(metrics, id) {
                    if let Some(ms) = metrics[si].as_meter_mut() {
                        ms.frame = smallest_frame;
                        ms.pulse = new_pulse;
                    }
                }
            } else {
                // requested frame is usable: move our twin in the trial map
                // first, then mirror the move in the live store
                if let Some(fi) = section_index(&future, id) {
                    future[fi].set_frame(frame);
                }

                if !solve_tempo_frame(&mut future, mlt_id, frame, frame_rate) {
                    return false;
                }
                if let Some(si) = section_index(metrics, id) {
                    if let Some(ms) = metrics[si].as_meter_mut() {
                        ms.frame = frame;
                    }
                }
                let new_pulse = ((section.beat - pm.beat) / pm.note_divisor()) + pm.pulse;
                if let Some(t) = tempo_mut_by_id(metrics, mlt_id) {
                    t.pulse = new_pulse;
                }
                solve_tempo_frame(metrics, mlt_id, frame, frame_rate);
            }
        } else {
            // first meter: it drags its pinned tempo with it
            if let Some(ti) = section_index(&future, mlt_id) {
                if let Some(t) = future[ti].as_tempo_mut() {
                    t.frame = frame;
                    t.pulse = 0.0;
                }
            }

            if !solve_tempo_frame(&mut future, mlt_id, frame, frame_rate) {
                return false;
            }
            if let Some(si) = section_index(metrics, id) {
                if let Some(ms) = metrics[si].as_meter_mut() {
                    ms.frame = frame;
                }
            }
            if let Some(t) = tempo_mut_by_id(metrics, mlt_id) {
                t.frame = frame;
                t.pulse = 0.0;
            }
            solve_tempo_frame(metrics, mlt_id, frame, frame_rate);

            if let Some(si) = section_index(metrics, id) {
                if let Some(ms) = metrics[si].as_meter_mut() {
                    ms.beat = 0.0;
                    ms.bbt = BbtTime::ONSET;
                    ms.pulse = 0.0;
                }
            }
        }
        break;
    }

    sort_by_frame(metrics);
    recompute_meters(metrics, frame_rate);
    true
}

/// Place meter section `id` on the first beat of bar `when.bars`. Meter
/// starts always sit on beat 1, tick 0; the stored bbt is normalized to the
/// bar start.
pub(crate) fn solve_meter_bbt(
    metrics: &mut Metrics,
    id: SectionId,
    when: BbtTime,
    frame_rate: FrameCount,
) -> bool {
    let when = BbtTime::new(when.bars, 1, 0);

    // a bar holds at most one meter
    if metrics
        .iter()
        .any(|s| s.as_meter().is_some_and(|m| m.id != id && m.bbt.bars == when.bars))
    {
        return false;
    }

    let mut prev_m: Option<MeterSection> = None;
    let mut section_prev: Option<SectionId> = None;

    for &mi in &meter_indices(metrics) {
        let Some(m) = metrics[mi].as_meter().cloned() else { continue };

        if let Some(pm) = prev_m.clone() {
            if m.bbt.bars > when.bars && section_prev.is_none() {
                // insertion point found: place the section after pm
                section_prev = Some(pm.id);
                let beats = (when.bars as f64 - pm.bbt.bars as f64) * pm.divisions_per_bar();
                let pulse = (beats / pm.note_divisor()) + pm.pulse;
                let frame = query::frame_at_pulse(metrics, pulse, frame_rate);
                if let Some(si) = section_index(metrics, id) {
                    if let Some(ms) = metrics[si].as_meter_mut() {
                        ms.beat = beats + pm.beat;
                        ms.bbt = when;
                        ms.pulse = pulse;
                        ms.frame = frame;
                        prev_m = Some(ms.clone());
                    }
                }
                continue;
            }
        }

        match m.lock_style {
            LockStyle::AudioTime => {
                let locked_ti = metrics.iter().position(|s| {
                    s.as_tempo()
                        .is_some_and(|t| (t.locked_to_meter || !t.movable) && t.frame == m.frame)
                });
                let Some(ti) = locked_ti else {
                    return false;
                };

                let (new_pulse, beat, bbt) = if let Some(pm) = &prev_m {
                    let beats = (m.bbt.bars as f64 - pm.bbt.bars as f64) * pm.divisions_per_bar();
                    if beats + pm.beat != m.beat {
                        // tempo/meter change moved the bar
                        (
                            pm.pulse + beats / pm.note_divisor(),
                            beats + pm.beat,
                            BbtTime::new(
                                (beats / pm.divisions_per_bar()) as u32 + pm.bbt.bars,
                                1,
                                0,
                            ),
                        )
                    } else {
                        (pm.pulse + beats / pm.note_divisor(), m.beat, m.bbt)
                    }
                } else {
                    (0.0, 0.0, BbtTime::ONSET)
                };

                if let Some(t) = metrics[ti].as_tempo_mut() {
                    t.pulse = new_pulse;
                }
                if let Some(ms) = metrics[mi].as_meter_mut() {
                    ms.beat = beat;
                    ms.bbt = bbt;
                    ms.pulse = new_pulse;
                }
            }
            LockStyle::MusicTime => {
                let Some(pm) = prev_m.clone() else {
                    // the first meter is audio-locked
                    prev_m = Some(m);
                    continue;
                };
                let beats = (m.bbt.bars as f64 - pm.bbt.bars as f64) * pm.divisions_per_bar();
                let (beat, bbt) = if beats + pm.beat != m.beat {
                    (
                        beats + pm.beat,
                        BbtTime::new((beats / pm.divisions_per_bar()) as u32 + pm.bbt.bars, 1, 0),
                    )
                } else {
                    (beats + pm.beat, m.bbt)
                };
                let new_pulse = (beats / pm.note_divisor()) + pm.pulse;
                let frame = query::frame_at_pulse(metrics, new_pulse, frame_rate);
                if let Some(ms) = metrics[mi].as_meter_mut() {
                    ms.beat = beat;
                    ms.bbt = bbt;
                    ms.pulse = new_pulse;
                    ms.frame = frame;
                }
            }
        }

        prev_m = metrics[mi].as_meter().cloned();
    }

    if section_prev.is_none() {
        // past the last meter
        if let Some(pm) = prev_m {
            let beats = (when.bars as f64 - pm.bbt.bars as f64) * pm.divisions_per_bar();
            let pulse = (beats / pm.note_divisor()) + pm.pulse;
            let frame = query::frame_at_pulse(metrics, pulse, frame_rate);
            if let Some(si) = section_index(metrics, id) {
                if let Some(ms) = metrics[si].as_meter_mut() {
                    ms.beat = beats + pm.beat;
                    ms.bbt = when;
                    ms.pulse = pulse;
                    ms.frame = frame;
                }
            }
        }
    }

    sort_by_pulse(metrics);
    recompute_meters(metrics, frame_rate);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::TempoMap;

    const FR: FrameCount = 48_000;

    #[test]
    fn test_default_map_is_solved() {
        let map = TempoMap::new(FR);
        let metrics = map.sections();
        assert!(check_solved(&metrics, FR));
    }

    #[test]
    fn test_set_active_tempos_deactivates_early_audio_tempos() {
        let map = TempoMap::new(FR);
        let mut metrics = map.sections();

        let mut t = TempoSection::new(
            0.5,
            24_000,
            crate::tempo::Tempo::quarter(140.0),
            crate::section::CurveKind::Constant,
            LockStyle::AudioTime,
        );
        t.active = true;
        metrics.push(crate::section::MetricSection::Tempo(t));
        sort_by_frame(&mut metrics);

        // first meter moves past the tempo: tempo deactivates
        assert!(set_active_tempos(&mut metrics, 48_000));
        let disabled = metrics
            .iter()
            .filter_map(|s| s.as_tempo())
            .find(|t| t.movable)
            .unwrap();
        assert!(!disabled.active);
        assert_eq!(disabled.pulse, 0.0);

        // exactly on the tempo's frame: refused
        assert!(!set_active_tempos(&mut metrics, 24_000));
    }

    #[test]
    fn test_gradient_limit_rejects_extreme_ramps() {
        let map = TempoMap::new(FR);
        let mut metrics = map.sections();
        // 120 -> 18120 quarters/min over one pulse: c = 4500, far over the
        // limit, while frames and pulses stay consistent and monotonic
        let t2 = TempoSection::new(
            1.0,
            0,
            crate::tempo::Tempo::quarter(18_120.0),
            crate::section::CurveKind::Ramp,
            LockStyle::MusicTime,
        );
        metrics.push(crate::section::MetricSection::Tempo(t2));
        recompute_tempi(&mut metrics, FR);
        assert!(!check_solved(&metrics, FR));
    }
}
