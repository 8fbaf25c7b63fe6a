//! Mutation API
//!
//! Every operation takes the map lock exclusively, runs the solver against a
//! clone of the section store, and commits only a solved result; an
//! infeasible request leaves the live map untouched and returns an error.
//! One [`MapChanged`](crate::MapChanged) notification fires per committed
//! mutation, after the lock is released.

use crate::bbt::{BbtTime, TICKS_PER_BEAT};
use crate::error::{MapError, MapResult};
use crate::map::TempoMap;
use crate::query;
use crate::section::{
    section_index, CurveKind, LockStyle, MeterSection, MetricSection, Metrics, SectionId,
    TempoSection,
};
use crate::solver::{self, tempo_mut_by_id};
use crate::tempo::{Meter, Tempo};
use crate::{FrameCount, FramePos};

/// Insert a section at its ordered position. An existing section of the
/// same kind at the same anchor position is replaced; the immovable leading
/// sections are never replaced, only their payload is overwritten. Returns
/// the id now standing at the insertion.
fn insert_section(metrics: &mut Metrics, section: MetricSection) -> SectionId {
    if let MetricSection::Meter(m) = &section {
        if !m.bbt().is_bar_start() {
            let corrected = BbtTime::new(m.bbt().bars, 1, 0);
            log::warn!(
                "meter changes can only be positioned on the first beat of a bar; moving from {} to {}",
                m.bbt(),
                corrected
            );
        }
    }

    let mut need_add = true;
    let mut id = section.id();
    let mut remove_idx = None;

    for (i, existing) in metrics.iter_mut().enumerate() {
        match (existing, &section) {
            (MetricSection::Tempo(t), MetricSection::Tempo(ins)) => {
                let ipm = ins.lock_style == LockStyle::MusicTime;
                if (ipm && t.pulse == ins.pulse) || (!ipm && t.frame == ins.frame) {
                    if !t.movable {
                        // can't (re)move this section: overwrite its data
                        // content, not its identity as a section
                        t.tempo = ins.tempo;
                        t.kind = ins.kind;
                        t.lock_style = LockStyle::AudioTime;
                        id = t.id;
                        need_add = false;
                    } else {
                        remove_idx = Some(i);
                    }
                    break;
                }
            }
            (MetricSection::Meter(m), MetricSection::Meter(ins)) => {
                let ipm = ins.lock_style == LockStyle::MusicTime;
                if (ipm && m.beat == ins.beat) || (!ipm && m.frame == ins.frame) {
                    if !m.movable {
                        m.meter = ins.meter;
                        m.lock_style = LockStyle::AudioTime;
                        id = m.id;
                        need_add = false;
                    } else {
                        remove_idx = Some(i);
                    }
                    break;
                }
            }
            _ => {}
        }
    }

    if let Some(i) = remove_idx {
        metrics.remove(i);
    }

    if need_add {
        let pos = match &section {
            MetricSection::Tempo(ins) => {
                let ipm = ins.lock_style == LockStyle::MusicTime;
                metrics.iter().position(|s| {
                    s.as_tempo().is_some_and(|t| {
                        (ipm && t.pulse > ins.pulse) || (!ipm && t.frame > ins.frame)
                    })
                })
            }
            MetricSection::Meter(ins) => {
                let ipm = ins.lock_style == LockStyle::MusicTime;
                metrics.iter().position(|s| {
                    s.as_meter().is_some_and(|m| {
                        (ipm && m.beat > ins.beat) || (!ipm && m.frame > ins.frame)
                    })
                })
            }
        };
        match pos {
            Some(i) => metrics.insert(i, section),
            None => metrics.push(section),
        }
    }

    id
}

fn add_tempo_inner(
    metrics: &mut Metrics,
    tempo: Tempo,
    pulse: f64,
    frame: FramePos,
    kind: CurveKind,
    lock_style: LockStyle,
    locked_to_meter: bool,
    frame_rate: FrameCount,
) -> MapResult<SectionId> {
    if lock_style == LockStyle::AudioTime {
        // a movable tempo cannot sit at or before the leading meter
        let first_m_frame = metrics
            .iter()
            .filter_map(|s| s.as_meter())
            .find(|m| !m.movable())
            .map(|m| m.frame())
            .unwrap_or(0);
        if frame <= first_m_frame {
            return Err(MapError::BeforeFirstMeter);
        }
    }

    let mut t = TempoSection::new(pulse, frame, tempo, kind, lock_style);
    t.locked_to_meter = locked_to_meter;
    let id = insert_section(metrics, MetricSection::Tempo(t));

    let solved = match lock_style {
        LockStyle::AudioTime => solver::solve_tempo_frame(metrics, id, frame, frame_rate),
        LockStyle::MusicTime => solver::solve_tempo_pulse(metrics, id, pulse, frame_rate),
    };
    if !solved {
        return Err(MapError::Unsolvable);
    }
    solver::recompute_meters(metrics, frame_rate);
    Ok(id)
}

fn add_meter_inner(
    metrics: &mut Metrics,
    meter: Meter,
    beat: f64,
    bbt: BbtTime,
    frame: FramePos,
    lock_style: LockStyle,
    frame_rate: FrameCount,
) -> MapResult<SectionId> {
    let prev_m = query::meter_section_at_frame(metrics, frame - 1).clone();
    let pulse = ((bbt.bars as f64 - prev_m.bbt().bars as f64)
        * (prev_m.divisions_per_bar() / prev_m.note_divisor()))
        + prev_m.pulse();

    if lock_style == LockStyle::AudioTime {
        // an audio-locked meter needs a co-located tempo to anchor the
        // pulse discontinuity it introduces
        let tempo_here = query::tempo_at_frame(metrics, frame, frame_rate);
        add_tempo_inner(
            metrics,
            tempo_here,
            pulse,
            frame,
            CurveKind::Ramp,
            LockStyle::AudioTime,
            true,
            frame_rate,
        )?;
    }

    let m = MeterSection::new(pulse, frame, beat, bbt, meter, lock_style);
    let id = insert_section(metrics, MetricSection::Meter(m));

    let solved = match lock_style {
        LockStyle::AudioTime => solver::solve_meter_frame(metrics, id, frame, frame_rate),
        LockStyle::MusicTime => {
            let ok = solver::solve_meter_bbt(metrics, id, bbt, frame_rate);
            // the meter-locked tempi repositioned above need their pulses
            // refreshed against the final meter layout
            solver::recompute_map(metrics, frame_rate);
            ok
        }
    };
    if !solved {
        return Err(MapError::Unsolvable);
    }
    Ok(id)
}

fn remove_meter_inner(metrics: &mut Metrics, id: SectionId) -> MapResult<()> {
    let Some(i) = section_index(metrics, id) else {
        return Err(MapError::UnknownSection);
    };
    let Some(m) = metrics[i].as_meter() else {
        return Err(MapError::UnknownSection);
    };
    if !m.movable() {
        return Err(MapError::Immovable);
    }
    let frame = m.frame();

    if metrics[i].lock_style() == LockStyle::AudioTime {
        // remove the meter-locked tempo first
        if let Some(j) = metrics.iter().position(|s| {
            s.as_tempo()
                .is_some_and(|t| t.locked_to_meter() && t.frame() == frame)
        }) {
            metrics.remove(j);
        }
    }

    let Some(i) = section_index(metrics, id) else {
        return Err(MapError::UnknownSection);
    };
    metrics.remove(i);
    Ok(())
}

impl TempoMap {
    /// Add a tempo section. `pulse` anchors a music-locked section, `frame`
    /// an audio-locked one; the solver derives the other coordinate.
    pub fn add_tempo(
        &self,
        tempo: Tempo,
        pulse: f64,
        frame: FramePos,
        kind: CurveKind,
        lock_style: LockStyle,
    ) -> MapResult<TempoSection> {
        let result = {
            let mut metrics = self.metrics.write();
            let mut future = metrics.clone();
            let id = add_tempo_inner(
                &mut future,
                tempo,
                pulse,
                frame,
                kind,
                lock_style,
                false,
                self.frame_rate,
            )?;
            *metrics = future;
            section_index(&metrics, id)
                .and_then(|i| metrics[i].as_tempo().cloned())
                .ok_or(MapError::UnknownSection)
        };
        if result.is_ok() {
            self.notify();
        }
        result
    }

    /// Add a meter section starting on the first beat of `bbt.bars`. An
    /// audio-locked meter automatically gets a co-located meter-locked
    /// tempo.
    pub fn add_meter(
        &self,
        meter: Meter,
        beat: f64,
        bbt: BbtTime,
        frame: FramePos,
        lock_style: LockStyle,
    ) -> MapResult<MeterSection> {
        let result = {
            let mut metrics = self.metrics.write();
            let mut future = metrics.clone();
            let id = add_meter_inner(
                &mut future,
                meter,
                beat,
                bbt,
                frame,
                lock_style,
                self.frame_rate,
            )?;
            *metrics = future;
            section_index(&metrics, id)
                .and_then(|i| metrics[i].as_meter().cloned())
                .ok_or(MapError::UnknownSection)
        };
        if result.is_ok() {
            self.notify();
        }
        result
    }

    /// Remove a movable tempo section. An orphaned meter-locked twin at the
    /// same frame (one no meter needs any more) goes with it.
    pub fn remove_tempo(&self, id: SectionId) -> MapResult<()> {
        {
            let mut metrics = self.metrics.write();
            let Some(i) = section_index(&metrics, id) else {
                return Err(MapError::UnknownSection);
            };
            let Some(t) = metrics[i].as_tempo() else {
                return Err(MapError::UnknownSection);
            };
            if !t.movable() {
                return Err(MapError::Immovable);
            }
            let frame = t.frame();
            metrics.remove(i);

            if !metrics
                .iter()
                .any(|s| s.as_meter().is_some_and(|m| m.frame() == frame))
            {
                if let Some(j) = metrics.iter().position(|s| {
                    s.as_tempo()
                        .is_some_and(|t| t.locked_to_meter() && t.frame() == frame)
                }) {
                    metrics.remove(j);
                }
            }

            solver::recompute_map(&mut metrics, self.frame_rate);
        }
        self.notify();
        Ok(())
    }

    /// Remove a movable meter section together with its meter-locked tempo.
    /// The leading meter cannot be removed.
    pub fn remove_meter(&self, id: SectionId) -> MapResult<()> {
        {
            let mut metrics = self.metrics.write();
            remove_meter_inner(&mut metrics, id)?;
            solver::recompute_map(&mut metrics, self.frame_rate);
        }
        self.notify();
        Ok(())
    }

    /// Atomically swap a tempo section for a new one. Replacing the leading
    /// tempo mutates it in place; it cannot move.
    pub fn replace_tempo(
        &self,
        old: SectionId,
        tempo: Tempo,
        pulse: f64,
        frame: FramePos,
        kind: CurveKind,
        lock_style: LockStyle,
    ) -> MapResult<TempoSection> {
        let result = {
            let mut metrics = self.metrics.write();
            let Some(i) = section_index(&metrics, old) else {
                return Err(MapError::UnknownSection);
            };
            let Some(ts) = metrics[i].as_tempo().cloned() else {
                return Err(MapError::UnknownSection);
            };

            let first_frame = metrics
                .iter()
                .filter_map(|s| s.as_tempo())
                .find(|t| t.active() && !t.movable())
                .map(|t| t.frame())
                .unwrap_or(0);

            let mut future = metrics.clone();

            let id = if ts.frame() != first_frame {
                let locked_to_meter = ts.locked_to_meter();
                if let Some(fi) = section_index(&future, old) {
                    if future[fi].movable() {
                        future.remove(fi);
                    }
                }
                add_tempo_inner(
                    &mut future,
                    tempo,
                    pulse,
                    frame,
                    kind,
                    lock_style,
                    locked_to_meter,
                    self.frame_rate,
                )?
            } else {
                // cannot move the first tempo section; it stays pinned at
                // the frame 0 / pulse 0 origin
                let Some(t) = tempo_mut_by_id(&mut future, ts.id()) else {
                    return Err(MapError::UnknownSection);
                };
                t.kind = kind;
                t.pulse = 0.0;
                t.frame = 0;
                t.lock_style = LockStyle::AudioTime;
                t.tempo = tempo;
                let id = t.id;
                solver::recompute_map(&mut future, self.frame_rate);
                id
            };

            *metrics = future;
            section_index(&metrics, id)
                .and_then(|i| metrics[i].as_tempo().cloned())
                .ok_or(MapError::UnknownSection)
        };
        if result.is_ok() {
            self.notify();
        }
        result
    }

    /// Atomically swap a meter section. Swapping the leading meter keeps
    /// the frame 0 / pulse 0 origin and re-anchors the leading tempo there.
    pub fn replace_meter(
        &self,
        old: SectionId,
        meter: Meter,
        bbt: BbtTime,
        frame: FramePos,
        lock_style: LockStyle,
    ) -> MapResult<MeterSection> {
        let result = {
            let mut metrics = self.metrics.write();
            let beat = query::beat_at_bbt(&metrics, bbt);
            let Some(i) = section_index(&metrics, old) else {
                return Err(MapError::UnknownSection);
            };
            let Some(ms) = metrics[i].as_meter().cloned() else {
                return Err(MapError::UnknownSection);
            };

            let mut future = metrics.clone();

            let id = if ms.movable() {
                remove_meter_inner(&mut future, old)?;
                add_meter_inner(
                    &mut future,
                    meter,
                    beat,
                    bbt,
                    frame,
                    lock_style,
                    self.frame_rate,
                )?
            } else {
                let id = ms.id();
                if let Some(fi) = section_index(&future, id) {
                    if let Some(m) = future[fi].as_meter_mut() {
                        m.meter = meter;
                        m.lock_style = LockStyle::AudioTime;
                        m.pulse = 0.0;
                        m.frame = 0;
                        m.beat = 0.0;
                        m.bbt = BbtTime::ONSET;
                    }
                }
                // the leading tempo follows the leading meter
                if let Some(ti) = future.iter().position(|s| {
                    s.as_tempo().is_some_and(|t| t.active() && !t.movable())
                }) {
                    if let Some(t) = future[ti].as_tempo_mut() {
                        t.frame = 0;
                        t.pulse = 0.0;
                        t.lock_style = LockStyle::AudioTime;
                    }
                }
                solver::recompute_map(&mut future, self.frame_rate);
                id
            };

            *metrics = future;
            section_index(&metrics, id)
                .and_then(|i| metrics[i].as_meter().cloned())
                .ok_or(MapError::UnknownSection)
        };
        if result.is_ok() {
            self.notify();
        }
        result
    }

    /// Change the leading tempo's value in place.
    pub fn change_initial_tempo(&self, beats_per_minute: f64, note_type: f64) -> MapResult<()> {
        {
            let mut metrics = self.metrics.write();
            let Some(i) = metrics
                .iter()
                .position(|s| s.as_tempo().is_some_and(|t| t.active()))
            else {
                return Err(MapError::UnknownSection);
            };
            if let Some(t) = metrics[i].as_tempo_mut() {
                t.tempo = Tempo::new(beats_per_minute, note_type);
            }
            solver::recompute_map(&mut metrics, self.frame_rate);
        }
        self.notify();
        Ok(())
    }

    /// Change the value of the tempo section enclosing `frame` (the leading
    /// tempo when `frame` precedes all of them).
    pub fn change_existing_tempo_at(
        &self,
        frame: FramePos,
        beats_per_minute: f64,
        note_type: f64,
    ) -> MapResult<()> {
        {
            let mut metrics = self.metrics.write();

            let mut first: Option<SectionId> = None;
            let mut prev: Option<SectionId> = None;
            for section in metrics.iter() {
                if section.frame() > frame {
                    break;
                }
                let Some(t) = section.as_tempo() else { continue };
                if !t.active() {
                    continue;
                }
                if first.is_none() {
                    first = Some(t.id());
                }
                prev = Some(t.id());
            }

            let Some(target) = prev.or(first) else {
                return Err(MapError::UnknownSection);
            };
            if let Some(t) = tempo_mut_by_id(&mut metrics, target) {
                t.tempo = Tempo::new(beats_per_minute, note_type);
            }
            solver::recompute_map(&mut metrics, self.frame_rate);
        }
        self.notify();
        Ok(())
    }

    /// Drag a tempo section to `frame`. With `sub_num != 0` the landing
    /// position snaps to the nearest beat subdivision of a grid derived
    /// from a trial map that already has the section at `frame`; snapping
    /// to the live grid would shift the grid under the pointer and jitter.
    pub fn gui_move_tempo(&self, id: SectionId, frame: FramePos, sub_num: i32) -> MapResult<()> {
        let moved = {
            let mut metrics = self.metrics.write();
            let fr = self.frame_rate;
            let Some(i) = section_index(&metrics, id) else {
                return Err(MapError::UnknownSection);
            };
            let Some(ts) = metrics[i].as_tempo().cloned() else {
                return Err(MapError::UnknownSection);
            };
            if !ts.movable() {
                return Err(MapError::Immovable);
            }
            let mut future = metrics.clone();

            if ts.lock_style() == LockStyle::MusicTime {
                // set the pulse exactly instead of via the supplied frame
                if let Some(t) = tempo_mut_by_id(&mut future, id) {
                    t.lock_style = LockStyle::AudioTime;
                }
                let mut ok = false;
                if solver::solve_tempo_frame(&mut future, id, frame, fr) {
                    let beat = query::exact_beat_at_frame(&future, frame, sub_num, fr);
                    let pulse = query::pulse_at_beat(&future, beat);
                    if solver::solve_tempo_pulse(&mut future, id, pulse, fr) {
                        solver::solve_tempo_pulse(&mut metrics, id, pulse, fr);
                        solver::recompute_meters(&mut metrics, fr);
                        ok = true;
                    }
                }
                ok
            } else {
                let mut ok = false;
                if solver::solve_tempo_frame(&mut future, id, frame, fr) {
                    if sub_num != 0 {
                        let beat = query::exact_beat_at_frame(&future, frame, sub_num, fr);
                        let pulse = query::pulse_at_beat(&future, beat);
                        if solver::solve_tempo_pulse(&mut future, id, pulse, fr) {
                            // snapping to a grid: force a musical lock for
                            // the final placement
                            if let Some(t) = tempo_mut_by_id(&mut metrics, id) {
                                t.lock_style = LockStyle::MusicTime;
                            }
                            solver::solve_tempo_pulse(&mut metrics, id, pulse, fr);
                            if let Some(t) = tempo_mut_by_id(&mut metrics, id) {
                                t.lock_style = LockStyle::AudioTime;
                            }
                            solver::recompute_meters(&mut metrics, fr);
                            ok = true;
                        }
                    } else {
                        solver::solve_tempo_frame(&mut metrics, id, frame, fr);
                        solver::recompute_meters(&mut metrics, fr);
                        ok = true;
                    }
                }
                ok
            }
        };
        if moved {
            self.notify();
            Ok(())
        } else {
            Err(MapError::Unsolvable)
        }
    }

    /// Drag a meter section to `frame`.
    pub fn gui_move_meter(&self, id: SectionId, frame: FramePos) -> MapResult<()> {
        let moved = {
            let mut metrics = self.metrics.write();
            let fr = self.frame_rate;
            let Some(i) = section_index(&metrics, id) else {
                return Err(MapError::UnknownSection);
            };
            let Some(ms) = metrics[i].as_meter().cloned() else {
                return Err(MapError::UnknownSection);
            };
            if !ms.movable() {
                return Err(MapError::Immovable);
            }
            let mut future = metrics.clone();

            if ms.lock_style() == LockStyle::AudioTime {
                if solver::solve_meter_frame(&mut future, id, frame, fr) {
                    solver::solve_meter_frame(&mut metrics, id, frame, fr);
                    solver::recompute_tempi(&mut metrics, fr);
                    true
                } else {
                    false
                }
            } else {
                let beat = query::beat_at_frame(&metrics, frame, fr);
                let bbt = query::bbt_at_beat(&metrics, beat);
                if solver::solve_meter_bbt(&mut future, id, bbt, fr) {
                    solver::solve_meter_bbt(&mut metrics, id, bbt, fr);
                    solver::recompute_tempi(&mut metrics, fr);
                    true
                } else {
                    false
                }
            }
        };
        if moved {
            self.notify();
            Ok(())
        } else {
            Err(MapError::Unsolvable)
        }
    }

    /// Change a tempo section's BPM without moving it.
    pub fn gui_change_tempo(&self, id: SectionId, tempo: Tempo) -> MapResult<()> {
        let changed = {
            let mut metrics = self.metrics.write();
            let mut future = metrics.clone();

            let Some(t) = tempo_mut_by_id(&mut future, id) else {
                return Err(MapError::UnknownSection);
            };
            t.tempo = Tempo::new(tempo.beats_per_minute(), t.note_type());
            solver::recompute_tempi(&mut future, self.frame_rate);

            if solver::check_solved(&future, self.frame_rate) {
                if let Some(t) = tempo_mut_by_id(&mut metrics, id) {
                    t.tempo = Tempo::new(tempo.beats_per_minute(), t.note_type());
                }
                solver::recompute_map(&mut metrics, self.frame_rate);
                true
            } else {
                false
            }
        };
        if changed {
            self.notify();
            Ok(())
        } else {
            Err(MapError::Unsolvable)
        }
    }

    /// Stretch the predecessor ramp of tempo section `id` so that
    /// `end_frame` falls on `pulse` after the drag from `frame`. The new
    /// BPM is clamped to at most 1000 and rejected below 0.5 (it can go
    /// negative, which is an entirely different thing to being too low).
    pub fn gui_dilate_tempo(
        &self,
        id: SectionId,
        frame: FramePos,
        end_frame: FramePos,
        pulse: f64,
    ) -> MapResult<()> {
        const MIN_DFRAME: FramePos = 2;

        let dilated = {
            let mut metrics = self.metrics.write();
            let fr = self.frame_rate;
            let mut future = metrics.clone();

            let Some(pi) = section_index(&future, id) else {
                return Err(MapError::UnknownSection);
            };
            let Some(prev_t) = future[pi].as_tempo().cloned() else {
                return Err(MapError::UnknownSection);
            };

            let fr_off: FramePos = end_frame - frame;

            let prev_to_prev: Option<TempoSection> = if prev_t.pulse() > 0.0 {
                Some(query::tempo_section_at_frame(&future, prev_t.frame() - 1).clone())
            } else {
                None
            };

            let next_t: Option<TempoSection> = future
                .iter()
                .filter_map(|s| s.as_tempo())
                .find(|t| t.frame() > prev_t.frame())
                .cloned();

            // the change in frames is the result of changing the slope of
            // at most two previous tempo sections
            let contribution = match (&next_t, &prev_to_prev) {
                (Some(n), Some(pp)) if pp.kind() == CurveKind::Ramp => {
                    (prev_t.frame() - pp.frame()) as f64 / (n.frame() - pp.frame()) as f64
                }
                _ => 0.0,
            };
            let prev_t_frame_contribution: FramePos =
                (fr_off as f64 - contribution * fr_off as f64) as FramePos;

            let start_pulse = prev_t.pulse_at_frame(frame, fr);
            let end_pulse = prev_t.pulse_at_frame(end_frame, fr);

            let ramped_pp = prev_to_prev
                .as_ref()
                .filter(|pp| pp.kind() == CurveKind::Ramp);

            let mut new_bpm = if prev_t.kind() == CurveKind::Constant || prev_t.c() == 0.0 {
                match (prev_t.lock_style(), ramped_pp) {
                    (LockStyle::MusicTime, Some(pp)) => {
                        if frame > pp.frame() + MIN_DFRAME
                            && frame + prev_t_frame_contribution > pp.frame() + MIN_DFRAME
                        {
                            prev_t.beats_per_minute()
                                * ((frame - pp.frame()) as f64
                                    / ((frame + prev_t_frame_contribution) - pp.frame()) as f64)
                        } else {
                            prev_t.beats_per_minute()
                        }
                    }
                    (LockStyle::MusicTime, None) => {
                        if start_pulse > prev_t.pulse() && end_pulse > prev_t.pulse() {
                            prev_t.beats_per_minute()
                                * ((start_pulse - prev_t.pulse()) / (end_pulse - prev_t.pulse()))
                        } else {
                            prev_t.beats_per_minute()
                        }
                    }
                    (LockStyle::AudioTime, Some(pp)) => {
                        if frame > pp.frame() + MIN_DFRAME && end_frame > pp.frame() + MIN_DFRAME {
                            prev_t.beats_per_minute()
                                * ((frame - pp.frame()) as f64 / (end_frame - pp.frame()) as f64)
                        } else {
                            prev_t.beats_per_minute()
                        }
                    }
                    (LockStyle::AudioTime, None) => {
                        if frame > prev_t.frame() + MIN_DFRAME
                            && end_frame > prev_t.frame() + MIN_DFRAME
                        {
                            prev_t.beats_per_minute()
                                * ((frame - prev_t.frame()) as f64
                                    / (end_frame - prev_t.frame()) as f64)
                        } else {
                            prev_t.beats_per_minute()
                        }
                    }
                }
            } else {
                let mut frame_ratio = 1.0;
                let mut pulse_ratio = 1.0;
                let pulse_pos = prev_t.frame_at_pulse(pulse, fr);

                if let Some(pp) = &prev_to_prev {
                    if pulse_pos > pp.frame() + MIN_DFRAME
                        && (pulse_pos - fr_off) > pp.frame() + MIN_DFRAME
                    {
                        frame_ratio = ((pulse_pos - fr_off) - pp.frame()) as f64
                            / (pulse_pos - pp.frame()) as f64;
                    }
                    if end_pulse > pp.pulse() && start_pulse > pp.pulse() {
                        pulse_ratio = (start_pulse - pp.pulse()) / (end_pulse - pp.pulse());
                    }
                } else {
                    if pulse_pos > prev_t.frame() + MIN_DFRAME
                        && (pulse_pos - fr_off) > prev_t.frame() + MIN_DFRAME
                    {
                        frame_ratio = ((pulse_pos - fr_off) - prev_t.frame()) as f64
                            / (pulse_pos - prev_t.frame()) as f64;
                    }
                    pulse_ratio = start_pulse / end_pulse;
                }
                prev_t.beats_per_minute() * (pulse_ratio * frame_ratio)
            };

            if new_bpm < 0.5 {
                return Err(MapError::TempoOutOfRange(new_bpm));
            }
            new_bpm = new_bpm.min(1000.0);

            if let Some(t) = future[pi].as_tempo_mut() {
                t.tempo = Tempo::new(new_bpm, t.note_type());
            }
            solver::recompute_tempi(&mut future, fr);
            solver::recompute_meters(&mut future, fr);

            if solver::check_solved(&future, fr) {
                if let Some(t) = tempo_mut_by_id(&mut metrics, id) {
                    t.tempo = Tempo::new(new_bpm, t.note_type());
                }
                solver::recompute_tempi(&mut metrics, fr);
                solver::recompute_meters(&mut metrics, fr);
                true
            } else {
                false
            }
        };
        if dilated {
            self.notify();
            Ok(())
        } else {
            Err(MapError::Unsolvable)
        }
    }

    /// Shift every movable section at or past `where_` later by `amount`
    /// samples, then re-derive musical positions from the new audio
    /// positions; meters round up to the next full bar boundary.
    pub fn insert_time(&self, where_: FramePos, amount: FrameCount) {
        {
            let mut metrics = self.metrics.write();
            let fr = self.frame_rate;

            for s in metrics.iter_mut() {
                if s.frame() >= where_ && s.movable() {
                    s.set_frame(s.frame() + amount);
                }
            }

            // reverse timestamp: the only place musical positions are
            // derived from audio positions wholesale
            let mut first_meter_seen = false;
            for i in 0..metrics.len() {
                let (is_tempo, active, frame) = match &metrics[i] {
                    MetricSection::Tempo(t) => (true, t.active(), t.frame()),
                    MetricSection::Meter(m) => (false, true, m.frame()),
                };

                if is_tempo {
                    if !active {
                        continue;
                    }
                    let pulse = query::pulse_at_frame(&metrics, frame, fr);
                    if let Some(t) = metrics[i].as_tempo_mut() {
                        t.pulse = pulse;
                    }
                } else {
                    if !first_meter_seen {
                        // the leading meter stays at 1|1|0
                        first_meter_seen = true;
                        continue;
                    }
                    let mut bbt = query::bbt_at_frame(&metrics, frame, fr);
                    if bbt.ticks as f64 > TICKS_PER_BEAT / 2.0 {
                        bbt.beats += 1;
                    }
                    bbt.ticks = 0;
                    if bbt.beats != 1 {
                        bbt.bars += 1;
                        bbt.beats = 1;
                    }
                    let beat = query::beat_at_frame(&metrics, frame, fr).max(0.0);
                    let pulse = query::pulse_at_frame(&metrics, frame, fr);
                    if let Some(m) = metrics[i].as_meter_mut() {
                        m.bbt = bbt;
                        m.beat = beat;
                        m.pulse = pulse;
                    }
                }
            }

            solver::recompute_map(&mut metrics, fr);
        }
        self.notify();
    }

    /// Remove `amount` samples of timeline at `where_`. Sections inside the
    /// removed range are dropped, except that the last tempo and meter in
    /// the range move to the cut point when no marker sits immediately
    /// after it. Returns whether anything moved.
    pub fn remove_time(&self, where_: FramePos, amount: FrameCount) -> bool {
        let moved = {
            let mut metrics = self.metrics.write();
            let mut kill: Vec<SectionId> = Vec::new();
            let mut last_tempo: Option<SectionId> = None;
            let mut last_meter: Option<SectionId> = None;
            let mut tempo_after = false;
            let mut meter_after = false;
            let mut moved = false;

            for s in metrics.iter_mut() {
                if !s.movable() {
                    continue;
                }
                let f = s.frame();
                if f >= where_ && f < where_ + amount {
                    kill.push(s.id());
                    if s.is_tempo() {
                        last_tempo = Some(s.id());
                    } else {
                        last_meter = Some(s.id());
                    }
                } else if f >= where_ {
                    // TODO: round the shifted markers to beat/bar boundaries
                    s.set_frame(f - amount);
                    if s.frame() == where_ {
                        // marker was immediately after the end of the range
                        if s.is_tempo() {
                            tempo_after = true;
                        } else {
                            meter_after = true;
                        }
                    }
                    moved = true;
                }
            }

            // move the last removed tempo and meter to the cut point so
            // everything later stays correct
            if let Some(id) = last_tempo {
                if !tempo_after {
                    kill.retain(|k| *k != id);
                    if let Some(i) = section_index(&metrics, id) {
                        metrics[i].set_frame(where_);
                    }
                    moved = true;
                }
            }
            if let Some(id) = last_meter {
                if !meter_after {
                    kill.retain(|k| *k != id);
                    if let Some(i) = section_index(&metrics, id) {
                        metrics[i].set_frame(where_);
                    }
                    moved = true;
                }
            }

            if !kill.is_empty() {
                moved = true;
            }
            metrics.retain(|s| !kill.contains(&s.id()));

            if moved {
                solver::recompute_map(&mut metrics, self.frame_rate);
            }
            moved
        };
        if moved {
            self.notify();
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FR: FrameCount = 48_000;

    #[test]
    fn test_add_and_remove_tempo_restores_map() {
        let map = TempoMap::new(FR);
        let before = map.sections().len();

        let added = map
            .add_tempo(
                Tempo::quarter(240.0),
                3.0,
                0,
                CurveKind::Constant,
                LockStyle::MusicTime,
            )
            .unwrap();
        assert_eq!(map.sections().len(), before + 1);

        map.remove_tempo(added.id()).unwrap();
        assert_eq!(map.sections().len(), before);
        assert_eq!(map.frame_at_beat(4.0), 96_000);
    }

    #[test]
    fn test_remove_leading_sections_fails() {
        let map = TempoMap::new(FR);
        assert!(matches!(
            map.remove_tempo(map.first_tempo().id()),
            Err(MapError::Immovable)
        ));
        assert!(matches!(
            map.remove_meter(map.first_meter().id()),
            Err(MapError::Immovable)
        ));
    }

    #[test]
    fn test_change_initial_tempo() {
        let map = TempoMap::new(FR);
        map.change_initial_tempo(60.0, 4.0).unwrap();
        assert_eq!(map.frame_at_beat(1.0), 48_000);
        assert_eq!(map.first_tempo().beats_per_minute(), 60.0);
    }

    #[test]
    fn test_gui_change_tempo() {
        let map = TempoMap::new(FR);
        let first = map.first_tempo();
        map.gui_change_tempo(first.id(), Tempo::quarter(240.0))
            .unwrap();
        assert_eq!(map.frame_at_beat(1.0), 12_000);
    }

    #[test]
    fn test_mutation_notifies_subscribers() {
        let map = TempoMap::new(FR);
        let rx = map.subscribe();
        map.change_initial_tempo(90.0, 4.0).unwrap();
        assert_eq!(rx.try_recv().unwrap(), crate::MapChanged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_insert_time_shifts_movable_sections() {
        let map = TempoMap::new(FR);
        let added = map
            .add_tempo(
                Tempo::quarter(240.0),
                0.0,
                480_000,
                CurveKind::Constant,
                LockStyle::AudioTime,
            )
            .unwrap();

        map.insert_time(100_000, 48_000);

        let sections = map.sections();
        let moved = sections
            .iter()
            .filter_map(|s| s.as_tempo())
            .find(|t| t.id() == added.id())
            .unwrap();
        assert_eq!(moved.frame(), 528_000);
        // the leading pair stays put
        assert_eq!(map.first_tempo().frame(), 0);
    }

    #[test]
    fn test_remove_time_drops_sections_in_range() {
        let map = TempoMap::new(FR);
        map.add_tempo(
            Tempo::quarter(240.0),
            0.0,
            480_000,
            CurveKind::Constant,
            LockStyle::AudioTime,
        )
        .unwrap();

        // the section sits inside the removed range: it lands on the cut
        assert!(map.remove_time(400_000, 200_000));
        let sections = map.sections();
        let survivor = sections
            .iter()
            .filter_map(|s| s.as_tempo())
            .find(|t| t.movable())
            .unwrap();
        assert_eq!(survivor.frame(), 400_000);
    }
}
