//! The tempo map
//!
//! `TempoMap` owns the section store behind one read-write lock. Queries
//! take the lock shared for their duration; mutations (see `edit`) take it
//! exclusively and notify subscribers after releasing it. The `_rt` query
//! variants never block: on contention they fail with
//! [`MapError::WouldBlock`] and the real-time caller retries next buffer.
//!
//! Frame/beat precision: `frame_at_beat(beat_at_frame(f)) == f`, because
//! frame rounding happens at output only. The reverse round trip may be off
//! by up to half a sample. Work in pulses or beats; convert to frames last.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::bbt::{BbtTime, TICKS_PER_BEAT};
use crate::error::{MapError, MapResult};
use crate::query;
use crate::section::{
    CurveKind, LockStyle, MeterSection, MetricSection, Metrics, TempoSection,
};
use crate::solver;
use crate::tempo::{Meter, Tempo, DEFAULT_METER, DEFAULT_TEMPO};
use crate::{FrameCount, FramePos};

/// Sent to subscribers after a successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapChanged;

/// The tempo map: an ordered sequence of tempo and meter sections kept in a
/// solved state.
pub struct TempoMap {
    pub(crate) metrics: RwLock<Metrics>,
    pub(crate) frame_rate: FrameCount,
    subscribers: Mutex<Vec<Sender<MapChanged>>>,
}

impl TempoMap {
    /// A new map holding the immovable leading pair: the default tempo and
    /// meter, audio-locked at frame 0, pulse 0.
    pub fn new(frame_rate: FrameCount) -> Self {
        let mut tempo = TempoSection::new(
            0.0,
            0,
            *DEFAULT_TEMPO,
            CurveKind::Ramp,
            LockStyle::AudioTime,
        );
        tempo.movable = false;

        let mut meter = MeterSection::new(
            0.0,
            0,
            0.0,
            BbtTime::ONSET,
            *DEFAULT_METER,
            LockStyle::AudioTime,
        );
        meter.movable = false;

        Self {
            metrics: RwLock::new(vec![
                MetricSection::Tempo(tempo),
                MetricSection::Meter(meter),
            ]),
            frame_rate,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn frame_rate(&self) -> FrameCount {
        self.frame_rate
    }

    /// Receive a [`MapChanged`] message after every committed mutation.
    pub fn subscribe(&self) -> Receiver<MapChanged> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn notify(&self) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(MapChanged).is_ok());
    }

    /* section access */

    /// Snapshot of all sections in store order.
    pub fn sections(&self) -> Vec<MetricSection> {
        self.metrics.read().clone()
    }

    /// The immovable leading tempo.
    pub fn first_tempo(&self) -> TempoSection {
        let metrics = self.metrics.read();
        metrics
            .iter()
            .filter_map(|s| s.as_tempo())
            .find(|t| t.active() && !t.movable())
            .cloned()
            .expect("programming error: no tempo section in tempo map")
    }

    /// The leading meter.
    pub fn first_meter(&self) -> MeterSection {
        let metrics = self.metrics.read();
        metrics
            .iter()
            .filter_map(|s| s.as_meter())
            .next()
            .cloned()
            .expect("programming error: no meter section in tempo map")
    }

    pub fn tempo_section_at_frame(&self, frame: FramePos) -> TempoSection {
        let metrics = self.metrics.read();
        query::tempo_section_at_frame(&metrics, frame).clone()
    }

    pub fn meter_section_at_frame(&self, frame: FramePos) -> MeterSection {
        let metrics = self.metrics.read();
        query::meter_section_at_frame(&metrics, frame).clone()
    }

    pub fn meter_section_at_beat(&self, beat: f64) -> MeterSection {
        let metrics = self.metrics.read();
        query::meter_section_at_beat(&metrics, beat).clone()
    }

    /// Meter value in effect at `frame`.
    pub fn meter_at_frame(&self, frame: FramePos) -> Meter {
        self.meter_section_at_frame(frame).meter()
    }

    pub fn n_tempos(&self) -> usize {
        self.metrics.read().iter().filter(|s| s.is_tempo()).count()
    }

    pub fn n_meters(&self) -> usize {
        self.metrics.read().iter().filter(|s| !s.is_tempo()).count()
    }

    /* frame <-> pulse */

    pub fn pulse_at_frame(&self, frame: FramePos) -> f64 {
        let metrics = self.metrics.read();
        query::pulse_at_frame(&metrics, frame, self.frame_rate)
    }

    pub fn frame_at_pulse(&self, pulse: f64) -> FramePos {
        let metrics = self.metrics.read();
        query::frame_at_pulse(&metrics, pulse, self.frame_rate)
    }

    /* frame <-> beat */

    /// Beat at `frame`; negative when `frame` lies before the first meter
    /// (the tempo curve is continued backwards).
    pub fn beat_at_frame(&self, frame: FramePos) -> f64 {
        let metrics = self.metrics.read();
        query::beat_at_frame(&metrics, frame, self.frame_rate)
    }

    pub fn frame_at_beat(&self, beat: f64) -> FramePos {
        let metrics = self.metrics.read();
        query::frame_at_beat(&metrics, beat, self.frame_rate)
    }

    /* beat <-> pulse */

    pub fn pulse_at_beat(&self, beat: f64) -> f64 {
        let metrics = self.metrics.read();
        query::pulse_at_beat(&metrics, beat)
    }

    pub fn beat_at_pulse(&self, pulse: f64) -> f64 {
        let metrics = self.metrics.read();
        query::beat_at_pulse(&metrics, pulse)
    }

    /* bbt */

    pub fn beat_at_bbt(&self, bbt: BbtTime) -> f64 {
        let metrics = self.metrics.read();
        query::beat_at_bbt(&metrics, bbt)
    }

    pub fn bbt_at_beat(&self, beat: f64) -> BbtTime {
        let metrics = self.metrics.read();
        query::bbt_at_beat(&metrics, beat)
    }

    pub fn pulse_at_bbt(&self, bbt: BbtTime) -> f64 {
        let metrics = self.metrics.read();
        query::pulse_at_bbt(&metrics, bbt)
    }

    /// Non-blocking [`Self::pulse_at_bbt`] for real-time callers.
    pub fn pulse_at_bbt_rt(&self, bbt: BbtTime) -> MapResult<f64> {
        let metrics = self.metrics.try_read().ok_or(MapError::WouldBlock)?;
        Ok(query::pulse_at_bbt(&metrics, bbt))
    }

    pub fn bbt_at_pulse(&self, pulse: f64) -> BbtTime {
        let metrics = self.metrics.read();
        query::bbt_at_pulse(&metrics, pulse)
    }

    pub fn bbt_at_frame(&self, frame: FramePos) -> BbtTime {
        if frame < 0 {
            log::warn!("tempo map asked for BBT time at frame {frame}");
            return BbtTime::ONSET;
        }
        let metrics = self.metrics.read();
        query::bbt_at_frame(&metrics, frame, self.frame_rate)
    }

    /// Non-blocking [`Self::bbt_at_frame`] for real-time callers.
    pub fn bbt_at_frame_rt(&self, frame: FramePos) -> MapResult<BbtTime> {
        let metrics = self.metrics.try_read().ok_or(MapError::WouldBlock)?;
        Ok(query::bbt_at_frame(&metrics, frame, self.frame_rate))
    }

    pub fn frame_at_bbt(&self, bbt: BbtTime) -> FramePos {
        if bbt.bars < 1 {
            log::warn!("tempo map asked for frame time at bar < 1 ({bbt})");
            return 0;
        }
        assert!(bbt.beats >= 1, "beats are counted from one");

        let metrics = self.metrics.read();
        query::frame_at_bbt(&metrics, bbt, self.frame_rate)
    }

    /* tempo */

    /// Tempo in effect at `frame`, ramp-aware.
    pub fn tempo_at_frame(&self, frame: FramePos) -> Tempo {
        let metrics = self.metrics.read();
        query::tempo_at_frame(&metrics, frame, self.frame_rate)
    }

    /// Frame of the first occurrence of `tempo`, or the last tempo
    /// section's frame when the search is exhausted.
    pub fn frame_at_tempo(&self, tempo: Tempo) -> FramePos {
        let metrics = self.metrics.read();
        query::frame_at_tempo(&metrics, tempo, self.frame_rate)
    }

    /// Tempo at `beat`. More precise than going through a frame: no
    /// intermediate rounding.
    pub fn tempo_at_beat(&self, beat: f64) -> Tempo {
        let metrics = self.metrics.read();
        query::tempo_at_beat(&metrics, beat)
    }

    /// Frames per beat at `frame`. The tempo is only correct for that exact
    /// frame; measure lengths with the beat_at_frame / frame_at_beat pair
    /// instead.
    pub fn frames_per_beat_at(&self, frame: FramePos) -> f64 {
        let metrics = self.metrics.read();

        let mut ts_at: Option<&TempoSection> = None;
        let mut ts_after: Option<&TempoSection> = None;
        for section in metrics.iter() {
            let Some(t) = section.as_tempo() else { continue };
            if !t.active() {
                continue;
            }
            if ts_at.is_some() && t.frame() > frame {
                ts_after = Some(t);
                break;
            }
            ts_at = Some(t);
        }
        let ts_at = ts_at.expect("programming error: no tempo section in tempo map");

        if ts_after.is_some() {
            return (60.0 * self.frame_rate as f64)
                / (ts_at.tempo_at_frame(frame, self.frame_rate) * ts_at.note_type());
        }
        ts_at.frames_per_beat(self.frame_rate)
    }

    /* quarter notes: the meter-blind pulse*4 axis plugin hosts use */

    /// Quarter-note distance from the session origin to `frame`. Ignores
    /// meter.
    pub fn quarter_note_at_frame(&self, frame: FramePos) -> f64 {
        let metrics = self.metrics.read();
        query::pulse_at_frame(&metrics, frame, self.frame_rate) * 4.0
    }

    /// Non-blocking [`Self::quarter_note_at_frame`] for real-time callers.
    pub fn quarter_note_at_frame_rt(&self, frame: FramePos) -> MapResult<f64> {
        let metrics = self.metrics.try_read().ok_or(MapError::WouldBlock)?;
        Ok(query::pulse_at_frame(&metrics, frame, self.frame_rate) * 4.0)
    }

    pub fn frame_at_quarter_note(&self, quarter_note: f64) -> FramePos {
        let metrics = self.metrics.read();
        query::frame_at_pulse(&metrics, quarter_note / 4.0, self.frame_rate)
    }

    /* grid-exact beats */

    /// The beat nearest `frame`, quantized to `sub_num` subdivisions of a
    /// beat (1 = whole beats, -1 = bars, 0 = none). Negative before the
    /// first meter.
    pub fn exact_beat_at_frame(&self, frame: FramePos, sub_num: i32) -> f64 {
        let metrics = self.metrics.read();
        query::exact_beat_at_frame(&metrics, frame, sub_num, self.frame_rate)
    }

    /* position arithmetic */

    /// Add (fractional) beats to a frame position. `frame` may be negative.
    pub fn framepos_plus_beats(&self, frame: FramePos, beats: f64) -> FramePos {
        let metrics = self.metrics.read();
        query::frame_at_beat(
            &metrics,
            query::beat_at_frame(&metrics, frame, self.frame_rate) + beats,
            self.frame_rate,
        )
    }

    /// Subtract (fractional) beats from a frame position.
    pub fn framepos_minus_beats(&self, frame: FramePos, beats: f64) -> FramePos {
        let metrics = self.metrics.read();
        query::frame_at_beat(
            &metrics,
            query::beat_at_frame(&metrics, frame, self.frame_rate) - beats,
            self.frame_rate,
        )
    }

    /// Add the BBT interval `op` to `pos`.
    pub fn framepos_plus_bbt(&self, pos: FramePos, op: BbtTime) -> FramePos {
        let metrics = self.metrics.read();

        let mut pos_bbt = query::bbt_at_beat(
            &metrics,
            query::beat_at_frame(&metrics, pos, self.frame_rate),
        );
        pos_bbt.ticks += op.ticks;
        if pos_bbt.ticks as f64 >= TICKS_PER_BEAT {
            pos_bbt.beats += 1;
            pos_bbt.ticks -= TICKS_PER_BEAT as u32;
        }
        pos_bbt.beats += op.beats;

        // the meter in effect will start on the bar
        let mut divisions_per_bar = query::meter_section_at_beat(
            &metrics,
            query::beat_at_bbt(&metrics, BbtTime::new(pos_bbt.bars + op.bars, 1, 0)),
        )
        .divisions_per_bar();
        while pos_bbt.beats as f64 >= divisions_per_bar + 1.0 {
            pos_bbt.bars += 1;
            divisions_per_bar = query::meter_section_at_beat(
                &metrics,
                query::beat_at_bbt(&metrics, BbtTime::new(pos_bbt.bars + op.bars, 1, 0)),
            )
            .divisions_per_bar();
            pos_bbt.beats -= divisions_per_bar as u32;
        }
        pos_bbt.bars += op.bars;

        query::frame_at_bbt(&metrics, pos_bbt, self.frame_rate)
    }

    /// Count the beats equivalent to `distance` frames starting at `pos`.
    pub fn framewalk_to_beats(&self, pos: FramePos, distance: FrameCount) -> f64 {
        let metrics = self.metrics.read();
        query::beat_at_frame(&metrics, pos + distance, self.frame_rate)
            - query::beat_at_frame(&metrics, pos, self.frame_rate)
    }

    /// Frame position reached by walking the beats and ticks of `bbt`
    /// forward from `pos` (bars are carried by the caller).
    pub fn bbt_duration_at(&self, pos: FramePos, bbt: BbtTime) -> FramePos {
        let metrics = self.metrics.read();

        let tick_at_time =
            query::beat_at_frame(&metrics, pos, self.frame_rate).max(0.0) * TICKS_PER_BEAT;
        let bbt_ticks = bbt.ticks as f64 + (bbt.beats as f64 * TICKS_PER_BEAT);
        let total_beats = (tick_at_time + bbt_ticks) / TICKS_PER_BEAT;

        query::frame_at_beat(&metrics, total_beats, self.frame_rate)
    }

    /* trial-solve probes */

    /// Would moving tempo section `id` to `bbt` leave the map solvable?
    pub fn can_solve_bbt(&self, id: crate::section::SectionId, bbt: BbtTime) -> bool {
        let mut copy = self.metrics.read().clone();
        let pulse = query::pulse_at_bbt(&copy, bbt);
        solver::solve_tempo_pulse(&mut copy, id, pulse, self.frame_rate)
    }

    /// The (pulse, frame) tempo section `id` would land on if moved to
    /// `bbt`, accounting for any reordering; its current coordinates when
    /// the move is infeasible.
    pub fn predict_tempo_position(
        &self,
        id: crate::section::SectionId,
        bbt: BbtTime,
    ) -> (f64, FramePos) {
        let metrics = self.metrics.read();
        let mut future = metrics.clone();

        let beat = query::beat_at_bbt(&future, bbt);
        let pulse = query::pulse_at_beat(&future, beat);

        if solver::solve_tempo_pulse(&mut future, id, pulse, self.frame_rate) {
            if let Some(i) = crate::section::section_index(&future, id) {
                if let Some(t) = future[i].as_tempo() {
                    return (t.pulse(), t.frame());
                }
            }
        }

        if let Some(i) = crate::section::section_index(&metrics, id) {
            (metrics[i].pulse(), metrics[i].frame())
        } else {
            (0.0, 0)
        }
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(48_000)
    }
}
