//! Timeline sections and the ordered section store
//!
//! Tempo and meter sections share an anchoring header: a frame position, a
//! pulse position, a movable flag and a lock style. The lock style names the
//! axis the section is pinned to; the solver recomputes the other axis.
//!
//! The first tempo and first meter are special: they move together, are
//! locked to audio time, and cannot be removed. Audio-locked tempos that end
//! up before the first meter are deactivated and revived if the first meter
//! moves back past them.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::bbt::BbtTime;
use crate::tempo::{Meter, Tempo};
use crate::FramePos;

/// Section identity, unique within the process.
///
/// Clones made for trial solving keep their ids, which is how a caller's
/// section is located again in a trial map and after re-sorting.
pub type SectionId = u64;

static NEXT_SECTION_ID: AtomicU64 = AtomicU64::new(1);

fn new_section_id() -> SectionId {
    NEXT_SECTION_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// The axis a section is pinned to; the other axis is recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStyle {
    /// Frame is the anchor, pulse is derived.
    AudioTime,
    /// Pulse is the anchor, frame is derived.
    MusicTime,
}

/// Shape of a tempo segment's curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CurveKind {
    #[default]
    Constant,
    Ramp,
}

/// A tempo change anchored on the timeline.
#[derive(Debug, Clone)]
pub struct TempoSection {
    pub(crate) id: SectionId,
    pub(crate) frame: FramePos,
    pub(crate) pulse: f64,
    pub(crate) movable: bool,
    pub(crate) lock_style: LockStyle,
    pub(crate) tempo: Tempo,
    pub(crate) kind: CurveKind,
    /// Ramp constant: tempo(t) = tempo0 * exp(c * t), t in minutes from this
    /// section's frame. Derived from the next tempo section; 0 in the last.
    pub(crate) c: f64,
    pub(crate) active: bool,
    /// This tempo exists to anchor an audio-locked meter at the same frame.
    pub(crate) locked_to_meter: bool,
    /// Bar|beat|tick stashed from a legacy session; translated after load.
    pub(crate) legacy_bbt: Option<BbtTime>,
}

impl TempoSection {
    pub(crate) fn new(
        pulse: f64,
        frame: FramePos,
        tempo: Tempo,
        kind: CurveKind,
        lock_style: LockStyle,
    ) -> Self {
        Self {
            id: new_section_id(),
            frame,
            pulse,
            movable: true,
            lock_style,
            tempo,
            kind,
            c: 0.0,
            active: true,
            locked_to_meter: false,
            legacy_bbt: None,
        }
    }

    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn frame(&self) -> FramePos {
        self.frame
    }

    pub fn pulse(&self) -> f64 {
        self.pulse
    }

    pub fn movable(&self) -> bool {
        self.movable
    }

    pub fn lock_style(&self) -> LockStyle {
        self.lock_style
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn beats_per_minute(&self) -> f64 {
        self.tempo.beats_per_minute()
    }

    pub fn note_type(&self) -> f64 {
        self.tempo.note_type()
    }

    pub fn pulses_per_minute(&self) -> f64 {
        self.tempo.pulses_per_minute()
    }

    pub fn kind(&self) -> CurveKind {
        self.kind
    }

    /// The ramp constant in effect (0 for constant segments and the last
    /// tempo section).
    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn locked_to_meter(&self) -> bool {
        self.locked_to_meter
    }
}

/// A meter change anchored on the timeline.
///
/// Meter starts always sit on the first beat of a bar: bbt has beats = 1 and
/// ticks = 0 in any solved map.
#[derive(Debug, Clone)]
pub struct MeterSection {
    pub(crate) id: SectionId,
    pub(crate) frame: FramePos,
    pub(crate) pulse: f64,
    pub(crate) movable: bool,
    pub(crate) lock_style: LockStyle,
    pub(crate) meter: Meter,
    /// Running beat count at this meter's start; 0 for the first meter.
    pub(crate) beat: f64,
    pub(crate) bbt: BbtTime,
}

impl MeterSection {
    pub(crate) fn new(
        pulse: f64,
        frame: FramePos,
        beat: f64,
        bbt: BbtTime,
        meter: Meter,
        lock_style: LockStyle,
    ) -> Self {
        Self {
            id: new_section_id(),
            frame,
            pulse,
            movable: true,
            lock_style,
            meter,
            beat,
            bbt,
        }
    }

    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn frame(&self) -> FramePos {
        self.frame
    }

    pub fn pulse(&self) -> f64 {
        self.pulse
    }

    pub fn movable(&self) -> bool {
        self.movable
    }

    pub fn lock_style(&self) -> LockStyle {
        self.lock_style
    }

    pub fn meter(&self) -> Meter {
        self.meter
    }

    pub fn divisions_per_bar(&self) -> f64 {
        self.meter.divisions_per_bar()
    }

    pub fn note_divisor(&self) -> f64 {
        self.meter.note_divisor()
    }

    pub fn beat(&self) -> f64 {
        self.beat
    }

    pub fn bbt(&self) -> BbtTime {
        self.bbt
    }
}

/// A section of the map: either a tempo change or a meter change.
#[derive(Debug, Clone)]
pub enum MetricSection {
    Tempo(TempoSection),
    Meter(MeterSection),
}

impl MetricSection {
    pub fn id(&self) -> SectionId {
        match self {
            Self::Tempo(t) => t.id,
            Self::Meter(m) => m.id,
        }
    }

    pub fn frame(&self) -> FramePos {
        match self {
            Self::Tempo(t) => t.frame,
            Self::Meter(m) => m.frame,
        }
    }

    pub fn pulse(&self) -> f64 {
        match self {
            Self::Tempo(t) => t.pulse,
            Self::Meter(m) => m.pulse,
        }
    }

    pub fn movable(&self) -> bool {
        match self {
            Self::Tempo(t) => t.movable,
            Self::Meter(m) => m.movable,
        }
    }

    pub fn lock_style(&self) -> LockStyle {
        match self {
            Self::Tempo(t) => t.lock_style,
            Self::Meter(m) => m.lock_style,
        }
    }

    pub fn is_tempo(&self) -> bool {
        matches!(self, Self::Tempo(_))
    }

    pub fn as_tempo(&self) -> Option<&TempoSection> {
        match self {
            Self::Tempo(t) => Some(t),
            Self::Meter(_) => None,
        }
    }

    pub fn as_meter(&self) -> Option<&MeterSection> {
        match self {
            Self::Tempo(_) => None,
            Self::Meter(m) => Some(m),
        }
    }

    pub(crate) fn as_tempo_mut(&mut self) -> Option<&mut TempoSection> {
        match self {
            Self::Tempo(t) => Some(t),
            Self::Meter(_) => None,
        }
    }

    pub(crate) fn as_meter_mut(&mut self) -> Option<&mut MeterSection> {
        match self {
            Self::Tempo(_) => None,
            Self::Meter(m) => Some(m),
        }
    }

    pub(crate) fn set_frame(&mut self, frame: FramePos) {
        match self {
            Self::Tempo(t) => t.frame = frame,
            Self::Meter(m) => m.frame = frame,
        }
    }
}

/// The ordered section store. In a solved map, sorting by frame and sorting
/// by pulse produce the same order for the active sections.
pub(crate) type Metrics = Vec<MetricSection>;

pub(crate) fn sort_by_pulse(metrics: &mut Metrics) {
    metrics.sort_by(|a, b| a.pulse().partial_cmp(&b.pulse()).unwrap_or(Ordering::Equal));
}

pub(crate) fn sort_by_frame(metrics: &mut Metrics) {
    metrics.sort_by_key(|s| s.frame());
}

pub(crate) fn section_index(metrics: &Metrics, id: SectionId) -> Option<usize> {
    metrics.iter().position(|s| s.id() == id)
}

/// Indices of active tempo sections, in store order.
pub(crate) fn active_tempo_indices(metrics: &Metrics) -> Vec<usize> {
    metrics
        .iter()
        .enumerate()
        .filter(|(_, s)| s.as_tempo().is_some_and(|t| t.active))
        .map(|(i, _)| i)
        .collect()
}

/// Indices of meter sections, in store order.
pub(crate) fn meter_indices(metrics: &Metrics) -> Vec<usize> {
    metrics
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_tempo())
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_ids_are_unique() {
        let a = TempoSection::new(0.0, 0, Tempo::quarter(120.0), CurveKind::Ramp, LockStyle::AudioTime);
        let b = TempoSection::new(0.0, 0, Tempo::quarter(120.0), CurveKind::Ramp, LockStyle::AudioTime);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_preserves_id() {
        let a = TempoSection::new(1.0, 100, Tempo::quarter(90.0), CurveKind::Constant, LockStyle::MusicTime);
        let b = a.clone();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_sorts_agree_on_solved_order() {
        let t0 = TempoSection::new(0.0, 0, Tempo::quarter(120.0), CurveKind::Ramp, LockStyle::AudioTime);
        let mut t1 = TempoSection::new(4.0, 100, Tempo::quarter(90.0), CurveKind::Ramp, LockStyle::MusicTime);
        t1.frame = 384_000;
        let mut metrics: Metrics = vec![MetricSection::Tempo(t1), MetricSection::Tempo(t0)];

        sort_by_pulse(&mut metrics);
        let by_pulse: Vec<SectionId> = metrics.iter().map(|s| s.id()).collect();
        sort_by_frame(&mut metrics);
        let by_frame: Vec<SectionId> = metrics.iter().map(|s| s.id()).collect();
        assert_eq!(by_pulse, by_frame);
    }
}
