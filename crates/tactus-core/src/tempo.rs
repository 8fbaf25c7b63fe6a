//! Tempo and meter value types
//!
//! `Tempo` expresses a pulse rate, `Meter` divides pulses into bars and
//! beats. Both are plain values; the anchored timeline sections that carry
//! them live in `section`.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::FrameCount;

/// Process-wide default tempo: 120 quarter notes per minute.
pub static DEFAULT_TEMPO: Lazy<Tempo> = Lazy::new(|| Tempo::new(120.0, 4.0));

/// Process-wide default meter: 4/4.
pub static DEFAULT_METER: Lazy<Meter> = Lazy::new(|| Meter::new(4.0, 4.0));

/// A tempo value.
///
/// `beats_per_minute` counts `note_type`ths per minute, not musical beats:
/// a quarter-note tempo of 120 is 120 quarters per minute, i.e. 30 whole-note
/// pulses per minute. Musical beats come from the meter in effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    beats_per_minute: f64,
    note_type: f64,
}

impl Tempo {
    pub fn new(beats_per_minute: f64, note_type: f64) -> Self {
        Self {
            beats_per_minute,
            note_type,
        }
    }

    /// A quarter-note tempo.
    pub fn quarter(beats_per_minute: f64) -> Self {
        Self::new(beats_per_minute, 4.0)
    }

    pub fn beats_per_minute(&self) -> f64 {
        self.beats_per_minute
    }

    /// The note value that equals one beat (4 = quarter, 8 = eighth).
    pub fn note_type(&self) -> f64 {
        self.note_type
    }

    /// Whole-note pulses per minute.
    pub fn pulses_per_minute(&self) -> f64 {
        self.beats_per_minute / self.note_type
    }

    pub fn frames_per_beat(&self, frame_rate: FrameCount) -> f64 {
        (60.0 * frame_rate as f64) / self.beats_per_minute
    }

    pub fn frames_per_pulse(&self, frame_rate: FrameCount) -> f64 {
        self.frames_per_beat(frame_rate) * self.note_type
    }
}

impl Default for Tempo {
    fn default() -> Self {
        *DEFAULT_TEMPO
    }
}

/// A meter: `divisions_per_bar` beats per bar, each beat one
/// `1/note_divisor` of a whole note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    divisions_per_bar: f64,
    note_divisor: f64,
}

impl Meter {
    pub fn new(divisions_per_bar: f64, note_divisor: f64) -> Self {
        Self {
            divisions_per_bar,
            note_divisor,
        }
    }

    pub fn divisions_per_bar(&self) -> f64 {
        self.divisions_per_bar
    }

    pub fn note_divisor(&self) -> f64 {
        self.note_divisor
    }

    /// Frames between two adjacent grid lines under `tempo`.
    ///
    /// Tempo- and meter-sensitive; the result is not interpretable in terms
    /// of musical beats.
    pub fn frames_per_grid(&self, tempo: &Tempo, frame_rate: FrameCount) -> f64 {
        (60.0 * frame_rate as f64)
            / (tempo.beats_per_minute() * (self.note_divisor / tempo.note_type()))
    }

    pub fn frames_per_bar(&self, tempo: &Tempo, frame_rate: FrameCount) -> f64 {
        self.frames_per_grid(tempo, frame_rate) * self.divisions_per_bar
    }
}

impl Default for Meter {
    fn default() -> Self {
        *DEFAULT_METER
    }
}
