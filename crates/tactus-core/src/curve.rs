//! Closed-form math for one tempo curve segment
//!
//! A ramped segment with initial tempo T0 (pulses per minute) and ramp
//! constant c follows T(t) = T0 * exp(c * t), with t in minutes from the
//! segment's frame. Integrating gives the pulse function and its inverses:
//!
//!   pulses at time:  P(t) = T0 * (exp(c*t) - 1) / c
//!   time at pulses:  t(P) = log1p(c*P / T0) / c
//!   time at tempo:   t(T) = log(T / T0) / c
//!   pulses at tempo: P(T) = (T - T0) / c
//!   tempo at pulses: T(P) = P*c + T0
//!
//! c is defined by the next tempo section: from its pulse distance,
//! c = T0 * expm1(log(T1/T0)) / (P1 - P0); from its frame distance,
//! c = log(T1/T0) / minutes(F1 - F0). When the segment is constant or c is
//! zero everything degenerates to the linear P(t) = T0 * t.
//!
//! All public methods are session-relative; the segment-local primitives at
//! the bottom work in minutes and pulses from the section start. The
//! expm1/log1p forms keep the math stable for small c.

use crate::section::{CurveKind, TempoSection};
use crate::{FrameCount, FramePos};

pub(crate) fn frame_to_minute(frame: FramePos, frame_rate: FrameCount) -> f64 {
    (frame as f64 / frame_rate as f64) / 60.0
}

pub(crate) fn minute_to_frame(minute: f64, frame_rate: FrameCount) -> FramePos {
    ((minute * 60.0 * frame_rate as f64) + 0.5).floor() as FramePos
}

impl TempoSection {
    fn is_linear(&self) -> bool {
        self.kind == CurveKind::Constant || self.c == 0.0
    }

    /// Tempo in pulses per minute at a session frame within this segment.
    pub fn tempo_at_frame(&self, frame: FramePos, frame_rate: FrameCount) -> f64 {
        if self.is_linear() {
            return self.pulses_per_minute();
        }
        self.pulse_tempo_at_time(frame_to_minute(frame - self.frame, frame_rate))
    }

    /// Session frame where the supplied tempo (pulses per minute) occurs in
    /// this segment. `pulse` is only used for constant segments; a ramped
    /// map may reach a given tempo at multiple positions.
    pub fn frame_at_tempo(&self, ppm: f64, pulse: f64, frame_rate: FrameCount) -> FramePos {
        if self.is_linear() {
            return ((pulse - self.pulse) * self.frames_per_pulse(frame_rate) + 0.5).floor()
                as FramePos
                + self.frame;
        }
        minute_to_frame(self.time_at_pulse_tempo(ppm), frame_rate) + self.frame
    }

    /// Tempo in pulses per minute at a session pulse within this segment.
    pub fn tempo_at_pulse(&self, pulse: f64) -> f64 {
        if self.is_linear() {
            return self.pulses_per_minute();
        }
        self.pulse_tempo_at_pulse(pulse - self.pulse)
    }

    /// Session pulse where the supplied tempo occurs. `frame` is only used
    /// for constant segments.
    pub fn pulse_at_tempo(&self, ppm: f64, frame: FramePos, frame_rate: FrameCount) -> f64 {
        if self.is_linear() {
            return ((frame - self.frame) as f64 / self.frames_per_pulse(frame_rate)) + self.pulse;
        }
        self.pulse_at_pulse_tempo(ppm) + self.pulse
    }

    /// Session pulse at a session frame within this segment.
    pub fn pulse_at_frame(&self, frame: FramePos, frame_rate: FrameCount) -> f64 {
        if self.is_linear() {
            return ((frame - self.frame) as f64 / self.frames_per_pulse(frame_rate)) + self.pulse;
        }
        self.pulse_at_time(frame_to_minute(frame - self.frame, frame_rate)) + self.pulse
    }

    /// Session frame at a session pulse within this segment. Rounds to the
    /// nearest frame at output, which is what makes
    /// frame_at_beat(beat_at_frame(f)) == f hold.
    pub fn frame_at_pulse(&self, pulse: f64, frame_rate: FrameCount) -> FramePos {
        if self.is_linear() {
            return ((pulse - self.pulse) * self.frames_per_pulse(frame_rate) + 0.5).floor()
                as FramePos
                + self.frame;
        }
        minute_to_frame(self.time_at_pulse(pulse - self.pulse), frame_rate) + self.frame
    }

    pub fn frames_per_pulse(&self, frame_rate: FrameCount) -> f64 {
        self.tempo().frames_per_pulse(frame_rate)
    }

    pub fn frames_per_beat(&self, frame_rate: FrameCount) -> f64 {
        self.tempo().frames_per_beat(frame_rate)
    }

    /// Ramp constant from the end tempo and pulse position of a later
    /// section.
    pub(crate) fn compute_c_pulse(&self, end_ppm: f64, end_pulse: f64) -> f64 {
        let log_tempo_ratio = (end_ppm / self.pulses_per_minute()).ln();
        self.pulses_per_minute() * log_tempo_ratio.exp_m1() / (end_pulse - self.pulse)
    }

    /// Ramp constant from the end tempo and frame position of a later
    /// section.
    pub(crate) fn compute_c_frame(
        &self,
        end_ppm: f64,
        end_frame: FramePos,
        frame_rate: FrameCount,
    ) -> f64 {
        (end_ppm / self.pulses_per_minute()).ln()
            / frame_to_minute(end_frame - self.frame, frame_rate)
    }

    /* segment-local primitives: minutes and pulses from the section start */

    /// Tempo in ppm at time in minutes.
    fn pulse_tempo_at_time(&self, time: f64) -> f64 {
        (self.c * time).exp() * self.pulses_per_minute()
    }

    /// Time in minutes at tempo in ppm.
    fn time_at_pulse_tempo(&self, pulse_tempo: f64) -> f64 {
        (pulse_tempo / self.pulses_per_minute()).ln() / self.c
    }

    /// Pulse at tempo in ppm.
    fn pulse_at_pulse_tempo(&self, pulse_tempo: f64) -> f64 {
        (pulse_tempo - self.pulses_per_minute()) / self.c
    }

    /// Tempo in ppm at pulse.
    fn pulse_tempo_at_pulse(&self, pulse: f64) -> f64 {
        (pulse * self.c) + self.pulses_per_minute()
    }

    /// Pulse at time in minutes.
    fn pulse_at_time(&self, time: f64) -> f64 {
        (self.c * time).exp_m1() * (self.pulses_per_minute() / self.c)
    }

    /// Time in minutes at pulse.
    fn time_at_pulse(&self, pulse: f64) -> f64 {
        ((self.c * pulse) / self.pulses_per_minute()).ln_1p() / self.c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::LockStyle;
    use crate::tempo::Tempo;

    const FR: FrameCount = 48_000;

    fn ramp_section(ppm: f64, c: f64) -> TempoSection {
        let mut t = TempoSection::new(
            0.0,
            0,
            Tempo::new(ppm, 1.0),
            CurveKind::Ramp,
            LockStyle::AudioTime,
        );
        t.c = c;
        t
    }

    #[test]
    fn test_c_from_pulse_distance() {
        // 120 -> 180 ppm over 8 pulses: c = (180 - 120) / 8
        let t = ramp_section(120.0, 0.0);
        let c = t.compute_c_pulse(180.0, 8.0);
        assert!((c - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_tempo_along_ramp() {
        let t = ramp_section(120.0, 7.5);
        assert!((t.tempo_at_pulse(4.0) - 150.0).abs() < 1e-12);
        assert!((t.tempo_at_pulse(8.0) - 180.0).abs() < 1e-12);
        // inverse
        assert!((t.pulse_at_pulse_tempo(150.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_frame_pulse_roundtrip_on_ramp() {
        let t = ramp_section(30.0, 2.0);
        for &frame in &[0i64, 12_345, 20 * FR, 60 * FR] {
            let p = t.pulse_at_frame(frame, FR);
            assert_eq!(t.frame_at_pulse(p, FR), frame);
        }
    }

    #[test]
    fn test_constant_degenerates_to_linear() {
        let t = TempoSection::new(
            0.0,
            0,
            Tempo::quarter(120.0),
            CurveKind::Constant,
            LockStyle::AudioTime,
        );
        // 30 pulses/min at 48k: one pulse is 96000 frames
        assert_eq!(t.frame_at_pulse(1.0, FR), 96_000);
        assert!((t.pulse_at_frame(48_000, FR) - 0.5).abs() < 1e-12);
        assert_eq!(t.tempo_at_frame(48_000, FR), 30.0);
    }

    #[test]
    fn test_zero_c_ramp_is_linear() {
        let t = ramp_section(30.0, 0.0);
        assert_eq!(t.frame_at_pulse(1.0, FR), 96_000);
        assert_eq!(t.tempo_at_pulse(5.0), 30.0);
    }

    #[test]
    fn test_c_from_frame_distance() {
        // 77 -> 217 quarters/min over one minute
        let a = TempoSection::new(
            0.0,
            0,
            Tempo::quarter(77.0),
            CurveKind::Ramp,
            LockStyle::AudioTime,
        );
        let c = a.compute_c_frame(217.0 / 4.0, 60 * FR, FR);
        assert!((c - (217.0f64 / 77.0).ln()).abs() < 1e-12);
    }
}
