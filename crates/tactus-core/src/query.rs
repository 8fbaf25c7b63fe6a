//! Read-only coordinate translations over the section store
//!
//! Free functions over `&Metrics`; the public `TempoMap` methods wrap these
//! with the map lock. Beat lookups are meter-section based, pulse lookups are
//! tempo-section based, and frame<->beat conversion uses both.
//!
//! Rounding contract: frame_at_beat rounds to audio frames at output only,
//! so frame_at_beat(beat_at_frame(f)) == f. The reverse direction is not
//! exact; quantizing to frames costs up to half a sample. Work in pulses or
//! beats and convert to frames last.

use crate::bbt::{BbtTime, TICKS_PER_BEAT};
use crate::section::{MeterSection, Metrics, TempoSection};
use crate::tempo::Tempo;
use crate::{FrameCount, FramePos};

const NO_TEMPO: &str = "programming error: no tempo section in tempo map";
const NO_METER: &str = "programming error: no meter section in tempo map";

/// Last active tempo section at or before `frame`.
pub(crate) fn tempo_section_at_frame(metrics: &Metrics, frame: FramePos) -> &TempoSection {
    let mut prev: Option<&TempoSection> = None;
    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }
        if prev.is_some() && t.frame > frame {
            break;
        }
        prev = Some(t);
    }
    prev.expect(NO_TEMPO)
}

/// Last tempo section at or before the supplied beat.
pub(crate) fn tempo_section_at_beat(metrics: &Metrics, beat: f64) -> &TempoSection {
    let prev_m = meter_section_at_beat(metrics, beat);
    let mut prev: Option<&TempoSection> = None;
    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }
        if prev.is_some()
            && ((t.pulse - prev_m.pulse) * prev_m.note_divisor()) + prev_m.beat > beat
        {
            break;
        }
        prev = Some(t);
    }
    prev.expect(NO_TEMPO)
}

/// Last meter section at or before `frame`.
pub(crate) fn meter_section_at_frame(metrics: &Metrics, frame: FramePos) -> &MeterSection {
    let mut prev: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if prev.is_some() && m.frame > frame {
            break;
        }
        prev = Some(m);
    }
    prev.expect(NO_METER)
}

/// Last meter section at or before the supplied beat.
pub(crate) fn meter_section_at_beat(metrics: &Metrics, beat: f64) -> &MeterSection {
    let mut prev: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if prev.is_some() && m.beat > beat {
            break;
        }
        prev = Some(m);
    }
    prev.expect(NO_METER)
}

/* tempo-section based */

pub(crate) fn pulse_at_frame(metrics: &Metrics, frame: FramePos, frame_rate: FrameCount) -> f64 {
    let mut prev: Option<&TempoSection> = None;
    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }
        if let Some(p) = prev {
            if t.frame > frame {
                // the previous section contains the frame
                return p.pulse_at_frame(frame, frame_rate);
            }
        }
        prev = Some(t);
    }
    let prev = prev.expect(NO_TEMPO);

    // past the last section: treated as constant
    let pulses_in_section = (frame - prev.frame) as f64 / prev.frames_per_pulse(frame_rate);
    pulses_in_section + prev.pulse
}

pub(crate) fn frame_at_pulse(metrics: &Metrics, pulse: f64, frame_rate: FrameCount) -> FramePos {
    let mut prev: Option<&TempoSection> = None;
    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }
        if let Some(p) = prev {
            if t.pulse > pulse {
                return p.frame_at_pulse(pulse, frame_rate);
            }
        }
        prev = Some(t);
    }
    let prev = prev.expect(NO_TEMPO);

    // past the last section: constant, irrespective of curve kind
    let dtime = (pulse - prev.pulse) * prev.frames_per_pulse(frame_rate);
    (dtime + 0.5).floor() as FramePos + prev.frame
}

/* meter-section based */

pub(crate) fn pulse_at_beat(metrics: &Metrics, beat: f64) -> f64 {
    let prev_m = meter_section_at_beat(metrics, beat);
    prev_m.pulse + ((beat - prev_m.beat) / prev_m.note_divisor())
}

pub(crate) fn beat_at_pulse(metrics: &Metrics, pulse: f64) -> f64 {
    let mut prev: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if let Some(p) = prev {
            if m.pulse > pulse
                && ((pulse - p.pulse) * p.note_divisor()) + p.beat > m.beat
            {
                break;
            }
        }
        prev = Some(m);
    }
    let prev = prev.expect(NO_METER);
    ((pulse - prev.pulse) * prev.note_divisor()) + prev.beat
}

/* frame <-> beat, using both tempo and meter */

/// Beat at `frame`. Negative for frames before the first meter: the beat is
/// obtained from the first meter and the continuation of the tempo curve
/// backwards.
pub(crate) fn beat_at_frame(metrics: &Metrics, frame: FramePos, frame_rate: FrameCount) -> f64 {
    let ts = tempo_section_at_frame(metrics, frame);
    let mut prev_m: Option<&MeterSection> = None;
    let mut next_m: Option<&MeterSection> = None;

    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if prev_m.is_some() && m.frame > frame {
            next_m = Some(m);
            break;
        }
        prev_m = Some(m);
    }
    let prev_m = prev_m.expect(NO_METER);

    let beat = prev_m.beat + (ts.pulse_at_frame(frame, frame_rate) - prev_m.pulse) * prev_m.note_divisor();

    // audio-locked meters fake their beat
    if let Some(next_m) = next_m {
        if next_m.beat < beat {
            return next_m.beat;
        }
    }

    beat
}

pub(crate) fn frame_at_beat(metrics: &Metrics, beat: f64, frame_rate: FrameCount) -> FramePos {
    let mut prev_m: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if prev_m.is_some() && m.beat > beat {
            break;
        }
        prev_m = Some(m);
    }
    let prev_m = prev_m.expect(NO_METER);

    let mut prev_t: Option<&TempoSection> = None;
    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }
        if prev_t.is_some()
            && ((t.pulse - prev_m.pulse) * prev_m.note_divisor()) + prev_m.beat > beat
        {
            break;
        }
        prev_t = Some(t);
    }
    let prev_t = prev_t.expect(NO_TEMPO);

    prev_t.frame_at_pulse(
        ((beat - prev_m.beat) / prev_m.note_divisor()) + prev_m.pulse,
        frame_rate,
    )
}

/* bbt conversions */

/// Convert a 0-based beat count past `prev_m` into a 1-based bar|beat|tick,
/// carrying tick overflow into beats and beat overflow into bars.
fn bbt_from_meter_beats(prev_m: &MeterSection, beats_in_ms: f64) -> BbtTime {
    let bars_in_ms = (beats_in_ms / prev_m.divisions_per_bar()).floor() as u32;
    let total_bars = bars_in_ms + (prev_m.bbt.bars - 1);
    let remaining_beats = beats_in_ms - (bars_in_ms as f64 * prev_m.divisions_per_bar());
    let remaining_ticks = (remaining_beats - remaining_beats.floor()) * TICKS_PER_BEAT;

    let mut ret = BbtTime {
        bars: total_bars,
        beats: remaining_beats.floor() as u32,
        ticks: (remaining_ticks + 0.5).floor() as u32,
    };

    // 0|0|0 to 1|1|0 based mapping
    ret.bars += 1;
    ret.beats += 1;

    if ret.ticks as f64 >= TICKS_PER_BEAT {
        ret.beats += 1;
        ret.ticks -= TICKS_PER_BEAT as u32;
    }

    if ret.beats as f64 >= prev_m.divisions_per_bar() + 1.0 {
        ret.bars += 1;
        ret.beats = 1;
    }

    ret
}

pub(crate) fn beat_at_bbt(metrics: &Metrics, bbt: BbtTime) -> f64 {
    // audio-locked meters have 'fake' integral beats, so there is no pulse
    // offset here
    let mut prev_m: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if let Some(p) = prev_m {
            let bars_to_m = (m.beat - p.beat) / p.divisions_per_bar();
            if bars_to_m + (p.bbt.bars as f64 - 1.0) > (bbt.bars as f64 - 1.0) {
                break;
            }
        }
        prev_m = Some(m);
    }
    let prev_m = prev_m.expect(NO_METER);

    let remaining_bars = bbt.bars as f64 - prev_m.bbt.bars as f64;
    let remaining_bars_in_beats = remaining_bars * prev_m.divisions_per_bar();
    remaining_bars_in_beats
        + prev_m.beat
        + (bbt.beats as f64 - 1.0)
        + (bbt.ticks as f64 / TICKS_PER_BEAT)
}

pub(crate) fn bbt_at_beat(metrics: &Metrics, beat: f64) -> BbtTime {
    let beats = beat.max(0.0);
    let prev_m = meter_section_at_beat(metrics, beats);
    bbt_from_meter_beats(prev_m, beats - prev_m.beat)
}

pub(crate) fn pulse_at_bbt(metrics: &Metrics, bbt: BbtTime) -> f64 {
    let mut prev_m: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if prev_m.is_some() && m.bbt.bars > bbt.bars {
            break;
        }
        prev_m = Some(m);
    }
    let prev_m = prev_m.expect(NO_METER);

    let remaining_bars = bbt.bars as f64 - prev_m.bbt.bars as f64;
    let remaining_pulses = remaining_bars * prev_m.divisions_per_bar() / prev_m.note_divisor();
    remaining_pulses
        + prev_m.pulse
        + (((bbt.beats as f64 - 1.0) + (bbt.ticks as f64 / TICKS_PER_BEAT))
            / prev_m.note_divisor())
}

pub(crate) fn bbt_at_pulse(metrics: &Metrics, pulse: f64) -> BbtTime {
    let mut prev_m: Option<&MeterSection> = None;
    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if let Some(p) = prev_m {
            let pulses_to_m = m.pulse - p.pulse;
            if p.pulse + pulses_to_m > pulse {
                break;
            }
        }
        prev_m = Some(m);
    }
    let prev_m = prev_m.expect(NO_METER);

    bbt_from_meter_beats(prev_m, (pulse - prev_m.pulse) * prev_m.note_divisor())
}

pub(crate) fn bbt_at_frame(metrics: &Metrics, frame: FramePos, frame_rate: FrameCount) -> BbtTime {
    if frame < 0 {
        return BbtTime::ONSET;
    }

    let ts = tempo_section_at_frame(metrics, frame);
    let mut prev_m: Option<&MeterSection> = None;
    let mut next_m: Option<&MeterSection> = None;

    for section in metrics {
        let Some(m) = section.as_meter() else { continue };
        if prev_m.is_some() && m.frame > frame {
            next_m = Some(m);
            break;
        }
        prev_m = Some(m);
    }
    let prev_m = prev_m.expect(NO_METER);

    let mut beat = prev_m.beat + (ts.pulse_at_frame(frame, frame_rate) - prev_m.pulse) * prev_m.note_divisor();

    // frame before the first meter
    if frame < prev_m.frame {
        beat = 0.0;
    }
    // audio-locked meters fake their beat
    if let Some(next_m) = next_m {
        if next_m.beat < beat {
            beat = next_m.beat;
        }
    }
    beat = beat.max(0.0);

    bbt_from_meter_beats(prev_m, beat - prev_m.beat)
}

pub(crate) fn frame_at_bbt(metrics: &Metrics, bbt: BbtTime, frame_rate: FrameCount) -> FramePos {
    frame_at_beat(metrics, beat_at_bbt(metrics, bbt), frame_rate)
}

/* tempo queries */

/// Tempo in effect at `frame`, ramp-aware.
pub(crate) fn tempo_at_frame(metrics: &Metrics, frame: FramePos, frame_rate: FrameCount) -> Tempo {
    let mut prev: Option<&TempoSection> = None;
    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }
        if let Some(p) = prev {
            if t.frame > frame {
                // t is the section past frame
                let bpm = p.tempo_at_frame(frame, frame_rate) * p.note_type();
                return Tempo::new(bpm, p.note_type());
            }
        }
        prev = Some(t);
    }
    let prev = prev.expect(NO_TEMPO);
    Tempo::new(prev.beats_per_minute(), prev.note_type())
}

/// Frame at which the supplied tempo first occurs, or the frame of the last
/// tempo section when the search is exhausted.
pub(crate) fn frame_at_tempo(metrics: &Metrics, tempo: Tempo, frame_rate: FrameCount) -> FramePos {
    let tempo_ppm = tempo.pulses_per_minute();
    let mut prev: Option<&TempoSection> = None;

    for section in metrics {
        let Some(t) = section.as_tempo() else { continue };
        if !t.active {
            continue;
        }

        let t_ppm = t.pulses_per_minute();
        if t_ppm == tempo_ppm {
            return t.frame;
        }

        if let Some(p) = prev {
            let prev_ppm = p.pulses_per_minute();
            if (t_ppm > tempo_ppm && prev_ppm < tempo_ppm)
                || (t_ppm < tempo_ppm && prev_ppm > tempo_ppm)
            {
                return p.frame_at_tempo(tempo_ppm, p.pulse, frame_rate);
            }
        }
        prev = Some(t);
    }

    prev.expect(NO_TEMPO).frame
}

/// Tempo at the supplied beat. More precise than
/// tempo_at_frame(frame_at_beat(b)): no intermediate frame rounding.
pub(crate) fn tempo_at_beat(metrics: &Metrics, beat: f64) -> Tempo {
    let prev_m = meter_section_at_beat(metrics, beat);
    let prev_t = tempo_section_at_beat(metrics, beat);
    let note_type = prev_t.note_type();

    let pulse = ((beat - prev_m.beat) / prev_m.note_divisor()) + prev_m.pulse;
    Tempo::new(prev_t.tempo_at_pulse(pulse) * note_type, note_type)
}

/* grid-exact beats */

/// The beat closest to `frame`, quantized to `sub_num` subdivisions of a
/// beat (1 = whole beats, -1 = bars, 0 = no quantization). May be negative
/// for frames before the first meter.
pub(crate) fn exact_beat_at_frame(
    metrics: &Metrics,
    frame: FramePos,
    sub_num: i32,
    frame_rate: FrameCount,
) -> f64 {
    let mut beat = beat_at_frame(metrics, frame, frame_rate);

    if sub_num > 1 {
        beat = beat.floor()
            + (((beat - beat.floor()) * sub_num as f64) + 0.5).floor() / sub_num as f64;
    } else if sub_num == 1 {
        // snap to beat
        beat = (beat + 0.5).floor();
    } else if sub_num == -1 {
        // snap to bar
        let mut bbt = bbt_at_beat(metrics, beat);
        bbt.beats = 1;
        bbt.ticks = 0;

        let prev_b = beat_at_bbt(metrics, bbt);
        bbt.bars += 1;
        let next_b = beat_at_bbt(metrics, bbt);

        if (beat - prev_b) > (next_b - prev_b) / 2.0 {
            beat = next_b;
        } else {
            beat = prev_b;
        }
    }

    beat
}
