//! Persisted map state
//!
//! A `MapState` is the structured export of the section list: a sequence of
//! tagged tempo/meter entries with hyphenated attribute names, yes/no
//! booleans and `bars|beats|ticks` strings. serde always formats floats
//! with a `.` decimal separator, so the persisted numbers are
//! locale-independent by construction.
//!
//! Two legacy shapes are accepted on load: a `start` bbt attribute standing
//! in for `pulse` (translated after load from the reconstructed meter
//! sequence), and `beats-per-bar` as an alias of `divisions-per-bar`.

use serde::{Deserialize, Serialize};

use crate::bbt::{BbtTime, TICKS_PER_BEAT};
use crate::error::{MapError, MapResult};
use crate::map::TempoMap;
use crate::section::{
    sort_by_pulse, CurveKind, LockStyle, MeterSection, MetricSection, Metrics, TempoSection,
};
use crate::solver;
use crate::tempo::{Meter, Tempo};

/// Serialized form of the whole map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MapState {
    pub sections: Vec<SectionState>,
}

/// One serialized section entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SectionState {
    Tempo(TempoState),
    Meter(MeterState),
}

fn default_note_type() -> f64 {
    4.0
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoState {
    /// Legacy bbt position; sessions that carry it get a sentinel pulse and
    /// are translated after load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<f64>,
    #[serde(default)]
    pub frame: i64,
    #[serde(rename = "beats-per-minute")]
    pub beats_per_minute: f64,
    /// Older sessions omit this; quarter notes assumed.
    #[serde(rename = "note-type", default = "default_note_type")]
    pub note_type: f64,
    #[serde(with = "yes_no")]
    pub movable: bool,
    #[serde(with = "yes_no", default = "yes")]
    pub active: bool,
    #[serde(rename = "tempo-type", default)]
    pub tempo_type: CurveKind,
    #[serde(rename = "lock-style", default, skip_serializing_if = "Option::is_none")]
    pub lock_style: Option<LockStyle>,
    #[serde(rename = "locked-to-meter", with = "yes_no", default)]
    pub locked_to_meter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterState {
    /// Legacy bbt position, doubling as the meter's bbt when none is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbt: Option<String>,
    #[serde(default)]
    pub beat: f64,
    #[serde(rename = "note-type")]
    pub note_type: f64,
    #[serde(default)]
    pub frame: i64,
    #[serde(rename = "lock-style", default, skip_serializing_if = "Option::is_none")]
    pub lock_style: Option<LockStyle>,
    #[serde(rename = "divisions-per-bar", alias = "beats-per-bar")]
    pub divisions_per_bar: f64,
    #[serde(with = "yes_no")]
    pub movable: bool,
}

mod yes_no {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "yes" } else { "no" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "yes" | "y" | "1" | "true" => Ok(true),
            "no" | "n" | "0" | "false" => Ok(false),
            other => Err(de::Error::custom(format!(
                "expected yes/no, got \"{other}\""
            ))),
        }
    }
}

fn tempo_from_state(ts: &TempoState) -> MapResult<TempoSection> {
    // a parseable legacy start marks the section for post-load translation
    let legacy: Option<BbtTime> = ts.start.as_deref().and_then(|s| s.parse().ok());
    let pulse = ts
        .pulse
        .or(legacy.map(|_| -1.0))
        .ok_or(MapError::MissingAttribute("pulse"))?;

    if ts.beats_per_minute <= 0.0 {
        return Err(MapError::Malformed(format!(
            "illegal beats-per-minute {}",
            ts.beats_per_minute
        )));
    }
    if ts.note_type < 1.0 {
        return Err(MapError::Malformed(format!(
            "illegal note-type {}",
            ts.note_type
        )));
    }

    let lock_style = ts.lock_style.unwrap_or(if ts.movable {
        LockStyle::MusicTime
    } else {
        LockStyle::AudioTime
    });

    let mut t = TempoSection::new(
        pulse,
        ts.frame,
        Tempo::new(ts.beats_per_minute, ts.note_type),
        ts.tempo_type,
        lock_style,
    );
    t.movable = ts.movable;
    t.active = ts.active;
    t.locked_to_meter = ts.locked_to_meter;
    t.legacy_bbt = legacy;
    Ok(t)
}

fn meter_from_state(ms: &MeterState) -> MapResult<MeterSection> {
    let legacy: Option<BbtTime> = ms.start.as_deref().and_then(|s| s.parse().ok());
    let pulse = ms
        .pulse
        .or(legacy.map(|_| -1.0))
        .ok_or(MapError::MissingAttribute("pulse"))?;

    let bbt = match ms.bbt.as_deref() {
        Some(s) => s.parse::<BbtTime>()?,
        None => legacy.ok_or(MapError::MissingAttribute("bbt"))?,
    };

    if ms.divisions_per_bar <= 0.0 {
        return Err(MapError::Malformed(format!(
            "illegal divisions-per-bar {}",
            ms.divisions_per_bar
        )));
    }
    if ms.note_type <= 0.0 {
        return Err(MapError::Malformed(format!(
            "illegal note-type {}",
            ms.note_type
        )));
    }

    let lock_style = ms.lock_style.unwrap_or(if ms.movable {
        LockStyle::MusicTime
    } else {
        LockStyle::AudioTime
    });

    let mut m = MeterSection::new(
        pulse,
        ms.frame,
        ms.beat,
        bbt,
        Meter::new(ms.divisions_per_bar, ms.note_type),
        lock_style,
    );
    m.movable = ms.movable;
    Ok(m)
}

fn build_metrics(state: &MapState) -> MapResult<Metrics> {
    let mut metrics = Metrics::with_capacity(state.sections.len());
    for section in &state.sections {
        match section {
            SectionState::Tempo(ts) => {
                metrics.push(MetricSection::Tempo(tempo_from_state(ts)?));
            }
            SectionState::Meter(ms) => {
                metrics.push(MetricSection::Meter(meter_from_state(ms)?));
            }
        }
    }
    Ok(metrics)
}

/// Translate sections whose musical position was stored as bbt: rebuild
/// beat and pulse from the bbt via the preceding meter's divisions and note
/// divisor.
fn fix_legacy(metrics: &mut Metrics) {
    let mut prev_m: Option<MeterSection> = None;
    let mut prev_t_seen = false;

    for i in 0..metrics.len() {
        match &mut metrics[i] {
            MetricSection::Meter(m) => {
                if !m.movable {
                    m.beat = 0.0;
                    m.bbt = BbtTime::ONSET;
                    m.pulse = 0.0;
                    m.frame = 0;
                    m.lock_style = LockStyle::AudioTime;
                } else if let Some(pm) = &prev_m {
                    let beat = (m.bbt.bars as f64 - 1.0) * pm.divisions_per_bar()
                        + (m.bbt.beats as f64 - 1.0)
                        + m.bbt.ticks as f64 / TICKS_PER_BEAT;
                    m.beat = beat;
                    m.pulse = beat / pm.note_divisor();
                }
                prev_m = Some(m.clone());
            }
            MetricSection::Tempo(t) => {
                if !t.active {
                    continue;
                }
                if !t.movable {
                    t.pulse = 0.0;
                    t.frame = 0;
                    t.lock_style = LockStyle::AudioTime;
                    prev_t_seen = true;
                    continue;
                }
                if prev_t_seen {
                    if let Some(lb) = t.legacy_bbt {
                        let (dpb, nd) = prev_m
                            .as_ref()
                            .map(|m| (m.divisions_per_bar(), m.note_divisor()))
                            .unwrap_or((4.0, 4.0));
                        let beat = (lb.bars as f64 - 1.0) * dpb
                            + (lb.beats as f64 - 1.0)
                            + lb.ticks as f64 / TICKS_PER_BEAT;
                        t.pulse = beat / nd;
                    }
                }
                prev_t_seen = true;
            }
        }
    }
}

/// Two sections of the same kind may not share a pulse.
fn check_duplicates(metrics: &Metrics) -> MapResult<()> {
    for w in metrics.windows(2) {
        match (&w[0], &w[1]) {
            (MetricSection::Meter(a), MetricSection::Meter(b)) if a.pulse() == b.pulse() => {
                return Err(MapError::DuplicatePulse {
                    kind: "meter",
                    pulse: a.pulse(),
                });
            }
            (MetricSection::Tempo(a), MetricSection::Tempo(b)) if a.pulse() == b.pulse() => {
                return Err(MapError::DuplicatePulse {
                    kind: "tempo",
                    pulse: a.pulse(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

impl TempoMap {
    /// Structured export of the section list.
    pub fn state(&self) -> MapState {
        let metrics = self.metrics.read();
        MapState {
            sections: metrics
                .iter()
                .map(|s| match s {
                    MetricSection::Tempo(t) => SectionState::Tempo(TempoState {
                        start: None,
                        pulse: Some(t.pulse()),
                        frame: t.frame(),
                        beats_per_minute: t.beats_per_minute(),
                        note_type: t.note_type(),
                        movable: t.movable(),
                        active: t.active(),
                        tempo_type: t.kind(),
                        lock_style: Some(t.lock_style()),
                        locked_to_meter: t.locked_to_meter(),
                    }),
                    MetricSection::Meter(m) => SectionState::Meter(MeterState {
                        start: None,
                        pulse: Some(m.pulse()),
                        bbt: Some(m.bbt().to_string()),
                        beat: m.beat(),
                        note_type: m.note_divisor(),
                        frame: m.frame(),
                        lock_style: Some(m.lock_style()),
                        divisions_per_bar: m.divisions_per_bar(),
                        movable: m.movable(),
                    }),
                })
                .collect(),
        }
    }

    /// Replace the section list wholesale from a persisted state. On any
    /// validation failure the previous list is retained untouched.
    pub fn set_state(&self, state: &MapState) -> MapResult<()> {
        {
            let mut metrics = self.metrics.write();

            let mut fresh = build_metrics(state)?;
            sort_by_pulse(&mut fresh);

            let is_legacy = fresh.iter().any(|s| {
                s.as_tempo().is_some_and(|t| t.legacy_bbt.is_some()) || s.pulse() < 0.0
            });
            if is_legacy {
                log::info!("legacy session detected; translating bbt-based section positions");
                fix_legacy(&mut fresh);
                sort_by_pulse(&mut fresh);
            }

            check_duplicates(&fresh)?;

            solver::recompute_map(&mut fresh, self.frame_rate);
            *metrics = fresh;
        }
        self.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameCount;

    const FR: FrameCount = 48_000;

    #[test]
    fn test_state_roundtrip_via_json() {
        let map = TempoMap::new(FR);
        map.replace_tempo(
            map.first_tempo().id(),
            Tempo::quarter(120.0),
            0.0,
            0,
            CurveKind::Constant,
            LockStyle::AudioTime,
        )
        .unwrap();
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

        let state = map.state();
        let json = serde_json::to_string_pretty(&state).unwrap();
        let parsed: MapState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);

        let reloaded = TempoMap::new(FR);
        reloaded.set_state(&parsed).unwrap();
        assert_eq!(reloaded.state(), state);
        assert_eq!(reloaded.frame_at_beat(14.0), 312_000);
    }

    #[test]
    fn test_attribute_names_and_yes_no() {
        let map = TempoMap::new(FR);
        let json = serde_json::to_string(&map.state()).unwrap();
        assert!(json.contains("\"beats-per-minute\":120.0"));
        assert!(json.contains("\"divisions-per-bar\":4.0"));
        assert!(json.contains("\"movable\":\"no\""));
        assert!(json.contains("\"tempo-type\":\"Ramp\""));
        assert!(json.contains("\"lock-style\":\"AudioTime\""));
        assert!(json.contains("\"bbt\":\"1|1|0\""));
    }

    #[test]
    fn test_legacy_start_and_beats_per_bar() {
        // a fully legacy session: bbt `start` attributes, no pulses, the
        // old beats-per-bar spelling, no frames on the musical sections
        let json = r#"{
            "sections": [
                { "kind": "Tempo", "start": "1|1|0", "beats-per-minute": 120.0,
                  "tempo-type": "Constant", "movable": "no" },
                { "kind": "Meter", "start": "1|1|0", "note-type": 4.0,
                  "beats-per-bar": 4.0, "movable": "no" },
                { "kind": "Tempo", "start": "3|1|0",
                  "beats-per-minute": 240.0, "movable": "yes" }
            ]
        }"#;
        let state: MapState = serde_json::from_str(json).unwrap();

        let map = TempoMap::new(FR);
        map.set_state(&state).unwrap();

        // bar 3 in 4/4 is beat 8, pulse 2
        let sections = map.sections();
        let legacy_tempo = sections
            .iter()
            .filter_map(|s| s.as_tempo())
            .find(|t| t.movable())
            .unwrap();
        assert_eq!(legacy_tempo.pulse(), 2.0);
        assert_eq!(legacy_tempo.beats_per_minute(), 240.0);
        // two pulses at constant 120 quarters/min
        assert_eq!(legacy_tempo.frame(), 192_000);
        // missing note-type defaults to quarter
        assert_eq!(legacy_tempo.note_type(), 4.0);
        // missing lock-style on a movable section defaults to music time
        assert_eq!(legacy_tempo.lock_style(), LockStyle::MusicTime);

        let meter = sections.iter().filter_map(|s| s.as_meter()).next().unwrap();
        assert_eq!(meter.divisions_per_bar(), 4.0);
        assert_eq!(meter.bbt(), BbtTime::ONSET);
    }

    #[test]
    fn test_duplicate_pulse_rejected_and_prior_state_kept() {
        let map = TempoMap::new(FR);
        map.change_initial_tempo(90.0, 4.0).unwrap();
        let before = map.state();

        let mut bad = before.clone();
        if let Some(SectionState::Tempo(t)) = bad.sections.first().cloned() {
            let mut dup = t;
            dup.movable = true;
            // equal pulses sort stably, so the twin stays adjacent
            bad.sections.insert(1, SectionState::Tempo(dup));
        }

        assert!(matches!(
            map.set_state(&bad),
            Err(MapError::DuplicatePulse { kind: "tempo", .. })
        ));
        assert_eq!(map.state(), before);
    }

    #[test]
    fn test_missing_pulse_rejected() {
        let json = r#"{
            "sections": [
                { "kind": "Tempo", "frame": 0, "beats-per-minute": 120.0,
                  "movable": "no" }
            ]
        }"#;
        let state: MapState = serde_json::from_str(json).unwrap();
        let map = TempoMap::new(FR);
        assert!(matches!(
            map.set_state(&state),
            Err(MapError::MissingAttribute("pulse"))
        ));
    }

    #[test]
    fn test_missing_mandatory_attribute_fails_parse() {
        // no beats-per-minute at all
        let json = r#"{
            "sections": [
                { "kind": "Tempo", "pulse": 0.0, "frame": 0, "movable": "no" }
            ]
        }"#;
        assert!(serde_json::from_str::<MapState>(json).is_err());
    }

    #[test]
    fn test_illegal_values_rejected() {
        let map = TempoMap::new(FR);
        let mut state = map.state();
        if let Some(SectionState::Tempo(t)) = state.sections.first_mut() {
            t.beats_per_minute = -10.0;
        }
        assert!(matches!(
            map.set_state(&state),
            Err(MapError::Malformed(_))
        ));
    }
}
