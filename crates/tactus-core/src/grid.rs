//! Rounding, snapping and grid enumeration

use crate::bbt::TICKS_PER_BEAT;
use crate::map::TempoMap;
use crate::query;
use crate::tempo::{Meter, Tempo};
use crate::FramePos;

/// Rounding direction. The `Maybe` forms stay put when the position is
/// already on the boundary; the `Always` forms step past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDir {
    DownAlways,
    DownMaybe,
    Nearest,
    UpMaybe,
    UpAlways,
}

impl RoundDir {
    fn is_down(self) -> bool {
        matches!(self, Self::DownAlways | Self::DownMaybe)
    }

    fn is_up(self) -> bool {
        matches!(self, Self::UpAlways | Self::UpMaybe)
    }
}

/// Boundary kind for [`TempoMap::round_to_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapTarget {
    Bar,
    Beat,
}

/// One integer beat of the rendered grid, tagged with the meter and tempo in
/// effect and the current ramp constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BbtPoint {
    pub meter: Meter,
    pub tempo: Tempo,
    pub frame: FramePos,
    pub bar: u32,
    pub beat: u32,
    pub c: f64,
}

impl BbtPoint {
    pub fn is_bar(&self) -> bool {
        self.beat == 1
    }
}

impl TempoMap {
    pub fn round_to_bar(&self, frame: FramePos, dir: RoundDir) -> FramePos {
        self.round_to_type(frame, dir, SnapTarget::Bar)
    }

    pub fn round_to_beat(&self, frame: FramePos, dir: RoundDir) -> FramePos {
        self.round_to_type(frame, dir, SnapTarget::Beat)
    }

    /// Frame of the bar or beat boundary at or around `frame`.
    pub fn round_to_type(&self, frame: FramePos, dir: RoundDir, target: SnapTarget) -> FramePos {
        let metrics = self.metrics.read();
        let fr = self.frame_rate;

        let beat_at_framepos = query::beat_at_frame(&metrics, frame, fr).max(0.0);
        let mut bbt = query::bbt_at_beat(&metrics, beat_at_framepos);

        match target {
            SnapTarget::Bar => {
                if dir.is_down() {
                    bbt.beats = 1;
                    bbt.ticks = 0;
                    query::frame_at_bbt(&metrics, bbt, fr)
                } else if dir.is_up() {
                    bbt.bars += 1;
                    bbt.beats = 1;
                    bbt.ticks = 0;
                    query::frame_at_bbt(&metrics, bbt, fr)
                } else {
                    let raw_ft = query::frame_at_bbt(&metrics, bbt, fr);
                    bbt.beats = 1;
                    bbt.ticks = 0;
                    let prev_ft = query::frame_at_bbt(&metrics, bbt, fr);
                    bbt.bars += 1;
                    let next_ft = query::frame_at_bbt(&metrics, bbt, fr);
                    if (raw_ft - prev_ft) > (next_ft - prev_ft) / 2 {
                        next_ft
                    } else {
                        prev_ft
                    }
                }
            }
            SnapTarget::Beat => {
                if dir.is_down() {
                    query::frame_at_beat(&metrics, beat_at_framepos.floor(), fr)
                } else if dir.is_up() {
                    query::frame_at_beat(&metrics, beat_at_framepos.ceil(), fr)
                } else {
                    query::frame_at_beat(&metrics, (beat_at_framepos + 0.5).floor(), fr)
                }
            }
        }
    }

    /// Quantize `frame` to `sub_num` subdivisions of a beat, carrying
    /// across beat boundaries.
    pub fn round_to_beat_subdivision(
        &self,
        frame: FramePos,
        sub_num: i32,
        dir: RoundDir,
    ) -> FramePos {
        let metrics = self.metrics.read();
        let fr = self.frame_rate;
        let tpb = TICKS_PER_BEAT as i64;

        let mut ticks =
            (query::beat_at_frame(&metrics, frame, fr).max(0.0) * TICKS_PER_BEAT).floor() as i64;
        let mut beats = ticks / tpb;
        let ticks_one_subdivisions_worth = tpb / sub_num as i64;

        ticks -= beats * tpb;

        if dir.is_up() {
            // round to next (or same iff dir == UpMaybe)
            let rem = ticks % ticks_one_subdivisions_worth;

            if rem == 0 && dir == RoundDir::UpMaybe {
                // right on the subdivision, which is fine
            } else if rem == 0 {
                ticks += ticks_one_subdivisions_worth;
            } else {
                ticks += ticks_one_subdivisions_worth - rem;
            }

            if ticks >= tpb {
                ticks -= tpb;
            }
        } else if dir.is_down() {
            // round to previous (or same iff dir == DownMaybe)
            let mut difference = ticks % ticks_one_subdivisions_worth;

            if difference == 0 && dir == RoundDir::DownAlways {
                difference = ticks_one_subdivisions_worth;
            }

            if ticks < difference {
                ticks = tpb - ticks;
            } else {
                ticks -= difference;
            }
        } else {
            // round to nearest
            let rem = ticks % ticks_one_subdivisions_worth;
            if rem > ticks_one_subdivisions_worth / 2 {
                // closer to the next subdivision
                ticks += ticks_one_subdivisions_worth - rem;
                if ticks > tpb {
                    beats += 1;
                    ticks -= tpb;
                }
            } else if rem > 0 {
                // closer to the previous subdivision
                if rem > ticks {
                    if beats == 0 {
                        // can't go backwards past zero
                        return 0;
                    }
                    beats -= 1;
                    ticks = tpb - rem;
                } else {
                    ticks -= rem;
                }
            }
        }

        query::frame_at_beat(&metrics, beats as f64 + ticks as f64 / TICKS_PER_BEAT, fr)
    }

    /// Every integer beat in [lower, upper), tagged for the renderer.
    pub fn get_grid(&self, lower: FramePos, upper: FramePos) -> Vec<BbtPoint> {
        let metrics = self.metrics.read();
        let fr = self.frame_rate;
        let mut points = Vec::new();

        // the map handles negative beats, bbt doesn't
        let mut cnt = query::beat_at_frame(&metrics, lower, fr).ceil().max(0.0);

        if query::frame_at_beat(&metrics, cnt, fr) >= upper {
            return points;
        }

        let mut pos: FramePos = 0;
        while pos < upper {
            pos = query::frame_at_beat(&metrics, cnt, fr);
            let tempo_section = query::tempo_section_at_frame(&metrics, pos);
            let meter_section = query::meter_section_at_frame(&metrics, pos);
            let bbt = query::bbt_at_beat(&metrics, cnt);

            points.push(BbtPoint {
                meter: meter_section.meter(),
                tempo: query::tempo_at_frame(&metrics, pos, fr),
                frame: pos,
                bar: bbt.bars,
                beat: bbt.beats,
                c: tempo_section.c(),
            });
            cnt += 1.0;
        }

        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameCount;

    const FR: FrameCount = 48_000;

    #[test]
    fn test_round_to_beat() {
        let map = TempoMap::new(FR);
        // 120 quarters/min: beats every 24000 frames
        assert_eq!(map.round_to_beat(30_000, RoundDir::Nearest), 24_000);
        assert_eq!(map.round_to_beat(30_000, RoundDir::DownAlways), 24_000);
        assert_eq!(map.round_to_beat(30_000, RoundDir::UpAlways), 48_000);
        assert_eq!(map.round_to_beat(24_000, RoundDir::Nearest), 24_000);
    }

    #[test]
    fn test_round_to_bar() {
        let map = TempoMap::new(FR);
        // bars every 96000 frames
        assert_eq!(map.round_to_bar(50_000, RoundDir::Nearest), 96_000);
        assert_eq!(map.round_to_bar(40_000, RoundDir::Nearest), 0);
        assert_eq!(map.round_to_bar(50_000, RoundDir::DownAlways), 0);
        assert_eq!(map.round_to_bar(50_000, RoundDir::UpAlways), 96_000);
    }

    #[test]
    fn test_round_to_beat_subdivision() {
        let map = TempoMap::new(FR);
        // eighth notes at 120: every 12000 frames
        assert_eq!(
            map.round_to_beat_subdivision(13_000, 2, RoundDir::Nearest),
            12_000
        );
        assert_eq!(
            map.round_to_beat_subdivision(11_000, 2, RoundDir::Nearest),
            12_000
        );
        // on the boundary: Maybe stays, Always steps
        assert_eq!(
            map.round_to_beat_subdivision(12_000, 2, RoundDir::UpMaybe),
            12_000
        );
    }

    #[test]
    fn test_exact_beat_at_frame() {
        let map = TempoMap::new(FR);
        assert_eq!(map.exact_beat_at_frame(25_000, 1), 1.0);
        assert_eq!(map.exact_beat_at_frame(13_000, 2), 0.5);
        // snap to bar: past the midpoint of bar 1 goes to bar 2
        assert_eq!(map.exact_beat_at_frame(70_000, -1), 4.0);
        assert_eq!(map.exact_beat_at_frame(30_000, -1), 0.0);
    }

    #[test]
    fn test_get_grid_constant_tempo() {
        let map = TempoMap::new(FR);
        let points = map.get_grid(0, 96_000);
        // beats 0..4, the last one landing on the upper bound
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].frame, 0);
        assert_eq!(points[0].bar, 1);
        assert_eq!(points[0].beat, 1);
        assert!(points[0].is_bar());
        assert_eq!(points[1].frame, 24_000);
        assert_eq!(points[1].beat, 2);
        assert_eq!(points[4].frame, 96_000);
        assert_eq!(points[4].bar, 2);
        assert!(points.iter().all(|p| p.tempo.beats_per_minute() == 120.0));
        assert!(points.iter().all(|p| p.c == 0.0));
    }

    #[test]
    fn test_get_grid_empty_range() {
        let map = TempoMap::new(FR);
        assert!(map.get_grid(1_000, 10_000).is_empty());
    }
}
