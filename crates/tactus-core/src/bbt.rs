//! Bar|beat|tick musical positions

use std::fmt;
use std::str::FromStr;

use crate::error::MapError;

/// Ticks per beat. A tick is the smallest addressable musical subdivision.
pub const TICKS_PER_BEAT: f64 = 1920.0;

/// A 1-based (bar, beat, tick) position.
///
/// Bars and beats number from 1, ticks from 0. The textual form is
/// `bars|beats|ticks` (e.g. `4|1|0` for the start of bar 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbtTime {
    pub bars: u32,
    pub beats: u32,
    pub ticks: u32,
}

impl BbtTime {
    /// The session origin, 1|1|0.
    pub const ONSET: Self = Self {
        bars: 1,
        beats: 1,
        ticks: 0,
    };

    pub fn new(bars: u32, beats: u32, ticks: u32) -> Self {
        Self { bars, beats, ticks }
    }

    /// True when this position sits exactly on a bar start.
    pub fn is_bar_start(&self) -> bool {
        self.beats == 1 && self.ticks == 0
    }
}

impl Default for BbtTime {
    fn default() -> Self {
        Self::ONSET
    }
}

impl fmt::Display for BbtTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.bars, self.beats, self.ticks)
    }
}

impl FromStr for BbtTime {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|');
        let mut next = || -> Result<u32, MapError> {
            parts
                .next()
                .ok_or_else(|| MapError::Malformed(format!("bad bbt value \"{s}\"")))?
                .trim()
                .parse::<u32>()
                .map_err(|_| MapError::Malformed(format!("bad bbt value \"{s}\"")))
        };
        let bars = next()?;
        let beats = next()?;
        let ticks = next()?;
        Ok(Self { bars, beats, ticks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let bbt = BbtTime::new(4, 3, 960);
        assert_eq!(bbt.to_string(), "4|3|960");
        assert_eq!("4|3|960".parse::<BbtTime>().unwrap(), bbt);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("4|3".parse::<BbtTime>().is_err());
        assert!("a|b|c".parse::<BbtTime>().is_err());
        assert!("".parse::<BbtTime>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(BbtTime::new(1, 4, 1919) < BbtTime::new(2, 1, 0));
        assert!(BbtTime::new(2, 1, 0) < BbtTime::new(2, 1, 1));
        assert_eq!(BbtTime::ONSET, BbtTime::new(1, 1, 0));
    }

    #[test]
    fn test_bar_start() {
        assert!(BbtTime::ONSET.is_bar_start());
        assert!(!BbtTime::new(2, 3, 0).is_bar_start());
        assert!(!BbtTime::new(2, 1, 1).is_bar_start());
    }
}
