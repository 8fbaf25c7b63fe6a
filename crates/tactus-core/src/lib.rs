//! tactus-core: the Tactus time-keeping engine
//!
//! A tempo map that maintains the bijection between the three coordinate
//! systems of a session timeline:
//! - Audio time: integer sample index at a fixed sample rate
//! - Pulse time: whole-note pulses from the session origin (continuous)
//! - Musical time: meter-dependent beats and bar|beat|tick positions
//!
//! The map is an ordered sequence of tempo sections (constant or
//! exponentially ramped curve segments) and meter sections, each anchored to
//! either audio or musical time. Whenever a section is added, moved or
//! altered, the solver recomputes the unanchored coordinate of every section
//! and either commits a self-consistent map or rejects the mutation,
//! leaving the previous state intact.

mod bbt;
mod curve;
mod edit;
mod error;
mod grid;
mod map;
mod query;
mod section;
mod solver;
mod state;
mod tempo;

pub use bbt::*;
pub use error::*;
pub use grid::*;
pub use map::*;
pub use section::*;
pub use state::*;
pub use tempo::*;

/// Audio-time position in samples, relative to the session origin.
///
/// Negative values arise transiently in position arithmetic (e.g. walking
/// beats backwards across the origin) and are accepted by the queries.
pub type FramePos = i64;

/// A count of audio samples, or a sample rate in samples per second.
pub type FrameCount = i64;
