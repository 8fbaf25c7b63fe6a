//! Error types for the tempo map

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum MapError {
    #[error("malformed section state: {0}")]
    Malformed(String),

    #[error("section state is missing mandatory attribute \"{0}\"")]
    MissingAttribute(&'static str),

    #[error("duplicate {kind} section at pulse {pulse}")]
    DuplicatePulse { kind: &'static str, pulse: f64 },

    #[error("section is not in the map")]
    UnknownSection,

    #[error("section is not movable")]
    Immovable,

    #[error("cannot place a tempo at or before the first meter")]
    BeforeFirstMeter,

    #[error("no tempo map solution for the requested section layout")]
    Unsolvable,

    #[error("tempo {0} is out of range")]
    TempoOutOfRange(f64),

    #[error("tempo map is locked by a writer")]
    WouldBlock,
}

/// Result type alias
pub type MapResult<T> = Result<T, MapError>;
