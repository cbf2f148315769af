//! Keyboard hand separation.
//!
//! Takes one undifferentiated stream of keyboard notes and labels every
//! note `left` or `right`, reconstructing a two-track keyboard score.
//!
//! The pipeline runs per piece: estimate a split point from the pitch
//! distribution, group near-simultaneous notes into chords, then walk the
//! groups in time order, scoring ambiguous notes against a decaying
//! per-hand history of recent notes.
//!
//! ```
//! use hand_separation::{ChordTiming, Hand, HandConfig, HandSeparator, TimedNote};
//!
//! let notes = vec![
//!     TimedNote::new(0, 480, 48, 90, 0).unwrap(),
//!     TimedNote::new(0, 480, 76, 90, 0).unwrap(),
//! ];
//! let separator = HandSeparator::new(HandConfig::default()).unwrap();
//! let hands = separator.assign(&notes, ChordTiming::default());
//! assert_eq!(hands.labels(), &[Hand::Left, Hand::Right]);
//! ```

pub mod chord;
pub mod config;
pub mod extract;
pub mod midi_writer;
pub mod note;
pub mod scorer;
pub mod separate;
pub mod split_point;
pub mod stream;

pub use chord::{group_chords, ChordGroup, ChordTiming};
pub use config::HandConfig;
pub use extract::{
    extract_notes, parse_midi, KeySignature, MidiFileContext, RetriggerPolicy, TempoChange,
    TimeSignature,
};
pub use midi_writer::{hands_to_midi, ExportOptions};
pub use note::{Hand, HandStats, SeparatedHand, TimedNote};
pub use scorer::{Candidate, HandScorer, Resolution};
pub use separate::{separate_midi, Assignment, HandSeparator, SeparationReport};
pub use split_point::{estimate_split_point, resolve_split_point};
pub use stream::{StreamEntry, VoiceStream, VoiceStreamTracker};

use std::path::PathBuf;

/// Errors from hand separation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid note: {reason}")]
    InvalidNote { reason: String },

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("event at tick {tick} is {delta} ticks after the previous one, too far for a MIDI delta")]
    TickOverflow { tick: u64, delta: u64 },

    #[error("assignment has {labels} labels for {notes} notes")]
    AssignmentLength { notes: usize, labels: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
