use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single MIDI note with absolute tick timing and source metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedNote {
    pub onset_tick: u64,
    pub offset_tick: u64,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub track_index: usize,
}

impl TimedNote {
    /// Build a note, rejecting values a MIDI keyboard cannot produce.
    ///
    /// Construction through a struct literal skips these checks; the
    /// separation engine itself never validates and will score whatever
    /// it is handed.
    pub fn new(
        onset_tick: u64,
        offset_tick: u64,
        pitch: u8,
        velocity: u8,
        channel: u8,
    ) -> Result<Self> {
        if pitch > 127 {
            return Err(Error::InvalidNote {
                reason: format!("pitch {} outside 0-127", pitch),
            });
        }
        if velocity > 127 {
            return Err(Error::InvalidNote {
                reason: format!("velocity {} outside 0-127", velocity),
            });
        }
        if channel > 15 {
            return Err(Error::InvalidNote {
                reason: format!("channel {} outside 0-15", channel),
            });
        }
        if offset_tick < onset_tick {
            return Err(Error::InvalidNote {
                reason: format!(
                    "offset tick {} precedes onset tick {}",
                    offset_tick, onset_tick
                ),
            });
        }

        Ok(Self {
            onset_tick,
            offset_tick,
            pitch,
            velocity,
            channel,
            track_index: 0,
        })
    }

    pub fn duration_ticks(&self) -> u64 {
        self.offset_tick.saturating_sub(self.onset_tick)
    }
}

/// Which hand plays a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Track name used when writing the hand out as its own MIDI track.
    pub fn track_name(&self) -> &'static str {
        match self {
            Self::Left => "Left Hand",
            Self::Right => "Right Hand",
        }
    }
}

impl std::fmt::Display for Hand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about the notes given to one hand.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandStats {
    pub note_count: usize,
    pub pitch_min: u8,
    pub pitch_max: u8,
    pub mean_pitch: f64,
    /// Fraction of the hand's time span covered by notes (0.0–1.0)
    pub coverage: f64,
}

impl HandStats {
    pub fn from_notes<'a>(notes: impl IntoIterator<Item = &'a TimedNote>) -> Self {
        let notes: Vec<&TimedNote> = notes.into_iter().collect();
        if notes.is_empty() {
            return Self::default();
        }

        let pitch_min = notes.iter().map(|n| n.pitch).min().unwrap_or(0);
        let pitch_max = notes.iter().map(|n| n.pitch).max().unwrap_or(0);
        let mean_pitch =
            notes.iter().map(|n| n.pitch as f64).sum::<f64>() / notes.len() as f64;

        let first_onset = notes.iter().map(|n| n.onset_tick).min().unwrap_or(0);
        let last_offset = notes.iter().map(|n| n.offset_tick).max().unwrap_or(0);
        let span = last_offset.saturating_sub(first_onset);

        let sounding_ticks: u64 = notes.iter().map(|n| n.duration_ticks()).sum();
        let coverage = if span > 0 {
            (sounding_ticks as f64 / span as f64).min(1.0)
        } else {
            0.0
        };

        Self {
            note_count: notes.len(),
            pitch_min,
            pitch_max,
            mean_pitch,
            coverage,
        }
    }
}

/// The notes assigned to one hand, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparatedHand {
    pub hand: Hand,
    pub notes: Vec<TimedNote>,
    pub stats: HandStats,
}

impl SeparatedHand {
    pub fn new(hand: Hand, notes: Vec<TimedNote>) -> Self {
        Self {
            stats: HandStats::from_notes(&notes),
            hand,
            notes,
        }
    }
}
