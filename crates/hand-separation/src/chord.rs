use serde::{Deserialize, Serialize};

use crate::extract::MidiFileContext;
use crate::note::TimedNote;

/// 120 BPM
pub const DEFAULT_MICROSECONDS_PER_BEAT: u32 = 500_000;
pub const DEFAULT_PPQ: u16 = 480;

/// Tempo and resolution used to turn a millisecond chord window into ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordTiming {
    pub ppq: u16,
    pub microseconds_per_beat: u32,
}

impl Default for ChordTiming {
    fn default() -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            microseconds_per_beat: DEFAULT_MICROSECONDS_PER_BEAT,
        }
    }
}

impl ChordTiming {
    /// Use the file's resolution and its first tempo event.
    pub fn from_context(context: &MidiFileContext) -> Self {
        let microseconds_per_beat = context
            .tempo_changes
            .first()
            .map(|t| t.microseconds_per_beat)
            .filter(|&usec| usec > 0)
            .unwrap_or(DEFAULT_MICROSECONDS_PER_BEAT);

        Self {
            ppq: context.ppq,
            microseconds_per_beat,
        }
    }

    pub fn ms_to_ticks(&self, ms: f64) -> u64 {
        let usec_per_beat = self.microseconds_per_beat.max(1) as f64;
        let ticks = ms * 1000.0 * self.ppq as f64 / usec_per_beat;
        if ticks.is_finite() && ticks > 0.0 {
            ticks.round() as u64
        } else {
            0
        }
    }
}

/// Indices (into the onset-sorted note list) of notes struck together.
///
/// The first index is the anchor; every other member starts within the
/// chord window of the anchor's onset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordGroup {
    indices: Vec<usize>,
}

impl ChordGroup {
    pub fn anchor(&self) -> usize {
        self.indices[0]
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Always false; groups are never built empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.indices.len() == 1
    }
}

/// Partition onset-sorted notes into chord groups.
///
/// Greedy and anchor-relative: the scan from each anchor stops at the
/// first note more than `window_ticks` after the anchor, even when that
/// note is close to another member of the group.
pub fn group_chords(sorted_notes: &[TimedNote], window_ticks: u64) -> Vec<ChordGroup> {
    let mut groups = Vec::new();
    let mut i = 0;

    while i < sorted_notes.len() {
        let anchor_onset = sorted_notes[i].onset_tick;
        let mut indices = vec![i];

        let mut j = i + 1;
        while j < sorted_notes.len()
            && sorted_notes[j].onset_tick.saturating_sub(anchor_onset) <= window_ticks
        {
            indices.push(j);
            j += 1;
        }

        groups.push(ChordGroup { indices });
        i = j;
    }

    groups
}
