//! Hand-assignment scoring.
//!
//! Notes well clear of the split point are decided by pitch alone. Inside
//! the hysteresis band each hand gets a score (lower is better) built from:
//!
//! - continuity: tiered pitch-jump penalty against the hand's recent notes,
//!   averaged by each note's decayed weight
//! - span: flat penalty when the note would stretch the hand past its reach
//! - velocity: louder notes lean right, softer notes lean left
//! - pitch preference: distance from the split, plus a penalty for
//!   landing on the other hand's side

use serde::{Deserialize, Serialize};

use crate::config::HandConfig;
use crate::note::{Hand, TimedNote};
use crate::stream::{StreamEntry, VoiceStreamTracker};

const VELOCITY_SCALE: f64 = 10.0;
const MAX_VELOCITY: f64 = 127.0;

/// A note as the scorer sees it. Chord centres have fractional pitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub pitch: f64,
    pub velocity: f64,
    pub onset_tick: u64,
}

impl From<&TimedNote> for Candidate {
    fn from(note: &TimedNote) -> Self {
        Self {
            pitch: note.pitch as f64,
            velocity: note.velocity as f64,
            onset_tick: note.onset_tick,
        }
    }
}

impl Candidate {
    /// Synthetic note at the mean pitch and velocity of a chord, struck at
    /// the first note's onset.
    pub fn chord_center(notes: &[&TimedNote]) -> Option<Self> {
        let first = notes.first()?;
        let count = notes.len() as f64;
        Some(Self {
            pitch: notes.iter().map(|n| n.pitch as f64).sum::<f64>() / count,
            velocity: notes.iter().map(|n| n.velocity as f64).sum::<f64>() / count,
            onset_tick: first.onset_tick,
        })
    }
}

/// Which path decided a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Pitch (or chord centre) outside the hysteresis band.
    HardRule,
    /// Inside the band, decided by comparing hand scores.
    Scored,
    /// Chord too wide for one hand, split at the split point.
    SplitChord,
}

#[derive(Debug, Clone)]
pub struct HandScorer {
    hysteresis: f64,
    max_hand_span: f64,
    continuity_weight: f64,
    velocity_weight: f64,
    pitch_weight: f64,
    span_penalty: f64,
    cross_penalty: f64,
    recent_window: usize,
}

impl HandScorer {
    pub fn new(config: &HandConfig) -> Self {
        Self {
            hysteresis: config.hysteresis as f64,
            max_hand_span: config.max_hand_span as f64,
            continuity_weight: config.continuity_weight,
            velocity_weight: config.velocity_weight,
            pitch_weight: config.pitch_weight(),
            span_penalty: config.span_penalty,
            cross_penalty: config.cross_penalty,
            recent_window: config.recent_window,
        }
    }

    /// Pitch-only decision, `None` inside the hysteresis band.
    pub fn hard_rule(&self, pitch: f64, split: u8) -> Option<Hand> {
        let split = split as f64;
        if pitch < split - self.hysteresis {
            Some(Hand::Left)
        } else if pitch > split + self.hysteresis {
            Some(Hand::Right)
        } else {
            None
        }
    }

    pub fn assign_single(
        &self,
        candidate: &Candidate,
        split: u8,
        tracker: &VoiceStreamTracker,
    ) -> Hand {
        self.resolve_single(candidate, split, tracker).0
    }

    pub fn resolve_single(
        &self,
        candidate: &Candidate,
        split: u8,
        tracker: &VoiceStreamTracker,
    ) -> (Hand, Resolution) {
        if let Some(hand) = self.hard_rule(candidate.pitch, split) {
            return (hand, Resolution::HardRule);
        }

        let left = self.hand_score(
            candidate,
            &tracker.recent(Hand::Left, self.recent_window),
            Hand::Left,
            split,
        );
        let right = self.hand_score(
            candidate,
            &tracker.recent(Hand::Right, self.recent_window),
            Hand::Right,
            split,
        );

        // Left has to win outright; a tie goes right.
        let hand = if left < right { Hand::Left } else { Hand::Right };
        (hand, Resolution::Scored)
    }

    /// Score how well `candidate` fits `hand` given its recent history.
    /// Lower is better.
    pub fn hand_score(
        &self,
        candidate: &Candidate,
        recent: &[&StreamEntry],
        hand: Hand,
        split: u8,
    ) -> f64 {
        let split = split as f64;

        if recent.is_empty() {
            return (candidate.pitch - split).abs();
        }

        let continuity = continuity_penalty(candidate.pitch, recent);

        let (lowest, highest) = recent.iter().fold(
            (candidate.pitch, candidate.pitch),
            |(lo, hi), entry| {
                let p = entry.note.pitch as f64;
                (lo.min(p), hi.max(p))
            },
        );
        let span = if highest - lowest > self.max_hand_span {
            self.span_penalty
        } else {
            0.0
        };

        let velocity = if self.velocity_weight > 0.0 {
            let v = candidate.velocity / MAX_VELOCITY;
            match hand {
                Hand::Right => (1.0 - v) * VELOCITY_SCALE,
                Hand::Left => v * VELOCITY_SCALE,
            }
        } else {
            0.0
        };

        let wrong_side = match hand {
            Hand::Left => candidate.pitch >= split,
            Hand::Right => candidate.pitch < split,
        };
        let preference = (candidate.pitch - split).abs()
            + if wrong_side { self.cross_penalty } else { 0.0 };

        self.continuity_weight * continuity
            + span
            + self.velocity_weight * velocity
            + self.pitch_weight * preference
    }

    pub fn assign_chord(
        &self,
        notes: &[&TimedNote],
        split: u8,
        tracker: &VoiceStreamTracker,
    ) -> Vec<Hand> {
        self.resolve_chord(notes, split, tracker).0
    }

    /// Decide a chord group. Labels come back in the order of `notes`.
    pub fn resolve_chord(
        &self,
        notes: &[&TimedNote],
        split: u8,
        tracker: &VoiceStreamTracker,
    ) -> (Vec<Hand>, Resolution) {
        let Some(center) = Candidate::chord_center(notes) else {
            return (Vec::new(), Resolution::HardRule);
        };

        let lowest = notes.iter().map(|n| n.pitch).min().unwrap_or(0);
        let highest = notes.iter().map(|n| n.pitch).max().unwrap_or(0);
        let span = highest.saturating_sub(lowest) as f64;

        if span > self.max_hand_span {
            let labels = notes
                .iter()
                .map(|n| if n.pitch < split { Hand::Left } else { Hand::Right })
                .collect();
            return (labels, Resolution::SplitChord);
        }

        let (hand, resolution) = self.resolve_single(&center, split, tracker);
        (vec![hand; notes.len()], resolution)
    }
}

/// Weighted average of tiered jump penalties against recent notes.
fn continuity_penalty(pitch: f64, recent: &[&StreamEntry]) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for entry in recent {
        let jump = (pitch - entry.note.pitch as f64).abs();
        let penalty = if jump <= 2.0 {
            jump
        } else if jump <= 7.0 {
            jump * 2.0
        } else {
            jump * 3.0
        };
        weighted += penalty * entry.weight;
        total_weight += entry.weight;
    }

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}
