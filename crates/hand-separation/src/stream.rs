use std::collections::VecDeque;

use crate::note::{Hand, TimedNote};

/// A note in a hand's history and how much it still counts.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub note: TimedNote,
    pub weight: f64,
}

/// Bounded history of the notes recently given to one hand, oldest first.
#[derive(Debug, Clone)]
pub struct VoiceStream {
    entries: VecDeque<StreamEntry>,
    max_len: usize,
}

impl VoiceStream {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    pub fn push(&mut self, note: TimedNote) {
        self.entries.push_back(StreamEntry { note, weight: 1.0 });
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
    }

    pub fn decay(&mut self, factor: f64) {
        for entry in &mut self.entries {
            entry.weight *= factor;
        }
    }

    /// The last `n` entries (fewer if the stream is shorter), oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn entries(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-hand voice history for one separation run.
///
/// Only state the engine carries between chord groups. One tracker per
/// piece; nothing is shared across runs.
#[derive(Debug, Clone)]
pub struct VoiceStreamTracker {
    left: VoiceStream,
    right: VoiceStream,
}

impl VoiceStreamTracker {
    pub fn new(max_stream_length: usize) -> Self {
        Self {
            left: VoiceStream::new(max_stream_length),
            right: VoiceStream::new(max_stream_length),
        }
    }

    pub fn stream(&self, hand: Hand) -> &VoiceStream {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }

    fn stream_mut(&mut self, hand: Hand) -> &mut VoiceStream {
        match hand {
            Hand::Left => &mut self.left,
            Hand::Right => &mut self.right,
        }
    }

    pub fn push(&mut self, hand: Hand, note: TimedNote) {
        self.stream_mut(hand).push(note);
    }

    /// Age both hands' history. Called once per processed chord group.
    pub fn decay_all(&mut self, factor: f64) {
        self.left.decay(factor);
        self.right.decay(factor);
    }

    pub fn recent(&self, hand: Hand, n: usize) -> Vec<&StreamEntry> {
        self.stream(hand).recent(n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8) -> TimedNote {
        TimedNote {
            onset_tick: 0,
            offset_tick: 480,
            pitch,
            velocity: 100,
            channel: 0,
            track_index: 0,
        }
    }

    #[test]
    fn push_starts_at_full_weight() {
        let mut tracker = VoiceStreamTracker::new(20);
        tracker.push(Hand::Right, note(72));

        let recent = tracker.recent(Hand::Right, 5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].weight, 1.0);
        assert!(tracker.stream(Hand::Left).is_empty());
    }

    #[test]
    fn cap_drops_oldest() {
        let mut tracker = VoiceStreamTracker::new(3);
        for pitch in 60..65 {
            tracker.push(Hand::Left, note(pitch));
        }

        let pitches: Vec<u8> = tracker.stream(Hand::Left).entries().map(|e| e.note.pitch).collect();
        assert_eq!(pitches, vec![62, 63, 64]);
    }

    #[test]
    fn recent_returns_tail_oldest_first() {
        let mut tracker = VoiceStreamTracker::new(20);
        for pitch in 60..68 {
            tracker.push(Hand::Right, note(pitch));
        }

        let pitches: Vec<u8> = tracker
            .recent(Hand::Right, 3)
            .iter()
            .map(|e| e.note.pitch)
            .collect();
        assert_eq!(pitches, vec![65, 66, 67]);
        assert_eq!(tracker.recent(Hand::Right, 50).len(), 8);
        assert!(tracker.recent(Hand::Left, 5).is_empty());
    }

    #[test]
    fn decay_touches_both_hands_and_keeps_entries() {
        let mut tracker = VoiceStreamTracker::new(20);
        tracker.push(Hand::Left, note(48));
        tracker.push(Hand::Right, note(72));

        for _ in 0..50 {
            tracker.decay_all(0.9);
        }

        assert_eq!(tracker.stream(Hand::Left).len(), 1);
        let left = tracker.recent(Hand::Left, 1)[0].weight;
        let right = tracker.recent(Hand::Right, 1)[0].weight;
        assert!((left - 0.9f64.powi(50)).abs() < 1e-12);
        assert_eq!(left, right);
    }

    #[test]
    fn fresh_push_is_not_decayed_retroactively() {
        let mut tracker = VoiceStreamTracker::new(20);
        tracker.push(Hand::Right, note(70));
        tracker.decay_all(0.5);
        tracker.push(Hand::Right, note(72));

        let weights: Vec<f64> = tracker.recent(Hand::Right, 2).iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![0.5, 1.0]);
    }
}
