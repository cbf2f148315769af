use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::chord::{group_chords, ChordTiming};
use crate::config::HandConfig;
use crate::extract::{parse_midi, RetriggerPolicy};
use crate::midi_writer::{hands_to_midi, ExportOptions};
use crate::note::{Hand, HandStats, SeparatedHand, TimedNote};
use crate::scorer::{Candidate, HandScorer, Resolution};
use crate::split_point::{resolve_split_point, DEFAULT_SPLIT};
use crate::stream::VoiceStreamTracker;

/// One hand label per input note, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assignment {
    labels: Vec<Hand>,
}

impl Assignment {
    pub fn labels(&self) -> &[Hand] {
        &self.labels
    }

    pub fn into_labels(self) -> Vec<Hand> {
        self.labels
    }

    pub fn hand_of(&self, index: usize) -> Option<Hand> {
        self.labels.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn count(&self, hand: Hand) -> usize {
        self.labels.iter().filter(|&&h| h == hand).count()
    }
}

impl From<Vec<Hand>> for Assignment {
    fn from(labels: Vec<Hand>) -> Self {
        Self { labels }
    }
}

/// Summary of a separation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationReport {
    pub split_point: u8,
    pub chord_window_ticks: u64,
    pub group_count: usize,
    pub hard_rule_groups: usize,
    pub scored_groups: usize,
    pub split_chord_groups: usize,
    pub right: HandStats,
    pub left: HandStats,
}

/// Assigns every note of a piece to the left or right hand.
///
/// Holds only configuration; each call builds its own voice history, so
/// one separator can serve independent pieces from several threads.
#[derive(Debug, Clone)]
pub struct HandSeparator {
    config: HandConfig,
    scorer: HandScorer,
}

impl HandSeparator {
    pub fn new(config: HandConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            scorer: HandScorer::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &HandConfig {
        &self.config
    }

    pub fn assign(&self, notes: &[TimedNote], timing: ChordTiming) -> Assignment {
        self.assign_with_report(notes, timing).0
    }

    /// Run the full pipeline: split point, chord groups, then each group
    /// in time order against the decaying voice history.
    pub fn assign_with_report(
        &self,
        notes: &[TimedNote],
        timing: ChordTiming,
    ) -> (Assignment, SeparationReport) {
        let window_ticks = timing.ms_to_ticks(self.config.chord_window_ms);

        if notes.is_empty() {
            let report = SeparationReport {
                split_point: self.config.split_note.unwrap_or(DEFAULT_SPLIT),
                chord_window_ticks: window_ticks,
                group_count: 0,
                hard_rule_groups: 0,
                scored_groups: 0,
                split_chord_groups: 0,
                right: HandStats::default(),
                left: HandStats::default(),
            };
            return (Assignment::default(), report);
        }

        // Stable sort: notes sharing an onset stay in input order, which is
        // also the order they enter the voice streams.
        let mut order: Vec<usize> = (0..notes.len()).collect();
        order.sort_by_key(|&i| notes[i].onset_tick);
        let sorted: Vec<TimedNote> = order.iter().map(|&i| notes[i].clone()).collect();

        let split = resolve_split_point(notes, &self.config);
        let groups = group_chords(&sorted, window_ticks);

        let mut tracker = VoiceStreamTracker::new(self.config.max_stream_length);
        let mut sorted_labels = vec![Hand::Right; sorted.len()];
        let mut hard_rule_groups = 0;
        let mut scored_groups = 0;
        let mut split_chord_groups = 0;

        for group in &groups {
            let members: Vec<&TimedNote> = group.indices().iter().map(|&i| &sorted[i]).collect();

            let (labels, resolution) = if group.is_single() {
                let candidate = Candidate::from(members[0]);
                let (hand, resolution) = self.scorer.resolve_single(&candidate, split, &tracker);
                (vec![hand], resolution)
            } else {
                self.scorer.resolve_chord(&members, split, &tracker)
            };

            match resolution {
                Resolution::HardRule => hard_rule_groups += 1,
                Resolution::Scored => scored_groups += 1,
                Resolution::SplitChord => split_chord_groups += 1,
            }

            trace!(
                anchor_tick = sorted[group.anchor()].onset_tick,
                size = group.len(),
                ?resolution,
                ?labels,
                "resolved chord group"
            );

            for (&index, &hand) in group.indices().iter().zip(labels.iter()) {
                sorted_labels[index] = hand;
                tracker.push(hand, sorted[index].clone());
            }
            tracker.decay_all(self.config.decay_factor);
        }

        let mut labels = vec![Hand::Right; notes.len()];
        for (sorted_index, &original_index) in order.iter().enumerate() {
            labels[original_index] = sorted_labels[sorted_index];
        }
        let assignment = Assignment::from(labels);

        let report = SeparationReport {
            split_point: split,
            chord_window_ticks: window_ticks,
            group_count: groups.len(),
            hard_rule_groups,
            scored_groups,
            split_chord_groups,
            right: HandStats::from_notes(notes_for(notes, &assignment, Hand::Right)),
            left: HandStats::from_notes(notes_for(notes, &assignment, Hand::Left)),
        };

        debug!(
            notes = notes.len(),
            split_point = split,
            groups = report.group_count,
            scored = scored_groups,
            split_chords = split_chord_groups,
            right = report.right.note_count,
            left = report.left.note_count,
            "separated hands"
        );

        (assignment, report)
    }

    /// Assign, then collect each hand's notes. Right hand first.
    pub fn separate(
        &self,
        notes: &[TimedNote],
        timing: ChordTiming,
    ) -> (Vec<SeparatedHand>, SeparationReport) {
        let (assignment, report) = self.assign_with_report(notes, timing);

        let hands = [Hand::Right, Hand::Left]
            .into_iter()
            .map(|hand| {
                let hand_notes = notes_for(notes, &assignment, hand).cloned().collect();
                SeparatedHand::new(hand, hand_notes)
            })
            .collect();

        (hands, report)
    }

    /// Parse a keyboard MIDI file and write it back as right/left hand tracks.
    pub fn separate_midi(&self, midi_bytes: &[u8], policy: RetriggerPolicy) -> crate::Result<Vec<u8>> {
        let (notes, context) = parse_midi(midi_bytes, policy)?;
        let assignment = self.assign(&notes, ChordTiming::from_context(&context));
        hands_to_midi(&notes, &assignment, &context, &ExportOptions::default())
    }
}

/// One-shot file conversion with the default retrigger policy.
pub fn separate_midi(midi_bytes: &[u8], config: HandConfig) -> crate::Result<Vec<u8>> {
    HandSeparator::new(config)?.separate_midi(midi_bytes, RetriggerPolicy::default())
}

fn notes_for<'a>(
    notes: &'a [TimedNote],
    assignment: &'a Assignment,
    hand: Hand,
) -> impl Iterator<Item = &'a TimedNote> {
    notes
        .iter()
        .zip(assignment.labels().iter())
        .filter(move |(_, &h)| h == hand)
        .map(|(n, _)| n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_notes(specs: &[(u64, u8, u8)]) -> Vec<TimedNote> {
        specs
            .iter()
            .map(|&(onset, pitch, velocity)| TimedNote {
                onset_tick: onset,
                offset_tick: onset + 240,
                pitch,
                velocity,
                channel: 0,
                track_index: 0,
            })
            .collect()
    }

    fn separator() -> HandSeparator {
        HandSeparator::new(HandConfig {
            split_note: Some(60),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let err = HandSeparator::new(HandConfig {
            decay_factor: 2.0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidConfig(_)));
    }

    #[test]
    fn empty_notes() {
        let (assignment, report) = separator().assign_with_report(&[], ChordTiming::default());
        assert!(assignment.is_empty());
        assert_eq!(report.group_count, 0);
        assert_eq!(report.split_point, 60);
    }

    #[test]
    fn melody_over_bass() {
        let notes = make_notes(&[
            (0, 48, 80),
            (0, 72, 100),
            (480, 52, 80),
            (480, 74, 100),
            (960, 55, 80),
            (960, 76, 100),
        ]);

        let assignment = separator().assign(&notes, ChordTiming::default());
        assert_eq!(
            assignment.labels(),
            &[Hand::Left, Hand::Right, Hand::Left, Hand::Right, Hand::Left, Hand::Right]
        );
    }

    #[test]
    fn labels_follow_input_order_not_time_order() {
        let notes = make_notes(&[(960, 40, 80), (0, 80, 80), (480, 41, 80)]);
        let assignment = separator().assign(&notes, ChordTiming::default());
        assert_eq!(assignment.labels(), &[Hand::Left, Hand::Right, Hand::Left]);
    }

    #[test]
    fn scored_note_follows_nearby_voice() {
        // Right hand walks down into the band; the band note stays right
        let notes = make_notes(&[
            (0, 40, 70),
            (0, 70, 90),
            (480, 68, 90),
            (960, 66, 90),
            (1440, 64, 90),
        ]);

        let (assignment, report) = separator().assign_with_report(&notes, ChordTiming::default());
        assert_eq!(assignment.hand_of(4), Some(Hand::Right));
        assert_eq!(report.scored_groups, 1);
        assert_eq!(report.split_chord_groups, 1);
        assert_eq!(report.group_count, 4);
    }

    fn chord_then_loud_e4(chord: &[u8]) -> Vec<TimedNote> {
        let mut specs: Vec<(u64, u8, u8)> = chord.iter().map(|&p| (0, p, 80)).collect();
        specs.push((480, 64, 127));
        make_notes(&specs)
    }

    #[test]
    fn chord_members_enter_streams_in_input_order() {
        // The centre 59.17 ties on empty streams, so the whole chord goes right.
        // Pushed as given, the 50 stays in the right hand's last five notes and
        // stretches it past an octave from 64.
        let given = chord_then_loud_e4(&[62, 62, 61, 60, 60, 50]);
        let assignment = separator().assign(&given, ChordTiming::default());
        assert_eq!(&assignment.labels()[..6], &[Hand::Right; 6]);
        assert_eq!(assignment.hand_of(6), Some(Hand::Left));

        // Given low to high, the 50 is the oldest entry and falls out of the window
        let ascending = chord_then_loud_e4(&[50, 60, 60, 61, 62, 62]);
        let assignment = separator().assign(&ascending, ChordTiming::default());
        assert_eq!(assignment.hand_of(6), Some(Hand::Right));
    }

    #[test]
    fn separate_returns_right_then_left() {
        let notes = make_notes(&[(0, 45, 80), (480, 80, 80), (960, 44, 80)]);
        let (hands, report) = separator().separate(&notes, ChordTiming::default());

        assert_eq!(hands.len(), 2);
        assert_eq!(hands[0].hand, Hand::Right);
        assert_eq!(hands[0].notes.len(), 1);
        assert_eq!(hands[1].hand, Hand::Left);
        assert_eq!(hands[1].notes.len(), 2);
        assert_eq!(report.left.note_count, 2);
        assert_eq!(report.right.pitch_max, 80);
    }

    #[test]
    fn auto_split_point_is_reported() {
        let separator = HandSeparator::new(HandConfig::default()).unwrap();
        let notes = make_notes(&[(0, 60, 80), (480, 64, 80), (960, 67, 80)]);
        let (_, report) = separator.assign_with_report(&notes, ChordTiming::default());
        assert_eq!(report.split_point, 64);
        assert_eq!(report.chord_window_ticks, 48);
    }
}
