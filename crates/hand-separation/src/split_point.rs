use crate::config::HandConfig;
use crate::note::TimedNote;

/// Middle C, used when there's nothing to estimate from.
pub const DEFAULT_SPLIT: u8 = 60;
/// C3
pub const MIN_SPLIT: u8 = 48;
/// C5
pub const MAX_SPLIT: u8 = 72;

/// Estimate the pitch boundary between hands from the median pitch,
/// kept within an octave of middle C.
pub fn estimate_split_point(notes: &[TimedNote]) -> u8 {
    if notes.is_empty() {
        return DEFAULT_SPLIT;
    }

    let mut pitches: Vec<u8> = notes.iter().map(|n| n.pitch).collect();
    pitches.sort_unstable();

    let mid = pitches.len() / 2;
    let median = if pitches.len() % 2 == 1 {
        pitches[mid]
    } else {
        ((pitches[mid - 1] as u16 + pitches[mid] as u16) / 2) as u8
    };

    median.clamp(MIN_SPLIT, MAX_SPLIT)
}

/// The configured split note if fixed, otherwise the estimate for this piece.
pub fn resolve_split_point(notes: &[TimedNote], config: &HandConfig) -> u8 {
    config
        .split_note
        .unwrap_or_else(|| estimate_split_point(notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes_with_pitches(pitches: &[u8]) -> Vec<TimedNote> {
        pitches
            .iter()
            .enumerate()
            .map(|(i, &pitch)| TimedNote {
                onset_tick: i as u64 * 480,
                offset_tick: i as u64 * 480 + 240,
                pitch,
                velocity: 100,
                channel: 0,
                track_index: 0,
            })
            .collect()
    }

    #[test]
    fn odd_count_takes_middle() {
        assert_eq!(estimate_split_point(&notes_with_pitches(&[50, 70, 62])), 62);
    }

    #[test]
    fn even_count_averages_and_rounds_down() {
        assert_eq!(estimate_split_point(&notes_with_pitches(&[55, 60, 61, 80])), 60);
    }

    #[test]
    fn clamps_low_register() {
        assert_eq!(estimate_split_point(&notes_with_pitches(&[21, 30, 36])), MIN_SPLIT);
    }

    #[test]
    fn clamps_high_register() {
        assert_eq!(estimate_split_point(&notes_with_pitches(&[90, 100, 108])), MAX_SPLIT);
    }

    #[test]
    fn empty_falls_back_to_middle_c() {
        assert_eq!(estimate_split_point(&[]), DEFAULT_SPLIT);
    }

    #[test]
    fn fixed_split_wins() {
        let config = HandConfig {
            split_note: Some(58),
            ..Default::default()
        };
        let notes = notes_with_pitches(&[80, 84, 88]);
        assert_eq!(resolve_split_point(&notes, &config), 58);
        assert_eq!(resolve_split_point(&notes, &HandConfig::default()), 72);
    }
}
