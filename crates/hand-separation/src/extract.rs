use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::note::TimedNote;

/// Fallback resolution for SMPTE-timed files.
const DEFAULT_PPQ: u16 = 480;

/// Parsed MIDI file context: timing, format, and meta needed for output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiFileContext {
    pub ppq: u16,
    pub format: u8,
    pub track_count: usize,
    pub tempo_changes: Vec<TempoChange>,
    pub time_signatures: Vec<TimeSignature>,
    pub key_signatures: Vec<KeySignature>,
    pub total_ticks: u64,
}

impl Default for MidiFileContext {
    fn default() -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            format: 1,
            track_count: 0,
            tempo_changes: Vec::new(),
            time_signatures: Vec::new(),
            key_signatures: Vec::new(),
            total_ticks: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub tick: u64,
    pub microseconds_per_beat: u32,
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub tick: u64,
    pub numerator: u8,
    pub denominator: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySignature {
    pub tick: u64,
    /// Sharps (positive) or flats (negative)
    pub accidentals: i8,
    pub minor: bool,
}

/// What to do when a key is struck again before its release arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetriggerPolicy {
    /// Close the sounding instance at the new onset, then start a fresh one.
    #[default]
    Restrike,
    /// Keep both sounding; each release closes the most recent instance.
    Stack,
}

/// Parse SMF bytes and extract the note stream.
pub fn parse_midi(
    midi_bytes: &[u8],
    policy: RetriggerPolicy,
) -> crate::Result<(Vec<TimedNote>, MidiFileContext)> {
    let smf = Smf::parse(midi_bytes).map_err(|e| crate::Error::MidiParse(e.to_string()))?;
    Ok(extract_notes(&smf, policy))
}

/// Extract all notes from a parsed file, pairing note-on/note-off events.
pub fn extract_notes(smf: &Smf, policy: RetriggerPolicy) -> (Vec<TimedNote>, MidiFileContext) {
    let ppq = match smf.header.timing {
        midly::Timing::Metrical(ticks) => ticks.as_int(),
        midly::Timing::Timecode(_, _) => DEFAULT_PPQ,
    };

    let format = match smf.header.format {
        midly::Format::SingleTrack => 0,
        midly::Format::Parallel => 1,
        midly::Format::Sequential => 2,
    };

    let mut all_notes = Vec::new();
    let mut tempo_changes = Vec::new();
    let mut time_signatures = Vec::new();
    let mut key_signatures = Vec::new();
    let mut total_ticks: u64 = 0;

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut current_tick: u64 = 0;
        // (channel, pitch) → sounding instances as (onset_tick, velocity)
        let mut pending: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

        for event in track {
            current_tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                    let usec = tempo.as_int();
                    tempo_changes.push(TempoChange {
                        tick: current_tick,
                        microseconds_per_beat: usec,
                        bpm: 60_000_000.0 / usec as f64,
                    });
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, denom_pow, _, _)) => {
                    match 1u8.checked_shl(denom_pow as u32) {
                        Some(denominator) => time_signatures.push(TimeSignature {
                            tick: current_tick,
                            numerator: num,
                            denominator,
                        }),
                        None => warn!(
                            track = track_index,
                            tick = current_tick,
                            denom_pow,
                            "skipping time signature with unrepresentable denominator"
                        ),
                    }
                }
                TrackEventKind::Meta(MetaMessage::KeySignature(accidentals, minor)) => {
                    key_signatures.push(KeySignature {
                        tick: current_tick,
                        accidentals,
                        minor,
                    });
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let key = (ch, key.as_int());
                            let stack = pending.entry(key).or_default();
                            if policy == RetriggerPolicy::Restrike {
                                if let Some((onset, velocity)) = stack.pop() {
                                    warn!(
                                        track = track_index,
                                        channel = ch,
                                        pitch = key.1,
                                        tick = current_tick,
                                        "retriggered before release, closing previous note"
                                    );
                                    all_notes.push(TimedNote {
                                        onset_tick: onset,
                                        offset_tick: current_tick,
                                        pitch: key.1,
                                        velocity,
                                        channel: ch,
                                        track_index,
                                    });
                                }
                            }
                            stack.push((current_tick, vel.as_int()));
                        }
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            // vel=0 NoteOn is NoteOff
                            let key = (ch, key.as_int());
                            match pending.get_mut(&key).and_then(|stack| stack.pop()) {
                                Some((onset, velocity)) => all_notes.push(TimedNote {
                                    onset_tick: onset,
                                    offset_tick: current_tick,
                                    pitch: key.1,
                                    velocity,
                                    channel: ch,
                                    track_index,
                                }),
                                None => warn!(
                                    track = track_index,
                                    channel = ch,
                                    pitch = key.1,
                                    tick = current_tick,
                                    "note-off without a sounding note"
                                ),
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }

            total_ticks = total_ticks.max(current_tick);
        }

        // Close any unclosed notes at the track's final tick
        for (&(channel, pitch), stack) in &pending {
            for &(onset, velocity) in stack {
                warn!(
                    track = track_index,
                    channel,
                    pitch,
                    onset,
                    "note never released, closing at end of track"
                );
                all_notes.push(TimedNote {
                    onset_tick: onset,
                    offset_tick: current_tick,
                    pitch,
                    velocity,
                    channel,
                    track_index,
                });
            }
        }
    }

    // Sort by onset, then pitch for determinism
    all_notes.sort_by(|a, b| {
        a.onset_tick
            .cmp(&b.onset_tick)
            .then(a.pitch.cmp(&b.pitch))
            .then(a.offset_tick.cmp(&b.offset_tick))
            .then(a.channel.cmp(&b.channel))
    });

    // Deduplicate meta (multiple tracks may repeat them in format 1)
    tempo_changes.sort_by_key(|t| t.tick);
    tempo_changes.dedup_by(|a, b| a.tick == b.tick && a.microseconds_per_beat == b.microseconds_per_beat);

    time_signatures.sort_by_key(|t| t.tick);
    time_signatures.dedup_by(|a, b| a.tick == b.tick);

    key_signatures.sort_by_key(|k| k.tick);
    key_signatures.dedup_by(|a, b| a.tick == b.tick);

    let context = MidiFileContext {
        ppq,
        format,
        track_count: smf.tracks.len(),
        tempo_changes,
        time_signatures,
        key_signatures,
        total_ticks,
    };

    (all_notes, context)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Wrap raw track bodies (without end-of-track) into a format-1 file.
    pub(crate) fn build_midi(ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"MThd");
        buf.extend_from_slice(&6u32.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        buf.extend_from_slice(&ppq.to_be_bytes());

        for body in tracks {
            let mut track = body.clone();
            track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
            buf.extend_from_slice(b"MTrk");
            buf.extend_from_slice(&(track.len() as u32).to_be_bytes());
            buf.extend_from_slice(&track);
        }

        buf
    }

    pub(crate) fn tempo_track() -> Vec<u8> {
        let mut track = Vec::new();
        // 120 BPM
        track.extend_from_slice(&[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
        // 4/4
        track.extend_from_slice(&[0x00, 0xFF, 0x58, 0x04, 0x04, 0x02, 0x18, 0x08]);
        // G major
        track.extend_from_slice(&[0x00, 0xFF, 0x59, 0x02, 0x01, 0x00]);
        track
    }

    #[test]
    fn pairs_on_and_off() {
        let mut notes = Vec::new();
        notes.extend_from_slice(&[0x00, 0x90, 60, 100]);
        notes.extend_from_slice(&[0x83, 0x60, 0x80, 60, 0]);
        notes.extend_from_slice(&[0x00, 0x90, 64, 90]);
        // vel=0 note-on as release
        notes.extend_from_slice(&[0x83, 0x60, 0x90, 64, 0]);

        let midi = build_midi(480, &[tempo_track(), notes]);
        let (notes, context) = parse_midi(&midi, RetriggerPolicy::default()).unwrap();

        assert_eq!(context.ppq, 480);
        assert_eq!(context.format, 1);
        assert_eq!(context.track_count, 2);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].pitch, 60);
        assert_eq!(notes[0].duration_ticks(), 480);
        assert_eq!(notes[1].pitch, 64);
        assert_eq!(notes[1].velocity, 90);
        assert_eq!(notes[1].onset_tick, 480);
        assert!(notes.iter().all(|n| n.track_index == 1));
    }

    #[test]
    fn collects_meta() {
        let midi = build_midi(480, &[tempo_track()]);
        let (notes, context) = parse_midi(&midi, RetriggerPolicy::default()).unwrap();

        assert!(notes.is_empty());
        assert_eq!(context.tempo_changes.len(), 1);
        assert!((context.tempo_changes[0].bpm - 120.0).abs() < 0.1);
        assert_eq!(
            context.time_signatures,
            vec![TimeSignature {
                tick: 0,
                numerator: 4,
                denominator: 4
            }]
        );
        assert_eq!(
            context.key_signatures,
            vec![KeySignature {
                tick: 0,
                accidentals: 1,
                minor: false
            }]
        );
    }

    #[test]
    fn oversized_time_signature_denominator_is_skipped() {
        let mut track = Vec::new();
        // 4/2^8 cannot be held in a u8 denominator
        track.extend_from_slice(&[0x00, 0xFF, 0x58, 0x04, 0x04, 0x08, 0x18, 0x08]);
        // 4/2^7 still can
        track.extend_from_slice(&[0x00, 0xFF, 0x58, 0x04, 0x04, 0x07, 0x18, 0x08]);
        track.extend_from_slice(&[0x00, 0x90, 60, 100]);
        track.extend_from_slice(&[0x83, 0x60, 0x80, 60, 0]);

        let midi = build_midi(480, &[track]);
        let (notes, context) = parse_midi(&midi, RetriggerPolicy::default()).unwrap();

        assert_eq!(notes.len(), 1);
        assert_eq!(
            context.time_signatures,
            vec![TimeSignature {
                tick: 0,
                numerator: 4,
                denominator: 128
            }]
        );

        let separated = crate::separate_midi(&midi, crate::HandConfig::default()).unwrap();
        assert!(parse_midi(&separated, RetriggerPolicy::default()).is_ok());
    }

    fn retrigger_track() -> Vec<u8> {
        let mut track = Vec::new();
        // C4 on at 0, again at 240, single release at 480, second release at 720
        track.extend_from_slice(&[0x00, 0x90, 60, 100]);
        track.extend_from_slice(&[0x81, 0x70, 0x90, 60, 80]);
        track.extend_from_slice(&[0x81, 0x70, 0x80, 60, 0]);
        track.extend_from_slice(&[0x81, 0x70, 0x80, 60, 0]);
        track
    }

    #[test]
    fn restrike_closes_previous_instance() {
        let midi = build_midi(480, &[retrigger_track()]);
        let (notes, _) = parse_midi(&midi, RetriggerPolicy::Restrike).unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].onset_tick, notes[0].offset_tick), (0, 240));
        assert_eq!(notes[0].velocity, 100);
        assert_eq!((notes[1].onset_tick, notes[1].offset_tick), (240, 480));
        assert_eq!(notes[1].velocity, 80);
    }

    #[test]
    fn stack_keeps_both_instances() {
        let midi = build_midi(480, &[retrigger_track()]);
        let (notes, _) = parse_midi(&midi, RetriggerPolicy::Stack).unwrap();

        assert_eq!(notes.len(), 2);
        // First release closes the newest instance
        assert_eq!((notes[0].onset_tick, notes[0].offset_tick), (0, 720));
        assert_eq!((notes[1].onset_tick, notes[1].offset_tick), (240, 480));
    }

    #[test]
    fn unclosed_note_keeps_its_channel() {
        let mut track = Vec::new();
        track.extend_from_slice(&[0x00, 0x93, 50, 70]); // channel 3, never released
        track.extend_from_slice(&[0x83, 0x60, 0xFF, 0x01, 0x00]); // empty text at 480

        let midi = build_midi(480, &[track]);
        let (notes, context) = parse_midi(&midi, RetriggerPolicy::default()).unwrap();

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].channel, 3);
        assert_eq!(notes[0].offset_tick, 480);
        assert_eq!(context.total_ticks, 480);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_midi(b"not a midi file", RetriggerPolicy::default()).unwrap_err();
        assert!(matches!(err, crate::Error::MidiParse(_)));
    }
}
