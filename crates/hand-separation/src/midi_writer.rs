use serde::{Deserialize, Serialize};

use crate::extract::MidiFileContext;
use crate::note::{Hand, TimedNote};
use crate::separate::Assignment;

/// Largest delta a four-byte variable-length quantity can hold.
const MAX_DELTA: u64 = 0x0FFF_FFFF;

/// Options for MIDI export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Copy the first tempo, time signature and key signature into each
    /// hand track at tick 0. Default: true.
    pub copy_meta: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { copy_meta: true }
    }
}

/// Write labeled notes as a format-1 Standard MIDI File.
///
/// Track 0 is the right hand, track 1 the left. Notes keep their channel,
/// velocity and absolute timing.
pub fn hands_to_midi(
    notes: &[TimedNote],
    assignment: &Assignment,
    context: &MidiFileContext,
    options: &ExportOptions,
) -> crate::Result<Vec<u8>> {
    if notes.len() != assignment.len() {
        return Err(crate::Error::AssignmentLength {
            notes: notes.len(),
            labels: assignment.len(),
        });
    }

    let tracks = [Hand::Right, Hand::Left]
        .into_iter()
        .map(|hand| {
            let hand_notes: Vec<&TimedNote> = notes
                .iter()
                .zip(assignment.labels())
                .filter(|(_, &h)| h == hand)
                .map(|(n, _)| n)
                .collect();
            build_hand_track(hand, &hand_notes, context, options)
        })
        .collect::<crate::Result<Vec<Vec<u8>>>>()?;

    Ok(build_midi_file(context.ppq, &tracks))
}

/// Meta events every hand track starts with.
fn meta_events(context: &MidiFileContext) -> Vec<Vec<u8>> {
    let mut events = Vec::new();

    if let Some(tc) = context.tempo_changes.first() {
        let usec = tc.microseconds_per_beat;
        events.push(vec![
            0xFF,
            0x51,
            0x03,
            (usec >> 16) as u8,
            (usec >> 8) as u8,
            usec as u8,
        ]);
    }

    if let Some(ts) = context.time_signatures.first() {
        let denom_pow = ts.denominator.max(1).trailing_zeros() as u8;
        events.push(vec![0xFF, 0x58, 0x04, ts.numerator, denom_pow, 0x18, 0x08]);
    }

    if let Some(ks) = context.key_signatures.first() {
        events.push(vec![0xFF, 0x59, 0x02, ks.accidentals as u8, ks.minor as u8]);
    }

    events
}

/// Build the track for one hand.
fn build_hand_track(
    hand: Hand,
    notes: &[&TimedNote],
    context: &MidiFileContext,
    options: &ExportOptions,
) -> crate::Result<Vec<u8>> {
    let mut track_data = Vec::new();

    // Track name
    let name_bytes = hand.track_name().as_bytes();
    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x03]);
    write_vlq(&mut track_data, name_bytes.len() as u32);
    track_data.extend_from_slice(name_bytes);

    if options.copy_meta {
        for event in meta_events(context) {
            write_vlq(&mut track_data, 0);
            track_data.extend_from_slice(&event);
        }
    }

    let mut events: Vec<(u64, [u8; 3])> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        let channel = note.channel & 0x0F;
        events.push((note.onset_tick, [0x90 | channel, note.pitch, note.velocity]));
        events.push((note.offset_tick, [0x80 | channel, note.pitch, 0]));
    }

    // Stable sort by tick, note-ons before note-offs at the same tick
    events.sort_by(|a, b| {
        a.0.cmp(&b.0).then_with(|| {
            let a_is_off = a.1[0] & 0xF0 == 0x80;
            let b_is_off = b.1[0] & 0xF0 == 0x80;
            a_is_off.cmp(&b_is_off)
        })
    });

    let mut last_tick = 0u64;
    for (tick, data) in events {
        let delta = tick.saturating_sub(last_tick);
        if delta > MAX_DELTA {
            return Err(crate::Error::TickOverflow { tick, delta });
        }
        write_vlq(&mut track_data, delta as u32);
        track_data.extend_from_slice(&data);
        last_tick = tick;
    }

    // End of track
    write_vlq(&mut track_data, 0);
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    Ok(track_data)
}

/// Assemble a complete MIDI file from track data blobs.
fn build_midi_file(ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();

    // MThd header
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // format 1
    buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppq.to_be_bytes());

    // MTrk chunks
    for track_data in tracks {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        buf.extend_from_slice(track_data);
    }

    buf
}

/// Write a variable-length quantity to a byte buffer.
fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    let mut bytes = [0u8; 4];
    let mut len = 0;

    loop {
        bytes[len] = (value & 0x7F) as u8;
        len += 1;
        value >>= 7;
        if value == 0 || len == bytes.len() {
            break;
        }
    }

    for (i, byte) in bytes[..len].iter().rev().enumerate() {
        let continuation = if i + 1 < len { 0x80 } else { 0 };
        buf.push(byte | continuation);
    }
}
