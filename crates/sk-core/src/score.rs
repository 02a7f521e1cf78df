//! Score model and note grouping
//!
//! A loader hands us a flat list of `{time, key}` records. Playback works on
//! [`NoteEvent`]s instead: every key that shares a timestamp is merged into a
//! single event so the dispatcher fires them together.
//!
//! ```text
//!   raw:    (0,A) (0,B) (500,C) (501,D)
//!   events: [0: A B] [500: C] [501: D]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{SkError, SkResult};

// ═══════════════════════════════════════════════════════════════════════════════
// RAW NOTES
// ═══════════════════════════════════════════════════════════════════════════════

/// One note record as produced by a sheet loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNote {
    /// Scheduled time in milliseconds from the start of the song
    pub time: u64,
    /// Note identifier, resolved through a [`crate::KeyMapping`]
    pub key: String,
}

impl RawNote {
    pub fn new(time: u64, key: impl Into<String>) -> Self {
        Self {
            time,
            key: key.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOTE EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// All notes sharing one timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    time: u64,
    keys: Vec<String>,
}

impl NoteEvent {
    pub fn new(time: u64, keys: Vec<String>) -> Self {
        Self { time, keys }
    }

    /// Scheduled time in milliseconds
    #[inline]
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Keys in the order they were encountered in the raw list
    #[inline]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Group raw notes into events, keeping only notes at or after `start_time`.
///
/// Consecutive records with an identical `time` collapse into one event.
/// Input must already be sorted ascending; nothing is reordered here.
pub fn group_notes<'a, I>(raw: I, start_time: u64) -> Vec<NoteEvent>
where
    I: IntoIterator<Item = &'a RawNote>,
{
    let mut events: Vec<NoteEvent> = Vec::new();

    for note in raw.into_iter().filter(|n| n.time >= start_time) {
        match events.last_mut() {
            Some(last) if last.time == note.time => last.keys.push(note.key.clone()),
            _ => events.push(NoteEvent::new(note.time, vec![note.key.clone()])),
        }
    }

    events
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCORE
// ═══════════════════════════════════════════════════════════════════════════════

/// A validated, grouped, playable score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    events: Vec<NoteEvent>,
}

impl Score {
    /// Build a score from loader output.
    ///
    /// Fails on an empty list or on a list that is not sorted by time.
    pub fn from_raw(raw: &[RawNote]) -> SkResult<Self> {
        if raw.is_empty() {
            return Err(SkError::EmptyScore);
        }

        for (index, pair) in raw.windows(2).enumerate() {
            if pair[1].time < pair[0].time {
                return Err(SkError::UnsortedScore {
                    index: index + 1,
                    time: pair[1].time,
                    previous: pair[0].time,
                });
            }
        }

        Ok(Self {
            events: group_notes(raw, 0),
        })
    }

    /// All events, ascending by time
    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Events scheduled at or after `start_time`
    pub fn events_from(&self, start_time: u64) -> Vec<NoteEvent> {
        let first = self.events.partition_point(|e| e.time < start_time);
        self.events[first..].to_vec()
    }

    /// Time of the terminal event, which is also the song duration
    pub fn last_time(&self) -> u64 {
        self.events.last().map_or(0, NoteEvent::time)
    }

    /// Number of grouped events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total number of individual notes across all events
    pub fn note_count(&self) -> usize {
        self.events.iter().map(|e| e.keys.len()).sum()
    }
}
