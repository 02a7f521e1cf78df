//! Note → action lookup
//!
//! The playback engine never interprets actions. It hands the mapped string
//! to whatever note actuator is plugged in (key simulator, sampler, logger).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Key mapping from sheet note identifiers to actuator actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMapping {
    entries: HashMap<String, String>,
}

impl KeyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping used by the sky-music JSON sheets: two 15-key layers
    /// (`1Key0..1Key14`, `2Key0..2Key14`) onto `C4..C6`.
    pub fn sky_default() -> Self {
        const PITCHES: [&str; 15] = [
            "C4", "D4", "E4", "F4", "G4", "A4", "B4", "C5", "D5", "E5", "F5", "G5", "A5", "B5",
            "C6",
        ];

        let mut mapping = Self::new();
        for layer in 1..=2 {
            for (index, pitch) in PITCHES.iter().enumerate() {
                mapping.insert(format!("{layer}Key{index}"), *pitch);
            }
        }
        mapping
    }

    /// Add or replace one entry
    pub fn insert(&mut self, key: impl Into<String>, action: impl Into<String>) {
        self.entries.insert(key.into(), action.into());
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, action: impl Into<String>) -> Self {
        self.insert(key, action);
        self
    }

    /// Resolve a note key. `None` means the note is skipped.
    #[inline]
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for KeyMapping
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
