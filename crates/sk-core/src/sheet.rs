//! Sheet loading
//!
//! Sheets are JSON files holding an array whose first element describes the
//! song. Only `songNotes` matters for playback; the rest is metadata.
//!
//! ```json
//! [{ "name": "Song", "bpm": 300, "songNotes": [{ "time": 0, "key": "1Key0" }] }]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{SkError, SkResult};
use crate::score::{RawNote, Score};

/// File extensions recognised as sheets
pub const SHEET_EXTENSIONS: [&str; 3] = ["json", "txt", "skysheet"];

/// One song as stored in a sheet file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SongSheet {
    pub name: String,
    pub author: String,
    pub bpm: u32,
    pub pitch_level: i32,
    pub song_notes: Vec<RawNote>,
}

impl Default for SongSheet {
    fn default() -> Self {
        Self {
            name: String::new(),
            author: String::new(),
            bpm: 300,
            pitch_level: 1,
            song_notes: Vec::new(),
        }
    }
}

impl SongSheet {
    /// Validate and group the notes into a playable score
    pub fn to_score(&self) -> SkResult<Score> {
        Score::from_raw(&self.song_notes)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SheetFile {
    Many(Vec<SongSheet>),
    One(SongSheet),
}

/// Parse sheet JSON text, returning the first song it contains
pub fn parse_sheet(text: &str) -> SkResult<SongSheet> {
    // Some exporters prepend a UTF-8 BOM.
    let text = text.trim_start_matches('\u{feff}');

    match serde_json::from_str::<SheetFile>(text)? {
        SheetFile::One(sheet) => Ok(sheet),
        SheetFile::Many(sheets) => sheets
            .into_iter()
            .next()
            .ok_or_else(|| SkError::InvalidSheet("sheet array is empty".to_string())),
    }
}

/// Load a sheet file from disk
pub fn load_sheet(path: impl AsRef<Path>) -> SkResult<SongSheet> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SkError::SheetNotFound(path.display().to_string()));
    }

    let text = fs::read_to_string(path)?;
    let sheet = parse_sheet(&text).map_err(|e| match e {
        SkError::Json(err) => SkError::InvalidSheet(format!("{}: {}", path.display(), err)),
        other => other,
    })?;

    log::debug!(
        "[Sheet] Loaded '{}' ({} notes) from {}",
        sheet.name,
        sheet.song_notes.len(),
        path.display()
    );
    Ok(sheet)
}

/// List sheet files under `dir` (recursive), sorted by path
pub fn list_sheets(dir: impl AsRef<Path>) -> SkResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(SkError::SheetNotFound(dir.display().to_string()));
    }

    let mut sheets: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("[Sheet] Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_sheet_extension(path))
        .collect();

    sheets.sort();
    Ok(sheets)
}

fn has_sheet_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SHEET_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}
