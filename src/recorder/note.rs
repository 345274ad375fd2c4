use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::transcript::{join_text, TranscriptSegment};

/// Note file name for a session stopped at `at`, local time
pub fn note_filename(at: DateTime<Local>) -> String {
    format!("note_{}.txt", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Write the transcript to a timestamped note file and return its path.
///
/// Callers must not invoke this with an empty transcript; empty sessions
/// write no file.
pub fn write_note(output_dir: &Path, segments: &[TranscriptSegment]) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create notes directory {output_dir:?}"))?;

    let path = output_dir.join(note_filename(Local::now()));
    fs::write(&path, join_text(segments))
        .with_context(|| format!("Failed to write note file {path:?}"))?;

    info!("Note saved: {} ({} segments)", path.display(), segments.len());
    Ok(path)
}
