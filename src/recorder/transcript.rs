use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single recognized text segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// Order the clip was captured in. Segments are appended in completion
    /// order, so sequence numbers may arrive out of order.
    pub sequence: u64,

    /// When the transcription completed
    pub completed_at: DateTime<Utc>,
}

/// Join segments into the note body, single-space separated
pub fn join_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|segment| segment.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
