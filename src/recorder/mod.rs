pub mod note;
pub mod session;
pub mod state;
pub mod status;
pub mod transcript;

pub use session::{Recorder, SessionSummary};
pub use state::RecorderState;
pub use status::{LogStatusSink, StatusSeverity, StatusSink};
pub use transcript::{join_text, TranscriptSegment};
