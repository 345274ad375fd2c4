pub mod audio;
pub mod config;
pub mod recognizer;
pub mod recorder;

pub use audio::{AudioClip, CaptureError, CpalMicrophone, ListenOutcome, MicrophoneSource};
pub use config::Config;
pub use recognizer::{HttpRecognizer, RecognizeError, SpeechRecognizer};
pub use recorder::{
    LogStatusSink, Recorder, RecorderState, SessionSummary, StatusSeverity, StatusSink,
    TranscriptSegment,
};
