mod http;

pub use http::HttpRecognizer;

use crate::audio::AudioClip;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognizeError {
    /// The service could not map the audio to text; the clip is dropped
    #[error("could not understand audio")]
    Unintelligible,
    /// Network or API failure; surfaced as a status warning, never retried
    #[error("transcription service error: {0}")]
    Service(String),
}

/// Cloud speech-to-text client
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Convert one clip into text using the given language tag
    async fn transcribe(&self, clip: &AudioClip, language: &str)
        -> Result<String, RecognizeError>;
}
