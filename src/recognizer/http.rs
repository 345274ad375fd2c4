use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{RecognizeError, SpeechRecognizer};
use crate::audio::AudioClip;
use crate::config::RecognizerConfig;

/// Speech recognizer backed by an OpenAI-compatible transcription endpoint.
///
/// Multipart form upload with `model`, `language` and `file` fields,
/// Bearer-token auth, JSON response with a `text` field.
pub struct HttpRecognizer {
    client: reqwest::Client,
    config: RecognizerConfig,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpRecognizer {
    pub fn new(config: RecognizerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn transcribe(
        &self,
        clip: &AudioClip,
        language: &str,
    ) -> Result<String, RecognizeError> {
        let wav = clip
            .wav_bytes()
            .map_err(|e| RecognizeError::Service(format!("failed to encode clip: {e}")))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.config.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("clip.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| RecognizeError::Service(e.to_string()))?,
            );
        if !language.is_empty() {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RecognizeError::Service(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RecognizeError::Service(format!(
                "API error ({status}): {body}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RecognizeError::Service(format!("failed to read response: {e}")))?;
        let parsed: TranscriptionResponse = serde_json::from_str(&body)
            .map_err(|e| RecognizeError::Service(format!("bad API response: {e}")))?;

        let text = parsed.text.trim();
        if text.is_empty() {
            // the service answered but heard nothing usable
            return Err(RecognizeError::Unintelligible);
        }

        debug!(chars = text.len(), "clip transcribed");
        Ok(text.to_string())
    }
}
