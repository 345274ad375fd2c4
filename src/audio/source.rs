use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

/// One bounded-duration recording of a single spoken phrase (16-bit PCM)
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Encode the clip as an in-memory WAV file for upload
    pub fn wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .context("Failed to create WAV encoder")?;
            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to encode sample")?;
            }
            writer.finalize().context("Failed to finalize WAV data")?;
        }

        Ok(cursor.into_inner())
    }
}

/// Result of one listen attempt
#[derive(Debug)]
pub enum ListenOutcome {
    /// A phrase was captured
    Phrase(AudioClip),
    /// No speech within the listen window; not an error
    NoSpeech,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Recoverable device hiccup; the capture loop logs it and keeps going
    #[error("capture device error: {0}")]
    Transient(String),
    /// The device is unusable; the capture loop must terminate
    #[error("capture device unusable: {0}")]
    Fatal(String),
}

impl CaptureError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Fatal(_))
    }
}

/// Microphone capture source
///
/// Implementations:
/// - `CpalMicrophone`: cpal input stream on a dedicated thread
/// - test doubles that replay scripted outcomes
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Sample ambient noise for `duration` and set the speech energy threshold.
    ///
    /// Doubles as the device probe at start: fails with `CaptureError::Fatal`
    /// when the input device cannot be opened.
    async fn calibrate(&self, duration: Duration) -> Result<(), CaptureError>;

    /// Capture at most one phrase.
    ///
    /// Waits up to `timeout` for speech to begin; once speech starts, records
    /// until a trailing silence window or `max_phrase` elapses.
    async fn listen_once(
        &self,
        timeout: Duration,
        max_phrase: Duration,
    ) -> Result<ListenOutcome, CaptureError>;

    /// Get source name for logging
    fn name(&self) -> &str;
}
