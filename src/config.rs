use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub recognizer: RecognizerConfig,
    pub notes: NotesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; None selects the host default
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Ambient-noise sampling window used to set the energy threshold
    pub calibration_secs: u64,
    /// How long one listen attempt waits for speech to begin
    pub listen_timeout_secs: u64,
    /// Upper bound on a single captured phrase
    pub max_phrase_secs: u64,
    /// Trailing silence that ends a phrase
    pub silence_window_ms: u64,
    /// How often the capture loop re-checks state while paused
    pub pause_poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 16000,
            calibration_secs: 1,
            listen_timeout_secs: 1,
            max_phrase_secs: 10,
            silence_window_ms: 800,
            pause_poll_ms: 150,
        }
    }
}

impl CaptureConfig {
    pub fn calibration(&self) -> Duration {
        Duration::from_secs(self.calibration_secs)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn max_phrase(&self) -> Duration {
        Duration::from_secs(self.max_phrase_secs)
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Language tag sent with every request
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            language: "en-IN".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Directory note files are written into at stop
    pub output_dir: PathBuf,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
