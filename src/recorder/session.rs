use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::note;
use super::state::RecorderState;
use super::status::{StatusSeverity, StatusSink};
use super::transcript::TranscriptSegment;
use crate::audio::{ListenOutcome, MicrophoneSource};
use crate::config::{CaptureConfig, Config};
use crate::recognizer::{RecognizeError, SpeechRecognizer};

/// Final shape of a recording session, returned by `stop`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub segment_count: usize,
    /// Path of the saved note; None when nothing was recorded
    pub note_path: Option<PathBuf>,
}

/// Voice note recorder: captures phrases while active, fans each one out to
/// the recognizer, and collects recognized text into a transcript that is
/// written to a timestamped note file on stop.
pub struct Recorder {
    session_id: String,
    capture: CaptureConfig,
    language: String,
    notes_dir: PathBuf,

    microphone: Arc<dyn MicrophoneSource>,
    recognizer: Arc<dyn SpeechRecognizer>,
    status: Arc<dyn StatusSink>,

    state: Arc<Mutex<RecorderState>>,

    /// Accumulated transcript; written only by the appender task
    segments: Arc<Mutex<Vec<TranscriptSegment>>>,

    started_at: Mutex<DateTime<Utc>>,
    cancel: Mutex<Option<CancellationToken>>,
    capture_handle: Mutex<Option<JoinHandle<()>>>,
    appender_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    pub fn new(
        config: Config,
        microphone: Arc<dyn MicrophoneSource>,
        recognizer: Arc<dyn SpeechRecognizer>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            session_id: format!("note-{}", uuid::Uuid::new_v4()),
            capture: config.capture,
            language: config.recognizer.language,
            notes_dir: config.notes.output_dir,
            microphone,
            recognizer,
            status,
            state: Arc::new(Mutex::new(RecorderState::Idle)),
            segments: Arc::new(Mutex::new(Vec::new())),
            started_at: Mutex::new(Utc::now()),
            cancel: Mutex::new(None),
            capture_handle: Mutex::new(None),
            appender_handle: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> RecorderState {
        *self.state.lock().await
    }

    /// Get the transcript accumulated so far
    pub async fn transcript(&self) -> Vec<TranscriptSegment> {
        self.segments.lock().await.clone()
    }

    /// Start recording.
    ///
    /// Probes the microphone with a short calibration read first; on device
    /// failure the error is surfaced to the status sink, no background task
    /// is spawned, and the recorder stays Idle.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.is_active() {
                warn!("recording already started");
                return Ok(());
            }
        }

        info!(
            "Starting session {} on {}",
            self.session_id,
            self.microphone.name()
        );

        if let Err(e) = self.microphone.calibrate(self.capture.calibration()).await {
            let msg = format!("Error accessing microphone: {e}");
            error!("{msg}");
            self.status.status_changed(&msg, StatusSeverity::Error);
            return Err(anyhow::anyhow!(msg));
        }

        self.segments.lock().await.clear();
        self.status.segment_count_changed(0);
        *self.started_at.lock().await = Utc::now();
        *self.state.lock().await = RecorderState::Recording;

        let cancel = CancellationToken::new();
        {
            let mut slot = self.cancel.lock().await;
            *slot = Some(cancel.clone());
        }

        let (segment_tx, segment_rx) = mpsc::unbounded_channel::<(u64, String)>();

        let appender = tokio::spawn(append_segments(
            segment_rx,
            Arc::clone(&self.segments),
            Arc::clone(&self.status),
        ));
        {
            let mut slot = self.appender_handle.lock().await;
            *slot = Some(appender);
        }

        let worker = CaptureWorker {
            microphone: Arc::clone(&self.microphone),
            recognizer: Arc::clone(&self.recognizer),
            status: Arc::clone(&self.status),
            state: Arc::clone(&self.state),
            capture: self.capture.clone(),
            language: self.language.clone(),
            segment_tx,
        };
        let capture = tokio::spawn(worker.run(cancel));
        {
            let mut slot = self.capture_handle.lock().await;
            *slot = Some(capture);
        }

        self.status
            .status_changed("Recording...", StatusSeverity::Info);
        Ok(())
    }

    /// Stop recording and save the note.
    ///
    /// Signals the capture loop to exit at its next polling point, waits for
    /// in-flight transcriptions to drain (bounded by the recognizer timeout),
    /// then writes the note file when the transcript is non-empty. Calling
    /// stop while Idle is a no-op that writes nothing.
    pub async fn stop(&self) -> Result<SessionSummary> {
        {
            let mut state = self.state.lock().await;
            if !state.is_active() {
                warn!("recorder not active");
                return self.summary(None).await;
            }
            *state = RecorderState::Idle;
        }

        info!("Stopping session {}", self.session_id);

        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }

        if let Some(task) = self.capture_handle.lock().await.take() {
            if let Err(e) = task.await {
                error!("capture task panicked: {e}");
            }
        }

        // the appender exits once the capture loop and every dispatcher
        // task have dropped their senders
        if let Some(task) = self.appender_handle.lock().await.take() {
            if let Err(e) = task.await {
                error!("appender task panicked: {e}");
            }
        }

        let segments = self.segments.lock().await.clone();
        if segments.is_empty() {
            self.status
                .status_changed("No audio recorded", StatusSeverity::Warning);
            return self.summary(None).await;
        }

        let path = note::write_note(&self.notes_dir, &segments)
            .context("Failed to save note file")?;
        self.status.status_changed(
            &format!("Note saved as {}", path.display()),
            StatusSeverity::Info,
        );

        self.summary(Some(path)).await
    }

    /// Flip Recording and Paused; returns whether the recorder is now paused.
    ///
    /// The capture loop stays alive while Paused so resuming never
    /// re-acquires the microphone. A no-op when Idle.
    pub async fn toggle_pause(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            RecorderState::Recording => {
                *state = RecorderState::Paused;
                self.status
                    .status_changed("Recording paused", StatusSeverity::Info);
                true
            }
            RecorderState::Paused => {
                *state = RecorderState::Recording;
                self.status
                    .status_changed("Recording...", StatusSeverity::Info);
                false
            }
            RecorderState::Idle => false,
        }
    }

    async fn summary(&self, note_path: Option<PathBuf>) -> Result<SessionSummary> {
        let started_at = *self.started_at.lock().await;
        let duration = Utc::now().signed_duration_since(started_at);
        let segment_count = self.segments.lock().await.len();

        Ok(SessionSummary {
            session_id: self.session_id.clone(),
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            segment_count,
            note_path,
        })
    }
}

struct CaptureWorker {
    microphone: Arc<dyn MicrophoneSource>,
    recognizer: Arc<dyn SpeechRecognizer>,
    status: Arc<dyn StatusSink>,
    state: Arc<Mutex<RecorderState>>,
    capture: CaptureConfig,
    language: String,
    segment_tx: mpsc::UnboundedSender<(u64, String)>,
}

impl CaptureWorker {
    /// Long-lived capture loop: listen for one phrase at a time while
    /// Recording, idle while Paused, exit when cancelled or the device
    /// becomes unusable. Capture and transcription are decoupled so network
    /// latency never blocks the microphone.
    async fn run(self, cancel: CancellationToken) {
        info!("capture loop started");
        let mut sequence: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let state = *self.state.lock().await;
            match state {
                RecorderState::Idle => break,
                RecorderState::Paused => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.capture.pause_poll()) => {}
                    }
                }
                RecorderState::Recording => {
                    let listen = tokio::select! {
                        _ = cancel.cancelled() => break,
                        outcome = self.microphone.listen_once(
                            self.capture.listen_timeout(),
                            self.capture.max_phrase(),
                        ) => outcome,
                    };

                    match listen {
                        Ok(ListenOutcome::NoSpeech) => {}
                        Ok(ListenOutcome::Phrase(clip)) => {
                            let seq = sequence;
                            sequence += 1;
                            debug!(
                                seq,
                                duration_ms = clip.duration().as_millis() as u64,
                                "clip captured, dispatching"
                            );
                            self.dispatch(seq, clip);
                        }
                        Err(e) if e.is_fatal() => {
                            error!("fatal capture error: {e}");
                            self.status.status_changed(
                                &format!("Fatal error: {e}"),
                                StatusSeverity::Error,
                            );
                            break;
                        }
                        Err(e) => {
                            warn!("capture error: {e}");
                            self.status
                                .status_changed(&format!("Error: {e}"), StatusSeverity::Warning);
                        }
                    }
                }
            }
        }

        info!("capture loop stopped");
        // dropping self releases segment_tx so the appender can drain
    }

    /// Spawn one short-lived transcription task per clip. Tasks run
    /// concurrently and unordered; completions are serialized by the
    /// appender's channel.
    fn dispatch(&self, sequence: u64, clip: crate::audio::AudioClip) {
        let recognizer = Arc::clone(&self.recognizer);
        let status = Arc::clone(&self.status);
        let segment_tx = self.segment_tx.clone();
        let language = self.language.clone();

        tokio::spawn(async move {
            match recognizer.transcribe(&clip, &language).await {
                Ok(text) => {
                    if segment_tx.send((sequence, text)).is_err() {
                        debug!(sequence, "transcript channel closed, segment dropped");
                    }
                }
                Err(RecognizeError::Unintelligible) => {
                    debug!(sequence, "could not understand audio");
                }
                Err(e @ RecognizeError::Service(_)) => {
                    warn!(sequence, "transcription failed: {e}");
                    status.status_changed(&format!("Network error: {e}"), StatusSeverity::Warning);
                }
            }
        });
    }
}

/// Single consumer of dispatcher completions; the only writer of the
/// transcript, so append order is completion order.
async fn append_segments(
    mut segment_rx: mpsc::UnboundedReceiver<(u64, String)>,
    segments: Arc<Mutex<Vec<TranscriptSegment>>>,
    status: Arc<dyn StatusSink>,
) {
    while let Some((sequence, text)) = segment_rx.recv().await {
        let count = {
            let mut segments = segments.lock().await;
            segments.push(TranscriptSegment {
                text,
                sequence,
                completed_at: Utc::now(),
            });
            segments.len()
        };
        status.segment_count_changed(count);
    }
    debug!("transcript appender stopped");
}
