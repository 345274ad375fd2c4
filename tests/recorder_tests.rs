// Integration tests for the recorder state machine.
//
// A scripted microphone replays listen outcomes, a scripted recognizer maps
// clip ids to transcription results, and a recording sink captures every
// status callback, so each test can drive a full session deterministically.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use voicenote::{
    AudioClip, CaptureError, Config, ListenOutcome, MicrophoneSource, RecognizeError, Recorder,
    RecorderState, SpeechRecognizer, StatusSeverity, StatusSink,
};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Clone, Copy)]
enum ListenStep {
    /// Produce a clip whose first sample carries this id
    Clip(i16),
    Transient,
    Fatal,
}

struct ScriptedMicrophone {
    fail_calibration: bool,
    script: Mutex<VecDeque<ListenStep>>,
    listen_calls: Mutex<usize>,
}

impl ScriptedMicrophone {
    fn new(script: Vec<ListenStep>) -> Self {
        Self {
            fail_calibration: false,
            script: Mutex::new(script.into()),
            listen_calls: Mutex::new(0),
        }
    }

    fn broken() -> Self {
        Self {
            fail_calibration: true,
            script: Mutex::new(VecDeque::new()),
            listen_calls: Mutex::new(0),
        }
    }

    fn push(&self, step: ListenStep) {
        self.script.lock().unwrap().push_back(step);
    }

    fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    fn listen_calls(&self) -> usize {
        *self.listen_calls.lock().unwrap()
    }
}

fn clip(id: i16) -> AudioClip {
    AudioClip {
        samples: vec![id; 1600],
        sample_rate: 16000,
        channels: 1,
    }
}

#[async_trait]
impl MicrophoneSource for ScriptedMicrophone {
    async fn calibrate(&self, _duration: Duration) -> Result<(), CaptureError> {
        if self.fail_calibration {
            Err(CaptureError::Fatal("device unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn listen_once(
        &self,
        _timeout: Duration,
        _max_phrase: Duration,
    ) -> Result<ListenOutcome, CaptureError> {
        *self.listen_calls.lock().unwrap() += 1;
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(ListenStep::Clip(id)) => Ok(ListenOutcome::Phrase(clip(id))),
            Some(ListenStep::Transient) => {
                Err(CaptureError::Transient("stream glitch".to_string()))
            }
            Some(ListenStep::Fatal) => Err(CaptureError::Fatal("device removed".to_string())),
            None => {
                // script exhausted: behave like an empty room
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(ListenOutcome::NoSpeech)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

enum Recognition {
    /// Answer with this text after the given delay
    Text(&'static str, Duration),
    Unintelligible,
    ServiceError,
}

struct ScriptedRecognizer {
    behaviors: Mutex<HashMap<i16, Recognition>>,
}

impl ScriptedRecognizer {
    fn new(behaviors: Vec<(i16, Recognition)>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors.into_iter().collect()),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn transcribe(
        &self,
        clip: &AudioClip,
        _language: &str,
    ) -> Result<String, RecognizeError> {
        let id = clip.samples.first().copied().unwrap_or(0);
        let behavior = self.behaviors.lock().unwrap().remove(&id);
        match behavior {
            Some(Recognition::Text(text, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(text.to_string())
            }
            Some(Recognition::Unintelligible) | None => Err(RecognizeError::Unintelligible),
            Some(Recognition::ServiceError) => {
                Err(RecognizeError::Service("connection refused".to_string()))
            }
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<Vec<(String, StatusSeverity)>>,
    counts: Mutex<Vec<usize>>,
}

impl RecordingSink {
    fn statuses(&self) -> Vec<(String, StatusSeverity)> {
        self.statuses.lock().unwrap().clone()
    }

    fn counts(&self) -> Vec<usize> {
        self.counts.lock().unwrap().clone()
    }

    fn has_status(&self, fragment: &str, severity: StatusSeverity) -> bool {
        self.statuses()
            .iter()
            .any(|(text, s)| *s == severity && text.contains(fragment))
    }
}

impl StatusSink for RecordingSink {
    fn status_changed(&self, text: &str, severity: StatusSeverity) {
        self.statuses
            .lock()
            .unwrap()
            .push((text.to_string(), severity));
    }

    fn segment_count_changed(&self, count: usize) {
        self.counts.lock().unwrap().push(count);
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    recorder: Recorder,
    microphone: Arc<ScriptedMicrophone>,
    sink: Arc<RecordingSink>,
    notes_dir: TempDir,
}

fn harness(microphone: ScriptedMicrophone, recognizer: ScriptedRecognizer) -> Harness {
    let notes_dir = TempDir::new().expect("temp dir");
    let mut config = Config::default();
    config.notes.output_dir = notes_dir.path().to_path_buf();

    let microphone = Arc::new(microphone);
    let sink = Arc::new(RecordingSink::default());
    let recorder = Recorder::new(
        config,
        Arc::clone(&microphone) as Arc<dyn MicrophoneSource>,
        Arc::new(recognizer) as Arc<dyn SpeechRecognizer>,
        Arc::clone(&sink) as Arc<dyn StatusSink>,
    );

    Harness {
        recorder,
        microphone,
        sink,
        notes_dir,
    }
}

fn note_files(dir: &Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .expect("read notes dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn stop_when_idle_is_a_no_op_and_writes_no_file() -> Result<()> {
    let h = harness(ScriptedMicrophone::new(vec![]), ScriptedRecognizer::new(vec![]));

    let summary = h.recorder.stop().await?;

    assert_eq!(summary.segment_count, 0);
    assert!(summary.note_path.is_none());
    assert_eq!(h.recorder.state().await, RecorderState::Idle);
    assert!(note_files(h.notes_dir.path()).is_empty());
    Ok(())
}

#[tokio::test]
async fn pause_toggle_twice_returns_to_recording_with_transcript_intact() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1)]),
        ScriptedRecognizer::new(vec![(1, Recognition::Text("hello", Duration::ZERO))]),
    );

    h.recorder.start().await?;
    settle().await;
    assert_eq!(h.recorder.transcript().await.len(), 1);

    assert!(h.recorder.toggle_pause().await);
    assert_eq!(h.recorder.state().await, RecorderState::Paused);
    settle().await; // let any in-flight listen attempt finish

    // queued clips are not consumed while paused
    h.microphone.push(ListenStep::Clip(2));
    settle().await;
    assert_eq!(h.microphone.remaining(), 1);
    assert_eq!(h.recorder.transcript().await.len(), 1);

    assert!(!h.recorder.toggle_pause().await);
    assert_eq!(h.recorder.state().await, RecorderState::Recording);
    assert_eq!(h.recorder.transcript().await.len(), 1);

    h.recorder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn toggle_pause_when_idle_reports_not_paused() {
    let h = harness(ScriptedMicrophone::new(vec![]), ScriptedRecognizer::new(vec![]));
    assert!(!h.recorder.toggle_pause().await);
    assert_eq!(h.recorder.state().await, RecorderState::Idle);
}

#[tokio::test]
async fn empty_session_writes_no_file_and_reports_no_audio() -> Result<()> {
    let h = harness(ScriptedMicrophone::new(vec![]), ScriptedRecognizer::new(vec![]));

    h.recorder.start().await?;
    let summary = h.recorder.stop().await?;

    assert_eq!(summary.segment_count, 0);
    assert!(summary.note_path.is_none());
    assert!(note_files(h.notes_dir.path()).is_empty());
    assert!(h.sink.has_status("No audio recorded", StatusSeverity::Warning));
    Ok(())
}

#[tokio::test]
async fn segments_accumulate_in_completion_order_into_the_note() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![
            ListenStep::Clip(1),
            ListenStep::Clip(2),
            ListenStep::Clip(3),
        ]),
        ScriptedRecognizer::new(vec![
            (1, Recognition::Text("hello", Duration::from_millis(10))),
            (2, Recognition::Text("world", Duration::from_millis(60))),
            (3, Recognition::Text("test", Duration::from_millis(120))),
        ]),
    );

    h.recorder.start().await?;
    settle().await;
    let summary = h.recorder.stop().await?;

    assert_eq!(summary.segment_count, 3);
    let path = summary.note_path.expect("note should be saved");
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("note_") && name.ends_with(".txt"));
    assert_eq!(fs::read_to_string(&path)?, "hello world test");

    // the sink saw the count grow monotonically
    assert_eq!(h.sink.counts(), vec![0, 1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn out_of_order_completion_is_recorded_in_completion_order() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1), ListenStep::Clip(2)]),
        ScriptedRecognizer::new(vec![
            (1, Recognition::Text("alpha", Duration::from_millis(150))),
            (2, Recognition::Text("bravo", Duration::from_millis(10))),
        ]),
    );

    h.recorder.start().await?;
    settle().await;
    let summary = h.recorder.stop().await?;

    let transcript = h.recorder.transcript().await;
    assert_eq!(transcript.len(), 2);
    // clip 2 finished first, so it comes first despite being captured second
    assert_eq!(transcript[0].text, "bravo");
    assert_eq!(transcript[0].sequence, 1);
    assert_eq!(transcript[1].text, "alpha");
    assert_eq!(transcript[1].sequence, 0);

    let path = summary.note_path.expect("note should be saved");
    assert_eq!(fs::read_to_string(&path)?, "bravo alpha");
    Ok(())
}

#[tokio::test]
async fn unintelligible_clip_contributes_no_segment_and_no_count_update() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1)]),
        ScriptedRecognizer::new(vec![(1, Recognition::Unintelligible)]),
    );

    h.recorder.start().await?;
    settle().await;
    let summary = h.recorder.stop().await?;

    assert_eq!(summary.segment_count, 0);
    assert!(summary.note_path.is_none());
    // only the reset at start; no increments
    assert_eq!(h.sink.counts(), vec![0]);
    Ok(())
}

#[tokio::test]
async fn calibration_failure_leaves_recorder_idle_with_no_task() -> Result<()> {
    let h = harness(ScriptedMicrophone::broken(), ScriptedRecognizer::new(vec![]));

    let result = h.recorder.start().await;

    assert!(result.is_err());
    assert_eq!(h.recorder.state().await, RecorderState::Idle);
    assert!(h.sink.has_status("Error accessing microphone", StatusSeverity::Error));

    // no capture loop was spawned
    settle().await;
    assert_eq!(h.microphone.listen_calls(), 0);

    let summary = h.recorder.stop().await?;
    assert!(summary.note_path.is_none());
    assert!(note_files(h.notes_dir.path()).is_empty());
    Ok(())
}

#[tokio::test]
async fn service_error_surfaces_a_warning_and_drops_the_clip() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1)]),
        ScriptedRecognizer::new(vec![(1, Recognition::ServiceError)]),
    );

    h.recorder.start().await?;
    settle().await;
    let summary = h.recorder.stop().await?;

    assert_eq!(summary.segment_count, 0);
    assert!(summary.note_path.is_none());
    assert!(h.sink.has_status("Network error", StatusSeverity::Warning));
    Ok(())
}

#[tokio::test]
async fn transient_capture_error_warns_and_keeps_listening() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Transient, ListenStep::Clip(1)]),
        ScriptedRecognizer::new(vec![(1, Recognition::Text("still here", Duration::ZERO))]),
    );

    h.recorder.start().await?;
    settle().await;
    let summary = h.recorder.stop().await?;

    assert!(h.sink.has_status("Error", StatusSeverity::Warning));
    assert_eq!(summary.segment_count, 1);
    Ok(())
}

#[tokio::test]
async fn fatal_capture_error_ends_the_loop_but_keeps_earlier_segments() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1), ListenStep::Fatal]),
        ScriptedRecognizer::new(vec![(1, Recognition::Text("partial", Duration::ZERO))]),
    );

    h.recorder.start().await?;
    settle().await;

    assert!(h.sink.has_status("Fatal error", StatusSeverity::Error));
    let calls_after_fatal = h.microphone.listen_calls();
    settle().await;
    // the loop stopped listening after the fatal error
    assert_eq!(h.microphone.listen_calls(), calls_after_fatal);

    let summary = h.recorder.stop().await?;
    assert_eq!(summary.segment_count, 1);
    let path = summary.note_path.expect("note should be saved");
    assert_eq!(fs::read_to_string(&path)?, "partial");
    Ok(())
}

#[tokio::test]
async fn starting_twice_is_harmless() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1)]),
        ScriptedRecognizer::new(vec![(1, Recognition::Text("once", Duration::ZERO))]),
    );

    h.recorder.start().await?;
    settle().await;
    h.recorder.start().await?;

    assert_eq!(h.recorder.transcript().await.len(), 1);
    assert_eq!(h.recorder.state().await, RecorderState::Recording);
    h.recorder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn restart_clears_the_previous_transcript() -> Result<()> {
    let h = harness(
        ScriptedMicrophone::new(vec![ListenStep::Clip(1)]),
        ScriptedRecognizer::new(vec![(1, Recognition::Text("first session", Duration::ZERO))]),
    );

    h.recorder.start().await?;
    settle().await;
    h.recorder.stop().await?;
    assert_eq!(h.recorder.transcript().await.len(), 1);

    h.recorder.start().await?;
    assert!(h.recorder.transcript().await.is_empty());
    let summary = h.recorder.stop().await?;
    assert_eq!(summary.segment_count, 0);
    Ok(())
}
