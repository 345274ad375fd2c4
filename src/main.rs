use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use voicenote::{Config, CpalMicrophone, HttpRecognizer, LogStatusSink, Recorder};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = Config::load("config/voicenote")?;

    info!("Voicenote v0.1.0");
    info!("Notes directory: {}", cfg.notes.output_dir.display());

    let microphone = Arc::new(CpalMicrophone::new(cfg.capture.clone()));
    let recognizer = Arc::new(HttpRecognizer::new(cfg.recognizer.clone())?);
    let recorder = Recorder::new(cfg, microphone, recognizer, Arc::new(LogStatusSink));

    recorder.start().await?;
    info!("Recording; press Ctrl-C to stop and save the note");

    tokio::signal::ctrl_c().await?;

    let summary = recorder.stop().await?;
    match summary.note_path {
        Some(path) => info!(
            "Saved {} segments to {}",
            summary.segment_count,
            path.display()
        ),
        None => info!("No audio recorded"),
    }

    Ok(())
}
