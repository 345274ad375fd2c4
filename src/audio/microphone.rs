use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::source::{AudioClip, CaptureError, ListenOutcome, MicrophoneSource};
use crate::config::CaptureConfig;

/// Speech threshold used before the first calibration
const DEFAULT_ENERGY_THRESHOLD: f32 = 0.015;

/// Headroom multiplied onto the measured ambient level
const AMBIENT_MARGIN: f32 = 2.0;

const MIN_ENERGY_THRESHOLD: f32 = 0.005;
const MAX_ENERGY_THRESHOLD: f32 = 0.2;

/// How often the blocking listen path polls the sample channel
const BLOCK_POLL: Duration = Duration::from_millis(50);

/// Microphone source backed by a cpal input stream.
///
/// The stream lives on a dedicated thread (cpal streams are not Send) and
/// pushes sample blocks through a channel; the blocking phrase assembly runs
/// under `spawn_blocking`. The stream stays open across pauses so resuming
/// never re-acquires the device.
pub struct CpalMicrophone {
    inner: Arc<MicInner>,
    name: String,
}

impl CpalMicrophone {
    pub fn new(config: CaptureConfig) -> Self {
        let name = config
            .device
            .clone()
            .unwrap_or_else(|| "default input".to_string());

        Self {
            inner: Arc::new(MicInner {
                target_sample_rate: config.sample_rate,
                silence_window: config.silence_window(),
                device: config.device,
                worker: Mutex::new(None),
                threshold: Mutex::new(DEFAULT_ENERGY_THRESHOLD),
            }),
            name,
        }
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn calibrate(&self, duration: Duration) -> Result<(), CaptureError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.calibrate_blocking(duration))
            .await
            .map_err(|e| CaptureError::Fatal(format!("calibration task failed: {e}")))?
    }

    async fn listen_once(
        &self,
        timeout: Duration,
        max_phrase: Duration,
    ) -> Result<ListenOutcome, CaptureError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.listen_blocking(timeout, max_phrase))
            .await
            .map_err(|e| CaptureError::Fatal(format!("listen task failed: {e}")))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct MicInner {
    device: Option<String>,
    target_sample_rate: u32,
    silence_window: Duration,
    worker: Mutex<Option<MicWorker>>,
    threshold: Mutex<f32>,
}

/// Handle to the stream thread; dropping it closes the stream
struct MicWorker {
    blocks: Receiver<Vec<f32>>,
    _stop: Sender<()>,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
}

impl MicInner {
    fn calibrate_blocking(&self, duration: Duration) -> Result<(), CaptureError> {
        let mut slot = self.worker.lock().unwrap();
        let worker = self.ensure_worker(&mut slot)?;
        drain_pending(worker);

        let deadline = Instant::now() + duration;
        let mut sum_sq = 0.0f64;
        let mut count = 0usize;

        while Instant::now() < deadline {
            match worker.blocks.recv_timeout(BLOCK_POLL) {
                Ok(block) => {
                    sum_sq += block.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
                    count += block.len();
                }
                Err(RecvTimeoutError::Timeout) => {
                    if worker.failed.load(Ordering::Acquire) {
                        return Err(CaptureError::Fatal(
                            "input stream failed during calibration".to_string(),
                        ));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Fatal("microphone thread exited".to_string()));
                }
            }
        }

        if count == 0 {
            return Err(CaptureError::Fatal(
                "no audio received from input device".to_string(),
            ));
        }

        let ambient = (sum_sq / count as f64).sqrt() as f32;
        let threshold =
            (ambient * AMBIENT_MARGIN).clamp(MIN_ENERGY_THRESHOLD, MAX_ENERGY_THRESHOLD);
        *self.threshold.lock().unwrap() = threshold;

        debug!(ambient, threshold, "microphone calibrated");
        Ok(())
    }

    fn listen_blocking(
        &self,
        timeout: Duration,
        max_phrase: Duration,
    ) -> Result<ListenOutcome, CaptureError> {
        let mut slot = self.worker.lock().unwrap();
        let worker = self.ensure_worker(&mut slot)?;
        let threshold = *self.threshold.lock().unwrap();

        // stale audio from before this listen attempt is not part of the phrase
        drain_pending(worker);

        let mut phrase: Vec<f32> = Vec::new();

        // wait for speech onset
        let wait_deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= wait_deadline {
                return Ok(ListenOutcome::NoSpeech);
            }
            match worker.blocks.recv_timeout(BLOCK_POLL) {
                Ok(block) => {
                    if rms(&block) >= threshold {
                        phrase.extend_from_slice(&block);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if worker.failed.load(Ordering::Acquire) {
                        return Err(CaptureError::Transient(
                            "input stream error while listening".to_string(),
                        ));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Fatal("microphone thread exited".to_string()));
                }
            }
        }

        // record until trailing silence or the phrase cap
        let started = Instant::now();
        let mut last_voiced = Instant::now();
        loop {
            if started.elapsed() >= max_phrase || last_voiced.elapsed() >= self.silence_window {
                break;
            }
            match worker.blocks.recv_timeout(BLOCK_POLL) {
                Ok(block) => {
                    if rms(&block) >= threshold {
                        last_voiced = Instant::now();
                    }
                    phrase.extend_from_slice(&block);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if worker.failed.load(Ordering::Acquire) {
                        return Err(CaptureError::Transient(
                            "input stream error during capture".to_string(),
                        ));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Fatal("microphone thread exited".to_string()));
                }
            }
        }

        let clip = assemble_clip(
            phrase,
            worker.sample_rate,
            worker.channels,
            self.target_sample_rate,
        );
        debug!(duration_ms = clip.duration().as_millis() as u64, "phrase captured");
        Ok(ListenOutcome::Phrase(clip))
    }

    /// Spawn the stream thread if there is none yet, or replace one whose
    /// stream reported an error.
    fn ensure_worker<'a>(
        &self,
        slot: &'a mut Option<MicWorker>,
    ) -> Result<&'a mut MicWorker, CaptureError> {
        let dead = slot
            .as_ref()
            .map(|w| w.failed.load(Ordering::Acquire))
            .unwrap_or(true);
        if dead {
            if slot.take().is_some() {
                warn!("restarting failed input stream");
            }
            *slot = Some(self.spawn_worker()?);
        }
        Ok(slot.as_mut().unwrap())
    }

    fn spawn_worker(&self) -> Result<MicWorker, CaptureError> {
        let device_name = self.device.clone();
        let (block_tx, block_rx) = bounded::<Vec<f32>>(256);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<Result<(u32, u16), String>>(1);
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = Arc::clone(&failed);

        std::thread::Builder::new()
            .name("voicenote-mic".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match find_device(&host, device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let supported = match device.default_input_config() {
                    Ok(config) => config,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("no usable input config: {e}")));
                        return;
                    }
                };
                let sample_format = supported.sample_format();
                let config: StreamConfig = supported.config();

                let stream = match sample_format {
                    SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, block_tx, failed_flag)
                    }
                    SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, block_tx, failed_flag)
                    }
                    SampleFormat::U16 => {
                        build_stream::<u16>(&device, &config, block_tx, failed_flag)
                    }
                    other => {
                        let _ = ready_tx.send(Err(format!("unsupported sample format {other:?}")));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to open input stream: {e}")));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("failed to start input stream: {e}")));
                    return;
                }

                let _ = ready_tx.send(Ok((config.sample_rate, config.channels)));

                // parked until the worker handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Fatal(format!("failed to spawn microphone thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok((sample_rate, channels))) => {
                debug!(sample_rate, channels, "input stream opened");
                Ok(MicWorker {
                    blocks: block_rx,
                    _stop: stop_tx,
                    failed,
                    sample_rate,
                    channels,
                })
            }
            Ok(Err(msg)) => Err(CaptureError::Fatal(msg)),
            Err(_) => Err(CaptureError::Fatal(
                "microphone thread exited before ready".to_string(),
            )),
        }
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<Device, String> {
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| "no default input device".to_string()),
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| format!("failed to enumerate input devices: {e}"))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| format!("input device {wanted:?} not found"))
        }
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    block_tx: Sender<Vec<f32>>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let block: Vec<f32> = data.iter().map(|&s| cpal::Sample::from_sample(s)).collect();
            // never block the audio thread; drop blocks when the consumer lags
            let _ = block_tx.try_send(block);
        },
        move |err| {
            warn!("input stream error: {err}");
            failed.store(true, Ordering::Release);
        },
        None,
    )
}

fn drain_pending(worker: &MicWorker) {
    while worker.blocks.try_recv().is_ok() {}
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn assemble_clip(samples: Vec<f32>, source_rate: u32, channels: u16, target_rate: u32) -> AudioClip {
    let mono = mix_to_mono(&samples, channels);
    let (resampled, sample_rate) = downsample(mono, source_rate, target_rate);
    let pcm: Vec<i16> = resampled
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();

    AudioClip {
        samples: pcm,
        sample_rate,
        channels: 1,
    }
}

/// Average interleaved channels into one
fn mix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let n = channels as usize;
    samples
        .chunks_exact(n)
        .map(|frame| frame.iter().sum::<f32>() / n as f32)
        .collect()
}

/// Downsample by decimation; upsampling is never attempted
fn downsample(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> (Vec<f32>, u32) {
    if target_rate == 0 || source_rate <= target_rate {
        return (samples, source_rate);
    }
    let ratio = source_rate / target_rate;
    if ratio <= 1 {
        return (samples, source_rate);
    }
    let decimated: Vec<f32> = samples.iter().step_by(ratio as usize).copied().collect();
    (decimated, source_rate / ratio)
}
