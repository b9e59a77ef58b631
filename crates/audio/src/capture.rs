use crate::device::resolve_input;
use crate::resample::{to_mono, StreamResampler};
use crate::utterance::CapturedUtterance;
use crate::{AudioError, AudioFormat, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Exclusive use of a microphone for one user turn.
pub trait VoiceCapture: Send {
    /// Acquire the device and begin accumulating samples.
    fn start(&mut self) -> Result<()>;

    /// Release the device and return everything recorded since `start`.
    fn stop(&mut self) -> Result<CapturedUtterance>;

    /// Drop any recording in progress and release the device. Idempotent.
    fn release(&mut self);

    fn is_active(&self) -> bool;
}

struct ActiveCapture {
    stop: Sender<()>,
    thread: JoinHandle<Vec<f32>>,
    started_at: Instant,
}

/// Microphone capture through cpal.
///
/// A dedicated thread owns the input stream for the duration of the
/// recording. On stop the stream is dropped first, then every block the
/// callback already produced is drained, so nothing between start and stop
/// is lost.
pub struct MicrophoneCapture {
    device_id: Option<String>,
    format: AudioFormat,
    active: Option<ActiveCapture>,
}

impl MicrophoneCapture {
    pub fn new(device_id: Option<String>, format: AudioFormat) -> Self {
        Self {
            device_id,
            format,
            active: None,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl VoiceCapture for MicrophoneCapture {
    fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(AudioError::Stream("capture already running".to_string()));
        }

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let device_id = self.device_id.clone();
        let target_rate = self.format.sample_rate;

        let thread = std::thread::Builder::new()
            .name("apollolytics-capture".into())
            .spawn(move || capture_thread(device_id, target_rate, ready_tx, stop_rx))
            .map_err(|e| AudioError::Stream(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(rate = target_rate, "microphone capture started");
                self.active = Some(ActiveCapture {
                    stop: stop_tx,
                    thread,
                    started_at: Instant::now(),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                tracing::warn!(error = %e, "microphone unavailable");
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Stream("capture thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) -> Result<CapturedUtterance> {
        let active = self
            .active
            .take()
            .ok_or_else(|| AudioError::Stream("capture not running".to_string()))?;
        let _ = active.stop.send(());
        let samples = active
            .thread
            .join()
            .map_err(|_| AudioError::Stream("capture thread panicked".to_string()))?;

        let utterance = CapturedUtterance::new(samples, self.format.sample_rate, active.started_at);
        tracing::info!(
            samples = utterance.samples.len(),
            secs = utterance.duration_secs(),
            "microphone capture stopped"
        );
        Ok(utterance)
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop.send(());
            let _ = active.thread.join();
            tracing::debug!("microphone released");
        }
    }

    fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.release();
    }
}

fn capture_thread(
    device_id: Option<String>,
    target_rate: u32,
    ready: Sender<Result<()>>,
    stop: Receiver<()>,
) -> Vec<f32> {
    let (block_tx, block_rx) = unbounded::<Vec<f32>>();
    let (stream, device_rate, channels) = match open_input(device_id.as_deref(), block_tx) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Vec::new();
        }
    };
    let _ = ready.send(Ok(()));

    let mut resampler = StreamResampler::new(device_rate, target_rate);
    let mut samples = Vec::new();
    loop {
        select! {
            recv(block_rx) -> block => match block {
                Ok(block) => samples.extend(resampler.process(&to_mono(&block, channels))),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }

    // Releasing the device ends the callback; whatever it queued is still ours.
    drop(stream);
    for block in block_rx.try_iter() {
        samples.extend(resampler.process(&to_mono(&block, channels)));
    }
    samples.extend(resampler.flush());
    samples
}

fn open_input(device_id: Option<&str>, tx: Sender<Vec<f32>>) -> Result<(Stream, u32, usize)> {
    let host = cpal::default_host();
    let device = resolve_input(&host, device_id)?;
    let config = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            AudioError::DeviceNotFound("input device not available".to_string())
        }
        other => AudioError::Stream(format!("failed to get input config: {other}")),
    })?;
    let rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    tracing::debug!(rate, channels, format = ?config.sample_format(), "opening input stream");

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_input(&device, &config.into(), tx, |s: &f32| *s)?,
        SampleFormat::I16 => build_input(&device, &config.into(), tx, |s: &i16| *s as f32 / 32768.0)?,
        SampleFormat::U16 => build_input(&device, &config.into(), tx, |s: &u16| {
            (*s as f32 - 32768.0) / 32768.0
        })?,
        format => {
            return Err(AudioError::Stream(format!(
                "unsupported sample format: {format:?}"
            )))
        }
    };
    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            AudioError::DeviceNotFound("input device not available".to_string())
        }
        other => AudioError::Stream(format!("failed to start stream: {other}")),
    })?;
    Ok((stream, rate, channels))
}

fn build_input<T, F>(
    device: &Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<f32>>,
    convert: F,
) -> Result<Stream>
where
    T: cpal::SizedSample,
    F: Fn(&T) -> f32 + Send + 'static,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let _ = tx.send(data.iter().map(&convert).collect());
        },
        |err| tracing::error!("audio input error: {}", err),
        None,
    )?;
    Ok(stream)
}

#[derive(Debug, Default)]
struct ScriptState {
    fail_next_start: Option<AudioError>,
    recordings: Vec<Vec<f32>>,
    active_since: Option<Instant>,
    start_gate: Option<Receiver<()>>,
    starts: usize,
    releases: usize,
}

/// Capture double that replays prepared recordings. Cloned handles share
/// state so tests can inspect what the session did with the device.
#[derive(Debug, Clone)]
pub struct ScriptedCapture {
    state: Arc<Mutex<ScriptState>>,
    sample_rate: u32,
}

impl ScriptedCapture {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            sample_rate,
        }
    }

    /// Queue the samples the next `stop` returns.
    pub fn push_recording(&self, samples: Vec<f32>) {
        self.lock().recordings.push(samples);
    }

    /// Make the next `start` fail with `error`.
    pub fn fail_next_start(&self, error: AudioError) {
        self.lock().fail_next_start = Some(error);
    }

    /// Make the next `start` block until the returned sender fires or is
    /// dropped, the way an open permission prompt holds the device.
    pub fn hold_next_start(&self) -> Sender<()> {
        let (release_tx, release_rx) = bounded(1);
        self.lock().start_gate = Some(release_rx);
        release_tx
    }

    pub fn start_count(&self) -> usize {
        self.lock().starts
    }

    /// Number of times an active recording was torn down by `release`.
    pub fn release_count(&self) -> usize {
        self.lock().releases
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VoiceCapture for ScriptedCapture {
    fn start(&mut self) -> Result<()> {
        let gate = self.lock().start_gate.take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let mut state = self.lock();
        if let Some(error) = state.fail_next_start.take() {
            return Err(error);
        }
        if state.active_since.is_some() {
            return Err(AudioError::Stream("capture already running".to_string()));
        }
        state.active_since = Some(Instant::now());
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<CapturedUtterance> {
        let mut state = self.lock();
        let started_at = state
            .active_since
            .take()
            .ok_or_else(|| AudioError::Stream("capture not running".to_string()))?;
        let samples = if state.recordings.is_empty() {
            Vec::new()
        } else {
            state.recordings.remove(0)
        };
        Ok(CapturedUtterance::new(samples, self.sample_rate, started_at))
    }

    fn release(&mut self) {
        let mut state = self.lock();
        if state.active_since.take().is_some() {
            state.releases += 1;
        }
    }

    fn is_active(&self) -> bool {
        self.lock().active_since.is_some()
    }
}
