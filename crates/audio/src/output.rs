use crate::codec::DecodedAudio;
use crate::device::resolve_output;
use crate::playback::AudioSink;
use crate::resample::resample_linear;
use crate::{AudioError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct Voice {
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Mix {
    frames_played: u64,
    voices: Vec<Voice>,
}

impl Mix {
    /// Render `frames` mono frames starting at the current clock.
    fn render(&mut self, out: &mut Vec<f32>, frames: usize) {
        out.clear();
        out.resize(frames, 0.0);
        let start = self.frames_played;
        for voice in &self.voices {
            let from = voice.start_frame.max(start);
            let to = voice.end_frame().min(start + frames as u64);
            for t in from..to {
                out[(t - start) as usize] += voice.samples[(t - voice.start_frame) as usize];
            }
        }
        self.frames_played += frames as u64;
        let now = self.frames_played;
        self.voices.retain(|v| v.end_frame() > now);
    }
}

/// Default output device. Its clock is the count of frames the device has
/// consumed, so [`AudioSink::now`] tracks what has actually been heard.
pub struct CpalSink {
    mix: Arc<Mutex<Mix>>,
    device_rate: u32,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn open_default() -> Result<Self> {
        let mix = Arc::new(Mutex::new(Mix::default()));
        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_mix = mix.clone();
        let thread = std::thread::Builder::new()
            .name("apollolytics-playback".into())
            .spawn(move || {
                // cpal streams are not Send on every platform; this thread owns it.
                let stream = match build_output(thread_mix) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("playback stream closed");
            })
            .map_err(|e| AudioError::Stream(format!("failed to spawn playback thread: {e}")))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::Stream("playback thread exited".to_string()))??;
        tracing::info!(device_rate, "playback output ready");

        Ok(Self {
            mix,
            device_rate,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        let frames = self.mix.lock().map(|m| m.frames_played).unwrap_or(0);
        frames as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, audio: &DecodedAudio, start_at: f64) {
        let samples: Arc<[f32]> = if audio.sample_rate == self.device_rate {
            audio.samples.clone()
        } else {
            resample_linear(&audio.samples, audio.sample_rate, self.device_rate).into()
        };
        let start_frame = (start_at * self.device_rate as f64).round() as u64;
        if let Ok(mut mix) = self.mix.lock() {
            mix.voices.push(Voice {
                start_frame,
                samples,
            });
        }
    }

    fn cancel_all(&mut self) {
        if let Ok(mut mix) = self.mix.lock() {
            mix.voices.clear();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_output(mix: Arc<Mutex<Mix>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = resolve_output(&host)?;
    let config = device
        .default_output_config()
        .map_err(|e| AudioError::Stream(format!("failed to get output config: {e}")))?;
    let rate = config.sample_rate().0;

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_typed::<f32>(&device, &config.into(), mix)?,
        SampleFormat::I16 => build_typed::<i16>(&device, &config.into(), mix)?,
        SampleFormat::U16 => build_typed::<u16>(&device, &config.into(), mix)?,
        format => {
            return Err(AudioError::Stream(format!(
                "unsupported output format: {format:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| AudioError::Stream(format!("failed to start output: {e}")))?;
    Ok((stream, rate))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mix: Arc<Mutex<Mix>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mono = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            match mix.lock() {
                Ok(mut mix) => mix.render(&mut mono, frames),
                Err(_) => {
                    mono.clear();
                    mono.resize(frames, 0.0);
                }
            }
            for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                let value = T::from_sample(sample.clamp(-1.0, 1.0));
                frame.fill(value);
            }
        },
        |err| tracing::error!("audio output error: {}", err),
        None,
    )?;
    Ok(stream)
}
