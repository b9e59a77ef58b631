use crate::{AudioError, Result};
use base64::Engine;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::time::{Duration, Instant};

/// Mono samples recorded for one user turn.
#[derive(Debug, Clone)]
pub struct CapturedUtterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub started_at: Instant,
    pub stopped_at: Instant,
}

/// A sealed recording ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    /// Base64 of a complete WAV file.
    pub data: String,
    pub format: &'static str,
    pub duration_secs: f64,
}

impl CapturedUtterance {
    pub fn new(samples: Vec<f32>, sample_rate: u32, started_at: Instant) -> Self {
        Self {
            samples,
            sample_rate,
            started_at,
            stopped_at: Instant::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the audio itself.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Wall-clock time between start and stop.
    pub fn elapsed(&self) -> Duration {
        self.stopped_at.saturating_duration_since(self.started_at)
    }

    /// WAV (PCM16, mono) bytes.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| AudioError::Encode(format!("failed to create wav writer: {e}")))?;
            let mut pcm = writer.get_i16_writer(self.samples.len() as u32);
            for &sample in &self.samples {
                pcm.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16);
            }
            pcm.flush()
                .map_err(|e| AudioError::Encode(format!("failed to write samples: {e}")))?;
            writer
                .finalize()
                .map_err(|e| AudioError::Encode(format!("failed to finalize wav: {e}")))?;
        }
        Ok(cursor.into_inner())
    }

    pub fn encode(&self) -> Result<EncodedAudio> {
        let wav = self.to_wav()?;
        Ok(EncodedAudio {
            data: base64::engine::general_purpose::STANDARD.encode(wav),
            format: "wav",
            duration_secs: self.duration_secs(),
        })
    }
}
