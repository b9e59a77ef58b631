use crate::resample::to_mono;
use crate::{AudioError, AudioFormat, Result};
use base64::Engine;
use std::io::Cursor;
use std::sync::Arc;

/// One decoded assistant fragment, mono.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a transport audio payload.
///
/// Accepts plain base64 or a `data:audio/...;base64,` URI. A RIFF body is
/// read as WAV; anything else is raw little-endian PCM16 in `raw_format`.
pub fn decode_fragment(payload: &str, raw_format: AudioFormat) -> Result<DecodedAudio> {
    let body = strip_data_uri(payload.trim());
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| AudioError::Decode(format!("invalid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(AudioError::Decode("empty fragment".to_string()));
    }
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_pcm16(&bytes, raw_format)
    }
}

fn strip_data_uri(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some((_, body)) = payload.split_once(',') {
            return body;
        }
    }
    payload
}

fn decode_wav(bytes: Vec<u8>) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| AudioError::Decode(format!("invalid wav: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AudioError::Decode(format!("invalid wav samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AudioError::Decode(format!("invalid wav samples: {e}")))?
        }
    };

    if interleaved.is_empty() {
        return Err(AudioError::Decode("wav has no samples".to_string()));
    }
    Ok(DecodedAudio::new(
        to_mono(&interleaved, spec.channels as usize),
        spec.sample_rate,
    ))
}

fn decode_pcm16(bytes: &[u8], format: AudioFormat) -> Result<DecodedAudio> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::Decode(format!(
            "pcm16 fragment has odd length {}",
            bytes.len()
        )));
    }
    let interleaved: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();
    Ok(DecodedAudio::new(
        to_mono(&interleaved, format.channels.max(1) as usize),
        format.sample_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CapturedUtterance;
    use std::time::Instant;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_raw_pcm16_uses_configured_format() {
        let pcm: Vec<u8> = [0i16, 16384, -16384, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let audio = decode_fragment(&b64(&pcm), AudioFormat::default()).unwrap();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(&*audio.samples, &[0.0, 0.5, -0.5, 0.0]);
    }

    #[test]
    fn test_data_uri_prefix_is_stripped() {
        let pcm = vec![0u8; 48_000];
        let payload = format!("data:audio/pcm;base64,{}", b64(&pcm));
        let audio = decode_fragment(&payload, AudioFormat::default()).unwrap();
        assert!((audio.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wav_fragment_keeps_its_own_rate() {
        let utterance = CapturedUtterance::new(vec![0.25; 16_000], 16_000, Instant::now());
        let wav = utterance.to_wav().unwrap();
        let payload = format!("data:audio/wav;base64,{}", b64(&wav));
        let audio = decode_fragment(&payload, AudioFormat::default()).unwrap();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.samples.len(), 16_000);
        assert!((audio.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_stereo_pcm_is_downmixed() {
        let pcm: Vec<u8> = [16384i16, 0, 16384, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let format = AudioFormat {
            sample_rate: 24_000,
            channels: 2,
        };
        let audio = decode_fragment(&b64(&pcm), format).unwrap();
        assert_eq!(&*audio.samples, &[0.25, 0.25]);
    }

    #[test]
    fn test_malformed_payloads_fail() {
        let format = AudioFormat::default();
        assert!(matches!(
            decode_fragment("!!not base64!!", format),
            Err(AudioError::Decode(_))
        ));
        assert!(matches!(decode_fragment("", format), Err(AudioError::Decode(_))));
        assert!(matches!(
            decode_fragment(&b64(&[1, 2, 3]), format),
            Err(AudioError::Decode(_))
        ));
        assert!(matches!(
            decode_fragment(&b64(b"RIFF\0\0\0\0junk"), format),
            Err(AudioError::Decode(_))
        ));
    }
}
