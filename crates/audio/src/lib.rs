//! Microphone capture, fragment decoding and gapless playback.

mod capture;
mod codec;
mod device;
mod output;
mod playback;
mod resample;
mod utterance;

pub use capture::{MicrophoneCapture, ScriptedCapture, VoiceCapture};
pub use codec::{decode_fragment, DecodedAudio};
pub use device::{
    find_device_by_id, get_default_device, list_devices, list_output_devices, AudioDevice,
    DeviceDirection,
};
pub use output::CpalSink;
pub use playback::{
    AudioSink, FragmentTicket, ManualSink, PlaybackSequencer, PlaybackSignal, SilentSink,
};
pub use resample::{resample_linear, to_mono, StreamResampler};
pub use utterance::{CapturedUtterance, EncodedAudio};

use serde::{Deserialize, Serialize};

/// Sample rate used by the conversation backend for both directions.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("failed to decode audio fragment: {0}")]
    Decode(String),
    #[error("failed to encode recording: {0}")]
    Encode(String),
    #[error("device error: {0}")]
    Devices(#[from] cpal::DevicesError),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// PCM layout of captured or received audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceNotFound("device not available".to_string())
            }
            cpal::BuildStreamError::BackendSpecific { err }
                if err.description.to_lowercase().contains("permission") =>
            {
                AudioError::PermissionDenied
            }
            other => AudioError::Stream(other.to_string()),
        }
    }
}
