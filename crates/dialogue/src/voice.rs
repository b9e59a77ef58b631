use crate::config::{DialogueConfig, VoicePreference};
use apollolytics_audio::VoiceCapture;

/// How the participant speaks. Chosen once when the session is built.
pub enum VoiceCapability {
    /// Microphone audio is captured, encoded and sent for server-side
    /// transcription.
    AudioPipeline(Box<dyn VoiceCapture>),
    /// Turns arrive as client-produced text (local recognition or typing).
    NativeSpeech,
}

impl VoiceCapability {
    /// Pick the capability for `config`. `detect` is only called when the
    /// audio pipeline is wanted and should return `None` when no microphone
    /// can be used.
    pub fn select(
        config: &DialogueConfig,
        detect: impl FnOnce() -> Option<Box<dyn VoiceCapture>>,
    ) -> Self {
        if !config.enable_voice_recording || config.voice == VoicePreference::Text {
            tracing::info!("voice capability: native speech");
            return VoiceCapability::NativeSpeech;
        }
        match detect() {
            Some(capture) => {
                tracing::info!("voice capability: audio pipeline");
                VoiceCapability::AudioPipeline(capture)
            }
            None => {
                if config.voice == VoicePreference::Audio {
                    tracing::warn!("audio pipeline requested but no microphone is available");
                } else {
                    tracing::info!("no microphone available, using native speech");
                }
                VoiceCapability::NativeSpeech
            }
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, VoiceCapability::AudioPipeline(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            VoiceCapability::AudioPipeline(_) => "audio-pipeline",
            VoiceCapability::NativeSpeech => "native-speech",
        }
    }

    pub(crate) fn into_capture(self) -> Option<Box<dyn VoiceCapture>> {
        match self {
            VoiceCapability::AudioPipeline(capture) => Some(capture),
            VoiceCapability::NativeSpeech => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollolytics_audio::ScriptedCapture;

    fn scripted() -> Option<Box<dyn VoiceCapture>> {
        Some(Box::new(ScriptedCapture::new(24_000)))
    }

    #[test]
    fn test_audio_pipeline_when_microphone_present() {
        let config = DialogueConfig::default();
        assert!(VoiceCapability::select(&config, scripted).is_audio());
    }

    #[test]
    fn test_falls_back_without_microphone() {
        let config = DialogueConfig::default();
        let voice = VoiceCapability::select(&config, || None);
        assert_eq!(voice.name(), "native-speech");
    }

    #[test]
    fn test_recording_disabled_never_detects() {
        let config = DialogueConfig {
            enable_voice_recording: false,
            ..DialogueConfig::default()
        };
        let voice = VoiceCapability::select(&config, || panic!("microphone detection ran"));
        assert!(!voice.is_audio());

        let config = DialogueConfig {
            voice: VoicePreference::Text,
            ..DialogueConfig::default()
        };
        assert!(!VoiceCapability::select(&config, || panic!("microphone detection ran")).is_audio());
    }
}
