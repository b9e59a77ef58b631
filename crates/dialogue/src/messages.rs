//! Participant-facing strings.

pub const ANALYZING_ARTICLE: &str = "Analyzing article...";
pub const THINKING: &str = "Thinking...";
pub const PROCESSING_AUDIO: &str = "Processing your audio...";

pub const SERVER_UNREACHABLE: &str = "Error: Unable to communicate with the server.";
pub const MICROPHONE_UNAVAILABLE: &str = "Could not access your microphone.";
pub const EMPTY_RECORDING: &str = "No audio was recorded. Please try again.";
pub const SEND_FAILED: &str = "Error: Failed to send your message. Please try again.";
pub const PLAYBACK_FAILED: &str = "Error: Could not play the response audio.";
pub const EMPTY_ARTICLE: &str = "Please provide an article to discuss.";
pub const NOT_NOW: &str = "Please wait for the current turn to finish.";
pub const INTERNAL: &str = "Error: Something went wrong.";
