//! Request/response fallback to the streaming dialogue.
//!
//! One article analysis opens the conversation, then each participant
//! message gets one bot reply. The backend keeps the conversation in a
//! cookie session, so one client must be used for the whole dialogue.

mod client;
mod fallback;

pub use client::HttpConversationApi;
pub use fallback::{
    FallbackConversation, ANALYZE_FAILED, PROCESS_FAILED, SERVER_UNREACHABLE,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend answered with status {status}")]
    Backend { status: u16 },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, HttpError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub article_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_fake_data: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub bot_message: String,
    /// Passed through to the caller untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_propaganda: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueRequest {
    pub user_input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueResponse {
    pub bot_message: String,
}

/// The two backend calls.
#[async_trait::async_trait]
pub trait ConversationApi: Send + Sync {
    async fn analyze_propaganda(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse>;

    async fn continue_conversation(&self, request: &ContinueRequest) -> Result<ContinueResponse>;
}
