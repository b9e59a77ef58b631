use crate::{AnalyzeRequest, ContinueRequest, ConversationApi, HttpError, Result};
use apollolytics_transcript::{Role, Transcript};

pub const ANALYZE_FAILED: &str = "Error: Failed to analyze the article.";
pub const PROCESS_FAILED: &str = "Error: Failed to process your message.";
pub const SERVER_UNREACHABLE: &str = "Error: Unable to communicate with the server.";

/// Text conversation over [`ConversationApi`], one request per turn.
///
/// Failures are added to the transcript as notices and returned; nothing
/// else changes, so the same call can simply be retried.
pub struct FallbackConversation<A> {
    api: A,
    dialogue_type: Option<String>,
    transcript: Transcript,
    detected_propaganda: Option<serde_json::Value>,
    analyzed: bool,
}

impl<A: ConversationApi> FallbackConversation<A> {
    pub fn new(api: A, dialogue_type: Option<String>) -> Self {
        Self {
            api,
            dialogue_type,
            transcript: Transcript::new(),
            detected_propaganda: None,
            analyzed: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn detected_propaganda(&self) -> Option<&serde_json::Value> {
        self.detected_propaganda.as_ref()
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    /// Open the conversation with the article. The bot's first message is
    /// appended to the transcript.
    pub async fn analyze(&mut self, article: &str) -> Result<()> {
        let article = article.trim();
        if article.is_empty() {
            return Ok(());
        }
        let request = AnalyzeRequest {
            article_text: article.to_string(),
            dialogue_type: self.dialogue_type.clone(),
            use_fake_data: None,
        };
        let result = self.api.analyze_propaganda(&request).await;

        match result {
            Ok(response) => {
                self.transcript
                    .append_final(Role::Assistant, None, response.bot_message);
                self.detected_propaganda = response.detected_propaganda;
                self.analyzed = true;
                tracing::info!("article analyzed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "article analysis failed");
                self.transcript.append_notice(failure_notice(&e, ANALYZE_FAILED));
                Err(e)
            }
        }
    }

    /// Send one participant message. It is shown before the request goes out.
    pub async fn send(&mut self, user_input: &str) -> Result<()> {
        let user_input = user_input.trim();
        if user_input.is_empty() {
            return Ok(());
        }
        self.transcript.append_final(Role::User, None, user_input);
        let request = ContinueRequest {
            user_input: user_input.to_string(),
        };
        let result = self.api.continue_conversation(&request).await;

        match result {
            Ok(response) => {
                self.transcript
                    .append_final(Role::Assistant, None, response.bot_message);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "message failed");
                self.transcript.append_notice(failure_notice(&e, PROCESS_FAILED));
                Err(e)
            }
        }
    }
}

/// Backend refusals and transport failures read differently.
fn failure_notice(error: &HttpError, refused: &'static str) -> &'static str {
    match error {
        HttpError::Request(_) => SERVER_UNREACHABLE,
        HttpError::Backend { .. } | HttpError::Decode(_) => refused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AnalyzeResponse, ContinueResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockApi {
        analyze: Mutex<VecDeque<Result<AnalyzeResponse>>>,
        replies: Mutex<VecDeque<Result<ContinueResponse>>>,
        seen: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn reply(self, message: &str) -> Self {
            self.replies.lock().unwrap().push_back(Ok(ContinueResponse {
                bot_message: message.into(),
            }));
            self
        }

        fn fail_reply(self, error: HttpError) -> Self {
            self.replies.lock().unwrap().push_back(Err(error));
            self
        }

        fn analysis(self, result: Result<AnalyzeResponse>) -> Self {
            self.analyze.lock().unwrap().push_back(result);
            self
        }
    }

    #[async_trait::async_trait]
    impl ConversationApi for MockApi {
        async fn analyze_propaganda(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
            self.seen.lock().unwrap().push(request.article_text.clone());
            self.analyze
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(HttpError::Backend { status: 500 }))
        }

        async fn continue_conversation(
            &self,
            request: &ContinueRequest,
        ) -> Result<ContinueResponse> {
            self.seen.lock().unwrap().push(request.user_input.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(HttpError::Backend { status: 500 }))
        }
    }

    fn opening() -> Result<AnalyzeResponse> {
        Ok(AnalyzeResponse {
            bot_message: "This article uses loaded language.".into(),
            detected_propaganda: Some(serde_json::json!({"loaded_language": ["disaster"]})),
        })
    }

    fn contents(conversation: &FallbackConversation<MockApi>) -> Vec<(Role, String)> {
        conversation
            .transcript()
            .entries()
            .iter()
            .map(|e| (e.role, e.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_analyze_then_continue() {
        let api = MockApi::default().analysis(opening()).reply("Why do you think so?");
        let mut conversation = FallbackConversation::new(api, Some("critical".into()));

        conversation.analyze("Some article").await.unwrap();
        assert!(conversation.is_analyzed());
        assert!(conversation.detected_propaganda().is_some());

        conversation.send("It seems fair to me").await.unwrap();
        assert_eq!(
            contents(&conversation),
            vec![
                (Role::Assistant, "This article uses loaded language.".to_string()),
                (Role::User, "It seems fair to me".to_string()),
                (Role::Assistant, "Why do you think so?".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_analysis_failure_messages() {
        let api = MockApi::default().analysis(Err(HttpError::Backend { status: 500 }));
        let mut conversation = FallbackConversation::new(api, None);

        assert!(conversation.analyze("Some article").await.is_err());
        assert!(!conversation.is_analyzed());
        let last = conversation.transcript().last().unwrap();
        assert!(last.is_notice);
        assert_eq!(last.content, ANALYZE_FAILED);
    }

    #[tokio::test]
    async fn test_message_failure_allows_retry() {
        let api = MockApi::default()
            .analysis(opening())
            .fail_reply(HttpError::Decode("missing bot_message".into()))
            .reply("Go on.");
        let mut conversation = FallbackConversation::new(api, None);
        conversation.analyze("Some article").await.unwrap();

        assert!(conversation.send("First try").await.is_err());
        assert_eq!(conversation.transcript().last().unwrap().content, PROCESS_FAILED);

        conversation.send("First try").await.unwrap();
        assert_eq!(conversation.transcript().last().unwrap().content, "Go on.");
    }

    #[tokio::test]
    async fn test_blank_input_is_not_sent() {
        let mut conversation = FallbackConversation::new(MockApi::default(), None);
        conversation.analyze("   ").await.unwrap();
        conversation.send("\n").await.unwrap();
        assert!(conversation.transcript().is_empty());
        assert!(conversation.api.seen.lock().unwrap().is_empty());
    }
}
