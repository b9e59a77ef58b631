use crate::{
    AnalyzeRequest, AnalyzeResponse, ContinueRequest, ContinueResponse, ConversationApi,
    HttpError, Result,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// reqwest client against the conversation backend.
///
/// The cookie store carries the backend session between calls.
pub struct HttpConversationApi {
    base_url: String,
    use_fake_data: bool,
    client: reqwest::Client,
}

impl HttpConversationApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            use_fake_data: false,
            client,
        })
    }

    /// Use the canned analysis endpoint instead of the model-backed one.
    pub fn with_fake_data(mut self, fake: bool) -> Self {
        self.use_fake_data = fake;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn analyze_path(&self) -> &'static str {
        if self.use_fake_data {
            "/analyze_propaganda_fake"
        } else {
            "/analyze_propaganda"
        }
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "POST");
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "backend returned an error status");
            return Err(HttpError::Backend {
                status: status.as_u16(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ConversationApi for HttpConversationApi {
    async fn analyze_propaganda(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        let mut request = request.clone();
        if self.use_fake_data {
            request.use_fake_data = Some(true);
        }
        self.post(self.analyze_path(), &request).await
    }

    async fn continue_conversation(&self, request: &ContinueRequest) -> Result<ContinueResponse> {
        self.post("/continue_conversation", request).await
    }
}
