use crate::traits::AnswerGenerator;
use crate::SearchError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub fn study_prompt(context: &str, query: &str) -> String {
    format!("You are a study assistant. Notes:\n\n{context}\n\nQ: {query}")
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl GeminiGenerator {
    /// A generator without a key can be built so ingestion still works; asking
    /// fails with `SearchError::NotConfigured`.
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, api_key: &str) -> Result<url::Url, SearchError> {
        let url = url::Url::parse_with_params(
            &format!(
                "{}/models/{}:generateContent",
                self.base_url.trim_end_matches('/'),
                self.model
            ),
            &[("key", api_key)],
        )?;
        Ok(url)
    }

    fn build_request_body(prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
        })
    }
}

fn response_text(response: &Value) -> Result<String, SearchError> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "gemini".to_string(),
            details: "missing candidates[0].content.parts[0].text".to_string(),
        })
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    async fn answer(&self, context: &str, query: &str) -> Result<String, SearchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SearchError::NotConfigured("GEMINI_API_KEY is not set".to_string()))?;

        let body = Self::build_request_body(&study_prompt(context, query));
        debug!(model = %self.model, "gemini request");

        let response = self
            .client
            .post(self.endpoint(api_key)?)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "gemini".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: Value = response.json().await?;
        response_text(&parsed)
    }
}
