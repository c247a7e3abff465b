use crate::error::{AnalysisError, Result, UpstreamError};
use crate::llm::service::{ReasoningRequest, ReasoningService};
use crate::llm::types::*;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini `generateContent` over REST.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries after rate limiting or transient unavailability. Zero disables retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, request: &ReasoningRequest) -> GenerateContentRequest {
        let mut contents: Vec<Content> = Vec::new();
        if let Some(context) = &request.context {
            contents.push(Content::user(format!(
                "AVAILABLE FINANCIAL DOCUMENTS:\n{}",
                context
            )));
            contents.push(Content::model("Understood. I will base my answers on these documents."));
        }
        contents.extend(request.history.iter().map(Content::from));
        contents.push(Content::user(request.prompt.clone()));

        GenerateContentRequest {
            contents,
            system_instruction: Some(Content::user(request.system.clone())),
            generation_config: GenerationConfig {
                response_mime_type: request
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json".to_string()),
                response_schema: request.response_schema.clone(),
                temperature: 0.1,
                top_p: 0.9,
                max_output_tokens: 8192,
            },
        }
    }

    async fn generate_content(&self, payload: &GenerateContentRequest) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Upstream(UpstreamError::Unavailable("request timed out".into()))
                } else {
                    AnalysisError::HttpError(e)
                }
            })?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            let message = serde_json::from_str::<ApiErrorBody>(&err_text)
                .map(|body| match body.error.status {
                    Some(code) => format!("{} ({})", body.error.message, code),
                    None => body.error.message,
                })
                .unwrap_or(err_text);
            return Err(UpstreamError::classify(Some(status.as_u16()), &message).into());
        }

        let body: GenerateContentResponse = res.json().await?;

        let candidate = body
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| AnalysisError::MalformedResponse("No candidates returned".to_string()))?;

        let text = candidate
            .content
            .map(|c| c.text())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AnalysisError::MalformedResponse(format!(
                    "Empty content (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ))
            })?;
        Ok(text)
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    async fn reason(&self, request: &ReasoningRequest) -> Result<String> {
        let payload = self.build_request(request);
        debug!(
            "Calling {} with {} content block(s)",
            self.model,
            payload.contents.len()
        );

        let mut attempt = 0;
        loop {
            match self.generate_content(&payload).await {
                Err(AnalysisError::Upstream(
                    e @ (UpstreamError::RateLimited | UpstreamError::Unavailable(_)),
                )) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_secs(2u64.pow(attempt));
                    warn!("{} (attempt {}); retrying in {:?}", e, attempt, delay);
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;
    use serde_json::json;

    #[test]
    fn test_build_request_orders_context_history_prompt() {
        let client = GeminiClient::new("key").with_model("test-model");
        let request = ReasoningRequest::new("system", "question")
            .with_context("Net sales 10")
            .with_history(&[ChatMessage::user("earlier"), ChatMessage::assistant("answer")]);

        let payload = client.build_request(&request);

        let roles: Vec<&str> = payload.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user", "model", "user"]);
        assert!(payload.contents[0].text().contains("Net sales 10"));
        assert_eq!(payload.contents[4].text(), "question");
        assert!(payload.generation_config.response_mime_type.is_none());
        assert_eq!(client.name(), "test-model");
    }

    #[test]
    fn test_schema_requests_json_mode() {
        let client = GeminiClient::new("key");
        let mut request = ReasoningRequest::new("system", "extract");
        request.response_schema = Some(json!({"type": "object"}));
        let payload = client.build_request(&request);
        assert_eq!(
            payload.generation_config.response_mime_type.as_deref(),
            Some("application/json")
        );
        assert_eq!(payload.contents.len(), 1);
    }
}
