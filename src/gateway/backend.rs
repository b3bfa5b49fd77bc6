//! Inference backend capability and the OpenRouter chat-completions client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Inference API error: {0}")]
    Api(String),
}

/// Opaque text completion. May be slow, may fail, may return nothing.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Option<String>, InferenceError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenRouter (OpenAI-compatible) chat completions backend
pub struct OpenRouterBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        let model = model.into();
        log::info!("🤖 Inference backend: OpenRouter (model: {})", model);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
        })
    }
}

#[async_trait]
impl InferenceBackend for OpenRouterBackend {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Option<String>, InferenceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/trendcast/trendcast")
            .header("X-Title", "trendcast")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(InferenceError::Api(format!("status {}", response.status())));
        }

        let body: ChatResponse = response.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_without_content_is_none() {
        let body: ChatResponse = serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        let content = body.choices.into_iter().next().and_then(|c| c.message).and_then(|m| m.content);
        assert!(content.is_none());

        let empty: ChatResponse = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(empty.choices.is_empty());
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: [
                ChatMessage { role: "system", content: "s" },
                ChatMessage { role: "user", content: "u" },
            ],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }
}
