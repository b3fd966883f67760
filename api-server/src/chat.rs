//! Chat passthrough to an OpenAI-compatible chat-completions endpoint
//!
//! Independent of the recommendation path: a missing key or an upstream
//! failure only affects `/chat`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("chat request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("chat endpoint returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("chat endpoint returned no choices")]
    EmptyReply,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            api_key: None,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a single user message and return the first reply
    pub async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ChatError::MissingApiKey)?;

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let request = CompletionRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ChatError::EmptyReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_fails_before_any_request() {
        let client = ChatClient::new(ChatConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .unwrap();

        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::MissingApiKey));
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest {
            model: "gpt-3.5-turbo",
            messages: [ChatMessage {
                role: "user",
                content: "Which crop suits clay soil?",
            }],
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["model"], "gpt-3.5-turbo");
    }
}
