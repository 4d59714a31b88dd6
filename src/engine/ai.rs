// OpenAI-compatible chat-completion client for ai_prompt actions

//! # AI Prompt Provider
//!
//! Minimal chat-completion client speaking the OpenAI-compatible wire
//! format. Only what the `ai_prompt` action needs: one non-streaming
//! completion per dispatch, model and temperature configurable per action,
//! API key from environment configuration.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{EngineError, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completion client. Cheap to clone; holds a shared `reqwest::Client`.
#[derive(Clone)]
pub struct AiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl AiClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Run one completion and return the assistant message content.
    pub async fn chat(
        &self,
        model: &str,
        temperature: f32,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            EngineError::Configuration("ai_prompt requires OPENAI_API_KEY".to_string())
        })?;

        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system_prompt.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_prompt.to_string(),
        });

        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Internal(format!(
                "completion provider returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EngineError::Internal("completion response had no choices".to_string()))
    }
}
