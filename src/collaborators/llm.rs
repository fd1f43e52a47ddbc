//! Language model collaborator. Replies are always the `{action, text}` JSON
//! shape described in the dialogue engine contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LlmError;
use crate::session::Turn;

const LLM_TEMPERATURE: f32 = 0.8;
const LLM_MAX_TOKENS: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmAction {
    Respond,
    Hangup,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmReply {
    pub action: LlmAction,
    pub text: String,
}

impl LlmReply {
    pub fn fallback() -> Self {
        Self {
            action: LlmAction::Respond,
            text: "Sorry, could you repeat that?".to_string(),
        }
    }
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[Turn],
        user_input: &str,
    ) -> Result<LlmReply, LlmError>;
}

/// Production adapter: chat-completions-style JSON-mode request to a cloud
/// LLM endpoint.
pub struct HttpLlmAdapter {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpLlmAdapter {
    pub fn new(client: reqwest::Client, api_base: String, api_key: String, model: String) -> Self {
        Self {
            client,
            api_base,
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ReplyGenerator for HttpLlmAdapter {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[Turn],
        user_input: &str,
    ) -> Result<LlmReply, LlmError> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: system_prompt.to_string(),
        }];
        for turn in history {
            let role = match turn.role {
                crate::session::Role::User => "user",
                crate::session::Role::Assistant => "assistant",
            };
            messages.push(ChatMessage {
                role,
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_input.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: LLM_TEMPERATURE,
            max_tokens: LLM_MAX_TOKENS,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("status {}", response.status())));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidJson("empty choices array".to_string()))?;

        serde_json::from_str(&content).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }
}

/// Deterministic stub for tests: always returns the same pre-built reply.
pub struct StubLlmAdapter {
    pub reply: LlmReply,
}

impl StubLlmAdapter {
    pub fn new(reply: LlmReply) -> Self {
        Self { reply }
    }
}

#[async_trait]
impl ReplyGenerator for StubLlmAdapter {
    async fn generate(
        &self,
        _system_prompt: &str,
        _history: &[Turn],
        _user_input: &str,
    ) -> Result<LlmReply, LlmError> {
        Ok(self.reply.clone())
    }
}
