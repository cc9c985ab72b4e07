//! Chat-completions client shared by every LLM-backed stage.
//!
//! One blocking client against an OpenAI-compatible endpoint; each stage
//! wraps it with its own prompt and its own default-on-failure policy. The
//! client itself never defaults; it reports errors and lets the stage
//! decide what a safe answer looks like.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Timeout for chat-completion requests.
const LLM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("llm response had no choices")]
    EmptyResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::blocking::Client,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.5,
            client,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single-prompt convenience over `chat`.
    pub fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.chat(&[ChatMessage::user(prompt)])
    }

    pub fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
        };

        debug!("calling llm {} with model {}", url, self.model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json()?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Hands out one shared client per identity with an explicit owned cache, so
/// client lifetime and locking are visible instead of hiding in module
/// globals.
pub struct ClientPool {
    template: ChatClient,
    clients: Mutex<HashMap<String, Arc<ChatClient>>>,
}

impl ClientPool {
    pub fn new(template: ChatClient) -> Self {
        Self {
            template,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_for(&self, identity: &str) -> Arc<ChatClient> {
        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(self.template.clone()))
            .clone()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn complete_returns_trimmed_content() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion_body("  instructions \n"))
            .create();

        let client = ChatClient::new(server.url(), "test-key", "test-model");
        let answer = client.complete("classify this").expect("complete");
        assert_eq!(answer, "instructions");
    }

    #[test]
    fn complete_surfaces_endpoint_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create();

        let client = ChatClient::new(server.url(), "test-key", "test-model");
        let err = client.complete("hello").expect_err("should fail");
        assert!(matches!(err, LlmError::Endpoint { status: 429, .. }));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create();

        let client = ChatClient::new(server.url(), "test-key", "test-model");
        assert!(matches!(
            client.complete("hello"),
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn pool_reuses_client_per_identity() {
        let template = ChatClient::new("http://localhost:1", "key", "model");
        let pool = ClientPool::new(template);
        let first = pool.client_for("a@example.com");
        let again = pool.client_for("a@example.com");
        let other = pool.client_for("b@example.com");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
