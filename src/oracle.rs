//! Text oracle clients
//!
//! The engine delegates all natural-language judgment (fact extraction,
//! conflict verdicts, session naming, the final reply) to an external
//! text-completion service behind the [`Oracle`] trait. The production
//! implementation speaks the OpenAI-compatible `/chat/completions` protocol
//! used by OpenRouter, Ollama, and friends.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default request timeout for oracle calls
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A text-completion service: prompt in, completion out.
///
/// Implementations must be injectable at construction time so components can
/// be exercised against a fake in tests.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a prompt and return the completion text.
    ///
    /// Fails with [`EngineError::Oracle`] on transport errors, timeouts, or
    /// non-success status codes.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share via `Arc<dyn Oracle>`.
pub struct ChatCompletionsOracle {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatCompletionsOracle {
    /// Create a client for `base_url` (e.g. `"https://openrouter.ai/api/v1"`)
    /// using `model` (e.g. `"x-ai/grok-4-fast"`), with the default timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(base_url, api_key, model, DEFAULT_ORACLE_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Oracle(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl Oracle for ChatCompletionsOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Oracle(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Oracle(format!(
                "completion returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Oracle(format!("unexpected response shape: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Oracle("completion contained no choices".to_string()))
    }
}

/// Deterministic oracle that replays a fixed queue of completions.
///
/// Zero-config stand-in for offline demos and tests; each call pops the next
/// scripted answer, and an exhausted script fails like an unreachable
/// service.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: std::sync::Mutex<std::collections::VecDeque<Result<String>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    pub fn push(&self, completion: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(completion.into()));
    }

    /// Queue a failure, as if the service were down for that call.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(EngineError::Oracle(reason.into())));
    }

    /// Number of scripted answers not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::Oracle("script exhausted".to_string())))
    }
}
