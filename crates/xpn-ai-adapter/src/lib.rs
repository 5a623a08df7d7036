// SPDX-License-Identifier: MIT OR Apache-2.0
//! C3: external AI chat-completion adapter

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use xpn_core::CancellationToken;
use xpn_error::{ExpenseError, MAX_TRANSIENT_RETRIES};

/// Default soft timeout for a tier-3 AI invocation ("AI calls
/// have a per-invocation soft timeout (default 10 s)").
pub const DEFAULT_SOFT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single message in a chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System / instruction message.
    System,
    /// End-user or caller-supplied message.
    User,
}

/// The external chat-completion collaborator ("`Chat`:
/// `complete(messages, max_tokens, temperature) -> text`"). Chat clients
/// are process-wide singletons in production
#[async_trait]
pub trait Chat: Send + Sync {
    /// Completes a conversation, returning the assistant's raw text
    /// response.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::ServiceUnavailable`] if the call could not be
    /// made at all (network failure, non-success HTTP status).
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ExpenseError>;
}

/// C3's public operation, parameterized over a [`Chat`] backend.
pub struct AiAdapter<C: Chat> {
    chat: C,
    soft_timeout: Duration,
}

impl<C: Chat> AiAdapter<C> {
    /// Wraps a chat backend with [`DEFAULT_SOFT_TIMEOUT`].
    pub fn new(chat: C) -> Self {
        Self {
            chat,
            soft_timeout: DEFAULT_SOFT_TIMEOUT,
        }
    }

    /// Wraps a chat backend with a caller-chosen soft timeout.
    pub fn with_timeout(chat: C, soft_timeout: Duration) -> Self {
        Self { chat, soft_timeout }
    }

    /// `invoke(system_prompt, user_prompt, max_tokens, temperature) ->
    /// text | error` Responses are expected to be JSON;
    /// fenced-code wrapping (` ```json ... ``` `) is stripped before
    /// returning.
    ///
    /// A soft timeout races the call; on expiry this returns
    /// [`ExpenseError::TransientFault`] as a retryable transient fault
    /// so C4 can fall through to a degraded result. `cancel`
    /// short-circuits the same way.
    ///
    /// # Errors
    ///
    /// The chat backend's own [`ExpenseError::ServiceUnavailable`], or
    /// [`ExpenseError::TransientFault`] on timeout/cancellation.
    pub async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, ExpenseError> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: user_prompt.to_string(),
            },
        ];

        tokio::select! {
            _ = cancel.cancelled() => Err(ExpenseError::TransientFault {
                message: "ai invocation cancelled".to_string(),
                attempt: 1,
                max_attempts: MAX_TRANSIENT_RETRIES,
            }),
            outcome = tokio::time::timeout(
                self.soft_timeout,
                self.chat.complete(&messages, max_tokens, temperature),
            ) => match outcome {
                Ok(result) => result.map(|raw| strip_fenced_code(&raw)),
                Err(_elapsed) => Err(ExpenseError::TransientFault {
                    message: format!("ai invocation exceeded {:?}", self.soft_timeout),
                    attempt: 1,
                    max_attempts: MAX_TRANSIENT_RETRIES,
                }),
            },
        }
    }
}

/// Strips one layer of Markdown fenced-code wrapping (` ```json ... ``` `
/// or plain ` ``` ... ``` `) if present, trimming whitespace either way.
fn strip_fenced_code(text: &str) -> String {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(body) = body.strip_suffix("```") else {
        return trimmed.to_string();
    };
    // Drop an optional language tag on the fence's first line.
    let body = body.strip_prefix("json").unwrap_or(body);
    body.trim().to_string()
}

/// A [`Chat`] implementation against an OpenAI-compatible chat-completions
/// HTTP endpoint. Cheap to clone: `reqwest::Client` is `Arc`-backed
/// internally, so every clone shares one connection pool, matching the
/// "chat clients are process-wide singletons" note above.
#[derive(Clone)]
pub struct HttpChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpChat {
    /// Builds a client against `endpoint` (the full chat-completions
    /// URL) using `api_key` for bearer auth and `model` as the model
    /// identifier sent with every request.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(Deserialize)]
struct CompletionChoiceMessage {
    content: String,
}

#[async_trait]
impl Chat for HttpChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ExpenseError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ExpenseError::ServiceUnavailable {
                service: "ai",
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExpenseError::ServiceUnavailable {
                service: "ai",
                message: format!("chat endpoint returned {}", response.status()),
            });
        }

        let parsed: CompletionResponse =
            response
                .json()
                .await
                .map_err(|err| ExpenseError::ParseError {
                    message: err.to_string(),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ExpenseError::ParseError {
                message: "chat response had no choices".to_string(),
            })
    }
}
