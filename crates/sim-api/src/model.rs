//! Model client for an OpenAI-compatible chat endpoint. The conversation
//! is flattened into a single user message with role tags, which keeps
//! multi-turn corrective exchanges working against providers that mangle
//! long role alternations. Blocking by design: the kernel is synchronous
//! and the server runs turns inside `spawn_blocking`.

use std::collections::VecDeque;
use std::time::Duration;

use contracts::{ChatMessage, ModelCallFailure};
use serde::{Deserialize, Serialize};
use sim_core::turn::ModelClient;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct HttpModelClient {
    http: reqwest::blocking::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl HttpModelClient {
    pub fn new(
        base_url: &str,
        model: &str,
        temperature: f32,
        timeout_secs: Option<u64>,
    ) -> Result<Self, ModelCallFailure> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
            .build()
            .map_err(|e| ModelCallFailure::unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    stream: bool,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// `<role>` tags around each message, concatenated.
fn flatten(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = message.role.as_str();
        out.push_str(&format!("<{role}>\n{}\n</{role}>\n", message.content));
    }
    out
}

impl ModelClient for HttpModelClient {
    fn send(&mut self, messages: &[ChatMessage]) -> Result<String, ModelCallFailure> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            stream: false,
            messages: vec![WireMessage {
                role: "user",
                content: flatten(messages),
            }],
        };
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self.http.post(&url).json(&body).send().map_err(|e| {
            if e.is_timeout() {
                ModelCallFailure::timeout(e.to_string())
            } else {
                ModelCallFailure::unavailable(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ModelCallFailure::new(
                status.as_u16(),
                format!("model endpoint returned {status}"),
            ));
        }
        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ModelCallFailure::new(502, format!("unreadable model reply: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ModelCallFailure::new(502, "model reply carried no choices"))
    }
}

/// Canned client for tests and offline runs: replies in order, then fails.
pub struct ScriptedModel {
    replies: VecDeque<String>,
}

impl ScriptedModel {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
        }
    }
}

impl ModelClient for ScriptedModel {
    fn send(&mut self, _messages: &[ChatMessage]) -> Result<String, ModelCallFailure> {
        self.replies
            .pop_front()
            .ok_or_else(|| ModelCallFailure::unavailable("script exhausted"))
    }
}
