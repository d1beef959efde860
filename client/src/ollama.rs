use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anything that turns a finished prompt into an answer.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: Option<Message>,
    error: Option<String>,
}

/// Client for the Ollama chat endpoint (`POST /api/chat`, non-streaming).
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), model: model.into() })
    }

    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatBody { model: &self.model, messages, stream: false };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("calling {url}"))?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("ollama returned {status}: {text}");
        }
        parse_reply(&text)
    }
}

fn parse_reply(body: &str) -> Result<String> {
    let reply: ChatReply = serde_json::from_str(body).context("decoding ollama reply")?;
    if let Some(err) = reply.error {
        anyhow::bail!("ollama error: {err}");
    }
    reply
        .message
        .map(|m| m.content)
        .context("ollama reply has no message")
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let started = std::time::Instant::now();
        let answer = self.chat(&[Message::user(prompt)]).await?;
        tracing::debug!(model = %self.model, took_ms = started.elapsed().as_millis() as u64, "generated answer");
        Ok(answer)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
