use anyhow::{Context, Result};
use ragcore::api::{ChatRequest, ChatResponse, ErrorBody, SourceRef};
use reqwest::Client;
use std::time::Duration;

/// Client for the chat backend's HTTP API.
#[derive(Clone)]
pub struct ChatApi {
    http: Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    /// True when `GET /health` answers 200.
    pub async fn health(&self) -> bool {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "health check failed");
                false
            }
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat", self.base_url);
        let resp = self.http.post(&url).json(request).send().await.with_context(|| format!("calling {url}"))?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&text).map(|e| e.error).unwrap_or(text);
            anyhow::bail!("{status}: {detail}");
        }
        serde_json::from_str(&text).context("decoding chat response")
    }
}

/// Numbered source list shown under an answer.
pub fn render_sources(sources: &[SourceRef]) -> String {
    let mut out = String::new();
    for (idx, s) in sources.iter().enumerate() {
        let field = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "Source {}:\n  - File: {}\n  - Page: {}\n  - Chunk: {}\n",
            idx + 1,
            field(s.file_name.clone()),
            field(s.page.map(|p| p.to_string())),
            field(s.chunk.map(|c| c.to_string())),
        ));
    }
    out
}
