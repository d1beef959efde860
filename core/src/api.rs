//! Request/response bodies shared by the chat backend and its clients.

use crate::prompt::{PromptStyle, Turn};
use crate::DocMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default = "default_chat_k")]
    pub k: usize,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub style: PromptStyle,
}

pub fn default_chat_k() -> usize { 3 }

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), k: default_chat_k(), history: Vec::new(), style: PromptStyle::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: Option<String>,
    pub page: Option<u32>,
    pub chunk: Option<u32>,
}

impl From<&DocMeta> for SourceRef {
    fn from(meta: &DocMeta) -> Self {
        Self { file_name: meta.source.clone(), page: meta.page, chunk: meta.chunk }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub score: f32,
    pub text: String,
    pub source: SourceRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"query":"break the ice"}"#).unwrap();
        assert_eq!(req.k, 3);
        assert!(req.history.is_empty());
        assert_eq!(req.style, PromptStyle::Idiom);
    }

    #[test]
    fn source_ref_from_meta() {
        let meta = DocMeta { source: Some("idioms.pdf".into()), page: Some(2), chunk: Some(5) };
        let s = SourceRef::from(&meta);
        assert_eq!(s.file_name.as_deref(), Some("idioms.pdf"));
        assert_eq!((s.page, s.chunk), (Some(2), Some(5)));
    }
}
