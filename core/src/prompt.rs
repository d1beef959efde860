//! Prompt construction for the chat assistant.
//!
//! Everything here is a pure function of the query, the retrieved documents and
//! the conversation so far. The result is a single instruction string in the
//! `[INST]` format the serving model expects.

use serde::{Deserialize, Serialize};

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self { user: user.into(), assistant: assistant.into() }
    }
}

/// A single message in a flat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum ChatMessage {
    Human(String),
    Ai(String),
}

/// Conversation history in either of the shapes callers keep it in.
#[derive(Debug, Clone, Copy)]
pub enum History<'a> {
    Turns(&'a [Turn]),
    Messages(&'a [ChatMessage]),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// Idiom lookup: one idiom, its Vietnamese meaning and an example.
    #[default]
    Idiom,
    /// Free-form answers over long documents.
    Longdoc,
}

/// Pair up a flat transcript. A human message directly followed by an AI
/// message makes a turn; anything unpaired is dropped.
pub fn pair_messages(messages: &[ChatMessage]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut i = 0;
    while i + 1 < messages.len() {
        match (&messages[i], &messages[i + 1]) {
            (ChatMessage::Human(user), ChatMessage::Ai(assistant)) => {
                turns.push(Turn::new(user.clone(), assistant.clone()));
                i += 2;
            }
            _ => i += 1,
        }
    }
    turns
}

fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("User: {}\nAssistant: {}", t.user, t.assistant))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_history(history: Option<History<'_>>) -> String {
    match history {
        None => String::new(),
        Some(History::Turns(turns)) => render_turns(turns),
        Some(History::Messages(messages)) => render_turns(&pair_messages(messages)),
    }
}

fn render_context<D: AsRef<str>>(docs: &[D]) -> String {
    docs.iter().map(|d| d.as_ref()).collect::<Vec<_>>().join("\n")
}

const IDIOM_INSTRUCTIONS: &str = r#"<s>[INST] <<SYS>>
You are a technical assistant that answers strictly based on the given context.
The context contains a list of English idioms with their Vietnamese meanings.
<</SYS>>

Rules:
- If the user's input is a greeting (e.g., "Hello", "Hi", "Xin chào"), respond with a greeting back.
- Otherwise:
  - If the user's question is in English, find the idiom in the context that best matches the question.
  - If the user's question is in Vietnamese, find the idiom in the context whose Vietnamese meaning is closest to the question.
  - Output must always contain:
      1. The English idiom
      2. Its Vietnamese meaning
      3. One example usage of the idiom in English, followed by its Vietnamese translation
  - The output format must be:
      idiom - Vietnamese meaning
      Example: <English sentence> | Ví dụ: <Vietnamese sentence>
  - If no idiom matches, output exactly: "Không tìm thấy".
"#;

const LONGDOC_INSTRUCTIONS: &str = r#"<s>[INST] <<SYS>>
You are a helpful assistant that answers strictly based on the provided context.
The context may contain long articles, reports, or documents.
<</SYS>>

Rules:
- Use only the context below. Do not hallucinate.
- If multiple context chunks are relevant, synthesize them into a single coherent answer.
- If no relevant information is found, answer exactly: "Không tìm thấy thông tin trong tài liệu".
- Answer in the same language as the user's question.
- Keep the answer concise (2–5 sentences) unless explicitly asked for details.
- If the context has lists, tables, or numbers, preserve them in the answer if relevant."#;

fn assemble(instructions: &str, answer_cue: &str, query: &str, context: &str, history: &str) -> String {
    let prompt = format!(
        "{instructions}\n\nContext:\n{context}\n\nConversation history:\n{history}\n\nQuestion: {query}\n\n{answer_cue}\n[/INST]"
    );
    prompt.trim().to_string()
}

/// Idiom assistant prompt.
pub fn build_prompt_with_history<D: AsRef<str>>(query: &str, docs: &[D], history: Option<History<'_>>) -> String {
    assemble(IDIOM_INSTRUCTIONS, "Answer (one line only):", query, &render_context(docs), &render_history(history))
}

/// Long-document assistant prompt.
pub fn build_prompt_with_history_longdoc<D: AsRef<str>>(query: &str, docs: &[D], history: Option<History<'_>>) -> String {
    assemble(LONGDOC_INSTRUCTIONS, "Answer:", query, &render_context(docs), &render_history(history))
}

pub fn build_prompt<D: AsRef<str>>(style: PromptStyle, query: &str, docs: &[D], history: Option<History<'_>>) -> String {
    match style {
        PromptStyle::Idiom => build_prompt_with_history(query, docs, history),
        PromptStyle::Longdoc => build_prompt_with_history_longdoc(query, docs, history),
    }
}
