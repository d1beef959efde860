use crate::{DocMeta, Document};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct InputDoc {
    text: String,
    source: Option<String>,
    page: Option<u32>,
    chunk: Option<u32>,
}

impl InputDoc {
    fn into_document(self, fallback_source: &str) -> Document {
        let source = self.source.unwrap_or_else(|| fallback_source.to_string());
        Document::with_meta(self.text, DocMeta { source: Some(source), page: self.page, chunk: self.chunk })
    }
}

/// Read idiom documents from a `.json`, `.jsonl` or `.txt` file, or every such
/// file under a directory (in path order, so rebuilds are reproducible).
pub fn read_corpus<P: AsRef<Path>>(input: P) -> Result<Vec<Document>> {
    let input = input.as_ref();
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && corpus_kind(p).is_some() {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        anyhow::bail!("corpus path {} does not exist", input.display());
    }

    let mut docs = Vec::new();
    for file in files {
        let before = docs.len();
        read_file(&file, &mut docs).with_context(|| format!("reading corpus file {}", file.display()))?;
        tracing::debug!(file = %file.display(), documents = docs.len() - before, "read corpus file");
    }
    Ok(docs)
}

#[derive(Clone, Copy)]
enum CorpusKind {
    Json,
    Jsonl,
    Text,
}

fn corpus_kind(path: &Path) -> Option<CorpusKind> {
    match path.extension().and_then(|s| s.to_str())? {
        "json" => Some(CorpusKind::Json),
        "jsonl" => Some(CorpusKind::Jsonl),
        "txt" => Some(CorpusKind::Text),
        _ => None,
    }
}

fn read_file(file: &Path, docs: &mut Vec<Document>) -> Result<()> {
    let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let kind = corpus_kind(file).with_context(|| format!("unsupported corpus file type: {}", file.display()))?;
    let reader = BufReader::new(File::open(file)?);
    match kind {
        CorpusKind::Jsonl => {
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() { continue; }
                let doc: InputDoc = serde_json::from_str(&line)?;
                docs.push(doc.into_document(&name));
            }
        }
        CorpusKind::Json => {
            let json: serde_json::Value = serde_json::from_reader(reader)?;
            match json {
                serde_json::Value::Array(arr) => {
                    for v in arr {
                        let doc: InputDoc = serde_json::from_value(v)?;
                        docs.push(doc.into_document(&name));
                    }
                }
                serde_json::Value::Object(_) => {
                    let doc: InputDoc = serde_json::from_value(json)?;
                    docs.push(doc.into_document(&name));
                }
                _ => anyhow::bail!("expected a JSON object or array"),
            }
        }
        CorpusKind::Text => {
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                let text = line.trim();
                if text.is_empty() { continue; }
                let meta = DocMeta { source: Some(name.clone()), page: None, chunk: Some(n as u32 + 1) };
                docs.push(Document::with_meta(text, meta));
            }
        }
    }
    Ok(())
}
