use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TermId = u32;
pub type DocId = u32;

/// Where a document came from, as shown next to chat answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    pub source: Option<String>,
    pub page: Option<u32>,
    pub chunk: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    #[serde(default)]
    pub metadata: DocMeta,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), metadata: DocMeta::default() }
    }

    pub fn with_meta(text: impl Into<String>, metadata: DocMeta) -> Self {
        Self { text: text.into(), metadata }
    }
}

impl AsRef<str> for Document {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f32,
    /// Length normalization, 0 disables it.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f32,
}

/// Okapi BM25 keyword index. Doc ids are positions in the document sequence it was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bm25Index {
    pub params: Bm25Params,
    pub dictionary: HashMap<String, TermId>,
    pub df: Vec<u32>,
    pub postings: HashMap<TermId, Vec<Posting>>, // sorted by doc_id
    pub doc_lens: Vec<u32>,
    pub avg_doc_len: f32,
}

pub const MAX_K: usize = 100;

impl Bm25Index {
    pub fn new() -> Self { Self::default() }

    pub fn build<D: AsRef<str>>(docs: &[D], params: Bm25Params) -> Self {
        let mut index = Bm25Index { params, ..Default::default() };
        let mut total_len: u64 = 0;

        for (doc_id, doc) in docs.iter().enumerate() {
            let doc_id = doc_id as DocId;
            let tokens = tokenize(doc.as_ref());
            total_len += tokens.len() as u64;
            index.doc_lens.push(tokens.len() as u32);

            let mut tf_counts: HashMap<TermId, u32> = HashMap::new();
            for term in tokens {
                let next_id = index.dictionary.len() as TermId;
                let tid = *index.dictionary.entry(term).or_insert(next_id);
                if tid == next_id {
                    index.df.push(0);
                }
                *tf_counts.entry(tid).or_insert(0) += 1;
            }
            for (tid, tf) in tf_counts {
                index.df[tid as usize] += 1;
                index.postings.entry(tid).or_default().push(Posting { doc_id, tf });
            }
        }

        // Documents are visited in order, so postings are already sorted by doc_id.
        index.avg_doc_len = if docs.is_empty() { 0.0 } else { total_len as f32 / docs.len() as f32 };
        tracing::debug!(num_docs = docs.len(), num_terms = index.dictionary.len(), "built bm25 index");
        index
    }

    pub fn num_docs(&self) -> usize { self.doc_lens.len() }

    pub fn num_terms(&self) -> usize { self.dictionary.len() }

    fn idf(&self, tid: TermId) -> f32 {
        let n = self.num_docs() as f32;
        let df = self.df.get(tid as usize).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Rank documents against `query`. `k` is clamped to `1..=MAX_K`.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredDoc> {
        let mut query_tf: HashMap<TermId, u32> = HashMap::new();
        for term in tokenize(query) {
            if let Some(&tid) = self.dictionary.get(&term) {
                *query_tf.entry(tid).or_insert(0) += 1;
            }
        }
        if query_tf.is_empty() {
            return Vec::new();
        }

        let Bm25Params { k1, b } = self.params;
        let avg = if self.avg_doc_len > 0.0 { self.avg_doc_len } else { 1.0 };
        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for (tid, qtf) in query_tf {
            let idf = self.idf(tid);
            let Some(postings) = self.postings.get(&tid) else { continue };
            for p in postings {
                // Postings may come from disk; skip ids past the document table.
                let Some(&len) = self.doc_lens.get(p.doc_id as usize) else { continue };
                let tf = p.tf as f32;
                let len = len as f32;
                let norm = tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len / avg));
                *scores.entry(p.doc_id).or_insert(0.0) += idf * norm * qtf as f32;
            }
        }

        let mut ranked: Vec<ScoredDoc> = scores
            .into_iter()
            .map(|(doc_id, score)| ScoredDoc { doc_id, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        ranked.truncate(k.clamp(1, MAX_K));
        ranked
    }
}
