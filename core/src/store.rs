use crate::cache::{CacheLoad, IndexCache};
use crate::corpus::read_corpus;
use crate::{Bm25Index, Bm25Params, Document};
use std::path::Path;

/// Where the documents of a [`KeywordStore`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrigin {
    Cache,
    Rebuilt,
    Empty,
}

/// Keyword index plus the documents its postings point into.
#[derive(Debug, Clone, Default)]
pub struct KeywordStore {
    pub index: Bm25Index,
    pub documents: Vec<Document>,
}

impl KeywordStore {
    pub fn build(documents: Vec<Document>, params: Bm25Params) -> Self {
        let index = Bm25Index::build(&documents, params);
        Self { index, documents }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Restore from the cache, or rebuild from `corpus` and repopulate the cache.
    ///
    /// Any cache miss (absent, incomplete, corrupted) leads to a rebuild when a
    /// corpus is configured. Failing to write the rebuilt pair back is logged but
    /// does not fail the call.
    pub fn load_or_build(cache: &IndexCache, corpus: Option<&Path>, params: Bm25Params) -> anyhow::Result<(Self, StoreOrigin)> {
        match cache.load::<Bm25Index, Document>() {
            CacheLoad::Hit(cached) => {
                return Ok((Self { index: cached.index, documents: cached.documents }, StoreOrigin::Cache));
            }
            CacheLoad::Miss => tracing::info!("index cache empty"),
            CacheLoad::Invalid(err) => tracing::info!(error = %err, "index cache unusable, rebuilding"),
        }

        let Some(corpus) = corpus else {
            tracing::warn!("no corpus configured; starting with an empty index");
            return Ok((Self::default(), StoreOrigin::Empty));
        };
        let documents = read_corpus(corpus)?;
        let store = Self::build(documents, params);
        // save() already logged the cause.
        let _ = cache.save(&store.index, &store.documents);
        Ok((store, StoreOrigin::Rebuilt))
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<(&Document, f32)> {
        self.index
            .search(query, k)
            .into_iter()
            .filter_map(|hit| self.documents.get(hit.doc_id as usize).map(|d| (d, hit.score)))
            .collect()
    }
}
