use anyhow::Result;
use axum::{extract::{Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use client::Generator;
use parking_lot::RwLock;
use ragcore::api::{ChatRequest, ChatResponse, ErrorBody, SearchHit, SearchResponse, SourceRef};
use ragcore::prompt::{build_prompt, History};
use ragcore::{Bm25Params, IndexCache, KeywordStore, StoreOrigin};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Serialize, Deserialize)]
pub struct IndexStatus {
    pub origin: String,
    pub documents: usize,
    pub terms: usize,
}

/// Startup settings for [`build_app`].
pub struct AppConfig {
    pub cache_dir: PathBuf,
    /// Source to rebuild from when the cache misses.
    pub corpus: Option<PathBuf>,
    pub params: Bm25Params,
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<IndexCache>,
    pub corpus: Option<PathBuf>,
    pub params: Bm25Params,
    pub store: Arc<RwLock<Arc<KeywordStore>>>,
    pub generator: Arc<dyn Generator>,
    pub admin_token: Option<String>,
}

impl AppState {
    fn snapshot(&self) -> Arc<KeywordStore> {
        self.store.read().clone()
    }
}

pub fn build_app(config: AppConfig, generator: Arc<dyn Generator>) -> Result<Router> {
    let cache = IndexCache::new(&config.cache_dir);
    let (store, origin) = KeywordStore::load_or_build(&cache, config.corpus.as_deref(), config.params)?;
    tracing::info!(?origin, documents = store.documents.len(), "keyword index ready");

    let app_state = AppState {
        cache: Arc::new(cache),
        corpus: config.corpus,
        params: config.params,
        store: Arc::new(RwLock::new(Arc::new(store))),
        generator,
        admin_token: config.admin_token,
    };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/chat", post(chat_handler))
        .route("/index/clear", post(index_clear))
        .route("/index/reload", post(index_reload))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

fn search_hits(store: &KeywordStore, query: &str, k: usize) -> Vec<SearchHit> {
    store
        .index
        .search(query, k)
        .into_iter()
        .filter_map(|hit| {
            let doc = store.documents.get(hit.doc_id as usize)?;
            Some(SearchHit { doc_id: hit.doc_id, score: hit.score, text: doc.text.clone(), source: SourceRef::from(&doc.metadata) })
        })
        .collect()
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let store = state.snapshot();
    let results = search_hits(&store, &params.q, params.k);
    Json(SearchResponse { query: params.q, took_s: start.elapsed().as_secs_f64(), total_hits: results.len(), results })
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: message.into() }))
}

pub async fn chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Json<ChatResponse>, ApiError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "query must not be empty"));
    }

    let store = state.snapshot();
    let hits = store.search(query, req.k);
    let docs: Vec<&str> = hits.iter().map(|(d, _)| d.text.as_str()).collect();
    let sources: Vec<SourceRef> = hits.iter().map(|(d, _)| SourceRef::from(&d.metadata)).collect();
    let history = (!req.history.is_empty()).then_some(History::Turns(&req.history));
    let prompt = build_prompt(req.style, query, &docs, history);
    tracing::debug!(retrieved = docs.len(), prompt_chars = prompt.len(), "built prompt");

    match state.generator.generate(&prompt).await {
        Ok(answer) => Ok(Json(ChatResponse { answer: answer.trim().to_string(), sources })),
        Err(e) => {
            tracing::warn!(error = %e, model = state.generator.model(), "generation failed");
            Err(api_error(StatusCode::BAD_GATEWAY, format!("generation failed: {e}")))
        }
    }
}

// --- Admin endpoints ---
async fn index_clear(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IndexStatus>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    state
        .cache
        .clear()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    *state.store.write() = Arc::new(KeywordStore::default());
    Ok(Json(IndexStatus { origin: "cleared".into(), documents: 0, terms: 0 }))
}

async fn index_reload(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IndexStatus>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let (cache, corpus, params) = (state.cache.clone(), state.corpus.clone(), state.params);
    // Reading the corpus and fsyncing the cache block; keep them off the async workers.
    let (store, origin) = tokio::task::spawn_blocking(move || KeywordStore::load_or_build(&cache, corpus.as_deref(), params))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("reload task failed: {e}")))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    let status = IndexStatus {
        origin: match origin {
            StoreOrigin::Cache => "cache",
            StoreOrigin::Rebuilt => "rebuilt",
            StoreOrigin::Empty => "empty",
        }
        .into(),
        documents: store.documents.len(),
        terms: store.index.num_terms(),
    };
    *state.store.write() = Arc::new(store);
    Ok(Json(status))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
