use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use client::Generator;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use ragcore::cache::{DOCS_FILE, INDEX_FILE};
use ragcore::{Bm25Index, Bm25Params, DocMeta, Document, IndexCache};
use serde_json::{json, Value};
use server::{build_app, AppConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().push(prompt.to_string());
        Ok("  under the weather - cảm thấy không khỏe\n".to_string())
    }

    fn model(&self) -> &str {
        "recording"
    }
}

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }

    fn model(&self) -> &str {
        "failing"
    }
}

fn write_corpus(dir: &Path) -> std::path::PathBuf {
    let corpus = dir.join("idioms.txt");
    fs::write(
        &corpus,
        "break the ice - phá vỡ sự im lặng\nunder the weather - cảm thấy không khỏe\npiece of cake - dễ như ăn bánh\n",
    )
    .unwrap();
    corpus
}

fn app_with(dir: &Path, corpus: bool, generator: Arc<dyn Generator>) -> Router {
    let config = AppConfig {
        cache_dir: dir.join("cache"),
        corpus: corpus.then(|| write_corpus(dir)),
        params: Bm25Params::default(),
        admin_token: Some(TOKEN.to_string()),
    };
    build_app(config, generator).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::String(String::from_utf8_lossy(&body).into_owned()));
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri);
    if let Some(t) = token {
        builder = builder.header("X-ADMIN-TOKEN", t);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), true, Arc::new(RecordingGenerator::default()));

    let (status, json) = send(&app, get("/search?q=feeling%20under%20the%20weather&k=2")).await;
    assert_eq!(status, StatusCode::OK);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["doc_id"].as_u64().unwrap(), 1);
    assert_eq!(arr[0]["source"]["file_name"], "idioms.txt");
    assert_eq!(arr[0]["source"]["chunk"], 2);
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), false, Arc::new(RecordingGenerator::default()));
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn chat_builds_prompt_from_retrieved_idioms() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let app = app_with(dir.path(), true, generator.clone());

    let body = json!({
        "query": "I feel under the weather",
        "k": 1,
        "history": [{"user": "hi", "assistant": "hello"}]
    });
    let (status, json) = send(&app, post_json("/chat", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["answer"], "under the weather - cảm thấy không khỏe");
    let sources = json["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["file_name"], "idioms.txt");

    let prompts = generator.prompts.lock();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Context:\nunder the weather - cảm thấy không khỏe\n"));
    assert!(prompts[0].contains("User: hi\nAssistant: hello"));
    assert!(prompts[0].contains("Question: I feel under the weather"));
}

#[tokio::test]
async fn chat_rejects_empty_query() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), true, Arc::new(RecordingGenerator::default()));
    let (status, json) = send(&app, post_json("/chat", json!({ "query": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn chat_reports_generation_failure() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), true, Arc::new(FailingGenerator));
    let (status, json) = send(&app, post_json("/chat", json!({ "query": "break the ice" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn starts_from_cache_without_corpus() {
    let dir = tempdir().unwrap();
    let docs = vec![Document::with_meta(
        "spill the beans - để lộ bí mật",
        DocMeta { source: Some("cached.json".into()), page: None, chunk: None },
    )];
    let index = Bm25Index::build(&docs, Bm25Params::default());
    IndexCache::new(dir.path().join("cache")).save(&index, &docs).unwrap();

    let app = app_with(dir.path(), false, Arc::new(RecordingGenerator::default()));
    let (_, json) = send(&app, get("/search?q=spill%20the%20beans")).await;
    assert_eq!(json["total_hits"], 1);
    assert_eq!(json["results"][0]["source"]["file_name"], "cached.json");
}

#[tokio::test]
async fn admin_endpoints_require_token() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), true, Arc::new(RecordingGenerator::default()));

    let (status, _) = send(&app, admin("/index/clear", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, admin("/index/reload", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(dir.path().join("cache").join(INDEX_FILE).exists());
}

#[tokio::test]
async fn clear_then_reload_rebuilds_from_corpus() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), true, Arc::new(RecordingGenerator::default()));
    let cache_dir = dir.path().join("cache");
    assert!(cache_dir.join(INDEX_FILE).exists());

    let (status, json) = send(&app, admin("/index/clear", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["documents"], 0);
    assert!(!cache_dir.join(INDEX_FILE).exists());
    assert!(!cache_dir.join(DOCS_FILE).exists());

    let (_, json) = send(&app, get("/search?q=piece%20of%20cake")).await;
    assert_eq!(json["total_hits"], 0);

    let (status, json) = send(&app, admin("/index/reload", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["origin"], "rebuilt");
    assert_eq!(json["documents"], 3);
    assert!(cache_dir.join(INDEX_FILE).exists());

    let (status, json) = send(&app, admin("/index/reload", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["origin"], "cache");

    let (_, json) = send(&app, get("/search?q=piece%20of%20cake")).await;
    assert_eq!(json["results"][0]["doc_id"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_repairs_a_damaged_cache() {
    let dir = tempdir().unwrap();
    let app = app_with(dir.path(), true, Arc::new(RecordingGenerator::default()));
    let docs_path = dir.path().join("cache").join(DOCS_FILE);

    let mut bytes = fs::read(&docs_path).unwrap();
    let len = bytes.len();
    bytes[len / 2..].fill(0xff);
    fs::write(&docs_path, &bytes).unwrap();

    let (status, json) = send(&app, admin("/index/reload", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["origin"], "rebuilt");
    assert_eq!(json["documents"], 3);

    let (_, json) = send(&app, get("/search?q=break%20the%20ice")).await;
    assert_eq!(json["results"][0]["doc_id"], 0);
}
