use anyhow::Result;
use axum::Router;
use clap::Parser;
use client::OllamaClient;
use ragcore::Bm25Params;
use server::{build_app, AppConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Directory holding bm25_cache.bin and docs_cache.bin
    #[arg(long, env = "CACHE_DIR", default_value = ".")]
    cache_dir: PathBuf,
    /// Idiom corpus (file or directory) to rebuild from on a cache miss
    #[arg(long, env = "CORPUS")]
    corpus: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "OLLAMA_URL", default_value = "http://127.0.0.1:11434")]
    ollama_url: String,
    #[arg(long, env = "OLLAMA_MODEL", default_value = "qwen2.5:3b")]
    model: String,
    /// LLM request timeout seconds
    #[arg(long, default_value_t = 120)]
    llm_timeout_secs: u64,
    #[arg(long, default_value_t = 1.2)]
    k1: f32,
    #[arg(long, default_value_t = 0.75)]
    b: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let generator = OllamaClient::new(&args.ollama_url, &args.model, Duration::from_secs(args.llm_timeout_secs))?;
    let config = AppConfig {
        cache_dir: args.cache_dir,
        corpus: args.corpus,
        params: Bm25Params { k1: args.k1, b: args.b },
        admin_token: std::env::var("ADMIN_TOKEN").ok(),
    };
    let app: Router = build_app(config, Arc::new(generator))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, model = %args.model, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
