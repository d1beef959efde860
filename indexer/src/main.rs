use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragcore::cache::IndexCache;
use ragcore::corpus::read_corpus;
use ragcore::{Bm25Index, Bm25Params, CacheLoad, Document};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and manage the cached BM25 idiom index", long_about = None)]
struct Cli {
    /// Directory holding bm25_cache.bin and docs_cache.bin
    #[arg(long, global = true, env = "CACHE_DIR", default_value = ".")]
    cache_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from idiom files (.json, .jsonl, .txt) or a directory of them
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// BM25 term frequency saturation
        #[arg(long, default_value_t = 1.2)]
        k1: f32,
        /// BM25 length normalization
        #[arg(long, default_value_t = 0.75)]
        b: f32,
    },
    /// Remove the cached index so the next load rebuilds it
    Clear,
    /// Report what the cache currently holds
    Inspect {
        /// Also run a query against the cached index
        #[arg(long)]
        query: Option<String>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let cache = IndexCache::new(&cli.cache_dir);

    match cli.command {
        Commands::Build { input, k1, b } => build_index(&cache, &input, Bm25Params { k1, b }),
        Commands::Clear => {
            cache.clear().context("clearing index cache")?;
            println!("Cache cleared successfully");
            Ok(())
        }
        Commands::Inspect { query } => inspect(&cache, query.as_deref()),
    }
}

fn build_index(cache: &IndexCache, input: &Path, params: Bm25Params) -> Result<()> {
    let docs = read_corpus(input)?;
    tracing::info!(num_docs = docs.len(), "ingested documents");
    if docs.is_empty() {
        tracing::warn!(input = %input.display(), "no documents found; caching an empty index");
    }

    let index = Bm25Index::build(&docs, params);
    tracing::info!(num_terms = index.num_terms(), avg_doc_len = index.avg_doc_len, "index built");
    cache.save(&index, &docs).context("saving index cache")?;
    tracing::info!(output = %cache.paths().root.display(), "index build complete");
    Ok(())
}

fn inspect(cache: &IndexCache, query: Option<&str>) -> Result<()> {
    let cached = match cache.load::<Bm25Index, Document>() {
        CacheLoad::Hit(cached) => cached,
        CacheLoad::Miss => {
            println!("no cache in {}", cache.paths().root.display());
            return Ok(());
        }
        CacheLoad::Invalid(err) => {
            println!("cache in {} is unusable: {err}", cache.paths().root.display());
            return Ok(());
        }
    };

    println!("documents: {}", cached.documents.len());
    println!("terms:     {}", cached.index.num_terms());
    println!("avg len:   {:.2}", cached.index.avg_doc_len);
    if let Some(q) = query {
        for hit in cached.index.search(q, 5) {
            let text = cached.documents.get(hit.doc_id as usize).map(|d| d.text.as_str()).unwrap_or("<missing>");
            println!("{:>8.4}  #{:<5} {}", hit.score, hit.doc_id, text);
        }
    }
    Ok(())
}
