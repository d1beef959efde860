use anyhow::Result;
use clap::Parser;
use client::chat_api::{render_sources, ChatApi};
use ragcore::api::ChatRequest;
use ragcore::prompt::{PromptStyle, Turn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Chat with the idiom assistant from the terminal")]
struct Cli {
    /// Base URL of the chat backend
    #[arg(long, env = "API_URL", default_value = "http://127.0.0.1:8080")]
    api_url: String,
    /// Number of retrieved documents per question
    #[arg(long, default_value_t = 3)]
    k: usize,
    /// Answer over long documents instead of idiom lookup
    #[arg(long, default_value_t = false)]
    longdoc: bool,
    /// Request timeout seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    let api = ChatApi::new(&args.api_url, Duration::from_secs(args.timeout_secs))?;

    if !api.health().await {
        eprintln!(
            "Cannot connect to backend API at {}. Please ensure the server is running and reachable.",
            args.api_url
        );
        std::process::exit(1);
    }

    let style = if args.longdoc { PromptStyle::Longdoc } else { PromptStyle::Idiom };
    let mut history: Vec<Turn> = Vec::new();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Ask a question (/clear resets the conversation, /quit exits).");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        let query = line.trim();
        match query {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                history.clear();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        let request = ChatRequest { query: query.to_string(), k: args.k, history: history.clone(), style };
        match api.chat(&request).await {
            Ok(resp) => {
                println!("{}", resp.answer);
                if !resp.sources.is_empty() {
                    println!("\n{}", render_sources(&resp.sources));
                }
                history.push(Turn::new(query, resp.answer));
            }
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}
