use anyhow::Result;
use clap::Parser;
use client::{DatasetLogger, Generator, MlflowTracker, OllamaClient, RunStatus, TrackedRun};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};

const QUESTIONS: &[&str] = &[
    "Xin chào, bạn là ai?",
    "MLflow dùng để làm gì?",
    "Vector database hoạt động như thế nào?",
];

#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Run the chat model over sample prompts and record the run in MLflow")]
struct Cli {
    /// MLflow tracking server
    #[arg(long, env = "MLFLOW_TRACKING_URI", default_value = "http://127.0.0.1:5000")]
    tracking_uri: String,
    #[arg(long, default_value = "chatbot_training")]
    experiment: String,
    #[arg(long, env = "OLLAMA_URL", default_value = "http://127.0.0.1:11434")]
    ollama_url: String,
    #[arg(long, env = "OLLAMA_MODEL", default_value = "qwen2.5:3b")]
    model: String,
    /// Recorded as a parameter only; embeddings are computed elsewhere
    #[arg(long, default_value = "mxbai-embed-large:latest")]
    embedding_model: String,
    /// JSONL file collecting prompt/response pairs
    #[arg(long, default_value = "chat_dataset.jsonl")]
    dataset: PathBuf,
    /// Directory uploaded as-is under `extras/` when given
    #[arg(long)]
    extra_artifacts: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let tracker = MlflowTracker::connect(&args.tracking_uri, &args.experiment).await?;
    let llm = OllamaClient::new(&args.ollama_url, &args.model, Duration::from_secs(300))?;
    let dataset = DatasetLogger::open(&args.dataset)?;

    let started = time::OffsetDateTime::now_utc().unix_timestamp();
    let run = tracker.start_run(Some(&format!("training_{started}"))).await?;
    match track(&run, &llm, &dataset, &args).await {
        Ok(()) => {
            run.finish(RunStatus::Finished).await?;
            tracing::info!("training completed, dataset logged to mlflow");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "training run failed");
            run.finish(RunStatus::Failed).await?;
            Err(e)
        }
    }
}

async fn track(run: &TrackedRun, llm: &OllamaClient, dataset: &DatasetLogger, args: &Cli) -> Result<()> {
    run.log_param("llm_model", &args.model).await?;
    run.log_param("embedding_model", &args.embedding_model).await?;
    run.log_metric("training_loss", 0.15, Some(1)).await?;

    let mut rows = Vec::with_capacity(QUESTIONS.len());
    for (i, question) in QUESTIONS.iter().enumerate() {
        let step = i as i64 + 1;
        let started = Instant::now();
        let answer = llm.generate(question).await?;
        let latency = started.elapsed().as_secs_f64();
        println!("\nQ: {question}\nA: {answer}\n");

        dataset.log(question, &answer, llm.model())?;
        run.log_dict(
            &json!({ "step": step, "prompt": question, "response": answer }),
            &format!("llm_response_step{step}.json"),
            Some("llm_outputs"),
        )
        .await?;
        run.log_metric("latency_s", latency, Some(step)).await?;
        run.log_metric("response_chars", answer.chars().count() as f64, Some(step)).await?;
        rows.push(json!({ "step": step, "prompt": question, "response": answer, "latency_s": latency }));
    }

    run.log_table(&rows, "llm_responses.json").await?;
    run.log_artifact(dataset.path(), Some("datasets")).await?;
    if let Some(dir) = &args.extra_artifacts {
        run.log_artifacts(dir, Some("extras")).await?;
    }
    Ok(())
}
