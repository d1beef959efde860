//! Thin adapter over the MLflow tracking REST API.
//!
//! Experiments are looked up by name and created on first use. Artifacts are
//! uploaded through the tracking server's artifact proxy, so only runs whose
//! artifact URI uses the `mlflow-artifacts:` scheme can store them.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

const API: &str = "api/2.0/mlflow";
const ARTIFACTS_API: &str = "api/2.0/mlflow-artifacts/artifacts";
const PROXY_SCHEME: &str = "mlflow-artifacts:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Finished,
    Failed,
    Killed,
}

#[derive(Clone)]
pub struct MlflowTracker {
    http: Client,
    base_url: String,
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentReply {
    experiment: ExperimentInfo,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentReply {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunReply {
    run: RunBody,
}

#[derive(Debug, Deserialize)]
struct RunBody {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: Option<String>,
    message: Option<String>,
}

impl MlflowTracker {
    /// Connect to `tracking_uri` and select (or create) `experiment_name`.
    pub async fn connect(tracking_uri: &str, experiment_name: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url = tracking_uri.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("tracking uri must be an http(s) url, got {tracking_uri}");
        }
        let mut tracker = Self { http, base_url, experiment_id: String::new() };
        tracker.experiment_id = tracker.experiment_id_for(experiment_name).await?;
        tracing::info!(experiment = experiment_name, id = %tracker.experiment_id, "using mlflow experiment");
        Ok(tracker)
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    async fn experiment_id_for(&self, name: &str) -> Result<String> {
        let url = format!("{}/{API}/experiments/get-by-name", self.base_url);
        let resp = self.http.get(&url).query(&[("experiment_name", name)]).send().await?;
        if resp.status().is_success() {
            let reply: ExperimentReply = resp.json().await?;
            return Ok(reply.experiment.experiment_id);
        }
        let body = resp.text().await.unwrap_or_default();
        let missing = serde_json::from_str::<ApiError>(&body)
            .ok()
            .and_then(|e| e.error_code)
            .is_some_and(|code| code == "RESOURCE_DOES_NOT_EXIST");
        if !missing {
            anyhow::bail!("looking up experiment {name}: {body}");
        }
        let reply: CreateExperimentReply = self.post("experiments/create", &json!({ "name": name })).await?;
        Ok(reply.experiment_id)
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &serde_json::Value) -> Result<T> {
        let url = format!("{}/{API}/{endpoint}", self.base_url);
        let resp = self.http.post(&url).json(body).send().await.with_context(|| format!("calling {url}"))?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&text)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(text);
            anyhow::bail!("mlflow {endpoint} returned {status}: {detail}");
        }
        // Most endpoints reply with `{}`.
        let text = if text.trim().is_empty() { "{}".to_string() } else { text };
        serde_json::from_str(&text).with_context(|| format!("decoding mlflow {endpoint} reply"))
    }

    pub async fn start_run(&self, run_name: Option<&str>) -> Result<TrackedRun> {
        let mut body = json!({ "experiment_id": self.experiment_id, "start_time": now_millis() });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
        }
        let reply: RunReply = self.post("runs/create", &body).await?;
        tracing::info!(run_id = %reply.run.info.run_id, "started mlflow run");
        Ok(TrackedRun {
            tracker: self.clone(),
            run_id: reply.run.info.run_id,
            artifact_uri: reply.run.info.artifact_uri,
        })
    }
}

/// An open run. Call [`finish`](Self::finish) when done; dropping it leaves the run RUNNING.
pub struct TrackedRun {
    tracker: MlflowTracker,
    run_id: String,
    artifact_uri: String,
}

impl TrackedRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn log_param(&self, key: &str, value: impl ToString) -> Result<()> {
        let body = json!({ "run_id": self.run_id, "key": key, "value": value.to_string() });
        self.tracker.post::<serde_json::Value>("runs/log-parameter", &body).await?;
        Ok(())
    }

    pub async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<()> {
        let params: Vec<_> = params.iter().map(|(k, v)| json!({ "key": k, "value": v })).collect();
        let body = json!({ "run_id": self.run_id, "params": params });
        self.tracker.post::<serde_json::Value>("runs/log-batch", &body).await?;
        Ok(())
    }

    pub async fn log_metric(&self, key: &str, value: f64, step: Option<i64>) -> Result<()> {
        let body = json!({
            "run_id": self.run_id,
            "key": key,
            "value": value,
            "timestamp": now_millis(),
            "step": step.unwrap_or(0),
        });
        self.tracker.post::<serde_json::Value>("runs/log-metric", &body).await?;
        Ok(())
    }

    pub async fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: Option<i64>) -> Result<()> {
        let timestamp = now_millis();
        let metrics: Vec<_> = metrics
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v, "timestamp": timestamp, "step": step.unwrap_or(0) }))
            .collect();
        let body = json!({ "run_id": self.run_id, "metrics": metrics });
        self.tracker.post::<serde_json::Value>("runs/log-batch", &body).await?;
        Ok(())
    }

    /// Upload `value` as pretty JSON to `artifact_path/file_name`.
    pub async fn log_dict<T: Serialize>(&self, value: &T, file_name: &str, artifact_path: Option<&str>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.upload(&join_artifact_path(artifact_path, file_name), bytes).await
    }

    /// Upload a local file under `artifact_path`, keeping its file name.
    pub async fn log_artifact(&self, local_path: &Path, artifact_path: Option<&str>) -> Result<()> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("artifact path {} has no file name", local_path.display()))?;
        let bytes = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("reading artifact {}", local_path.display()))?;
        self.upload(&join_artifact_path(artifact_path, file_name), bytes).await
    }

    /// Upload every file under `local_dir`, keeping the directory layout below `artifact_path`.
    pub async fn log_artifacts(&self, local_dir: &Path, artifact_path: Option<&str>) -> Result<()> {
        let files = collect_artifacts(local_dir, artifact_path)?;
        for (local, relative) in &files {
            let bytes = tokio::fs::read(local)
                .await
                .with_context(|| format!("reading artifact {}", local.display()))?;
            self.upload(relative, bytes).await?;
        }
        tracing::info!(run_id = %self.run_id, dir = %local_dir.display(), files = files.len(), "uploaded artifact directory");
        Ok(())
    }

    /// Upload `rows` as a table artifact in `{"columns": [...], "data": [[...]]}` form.
    ///
    /// Every row must serialize to a JSON object; absent fields become `null`.
    pub async fn log_table<T: Serialize>(&self, rows: &[T], file_name: &str) -> Result<()> {
        let table = table_json(rows)?;
        self.upload(&join_artifact_path(None, file_name), serde_json::to_vec(&table)?).await
    }

    async fn upload(&self, relative: &str, bytes: Vec<u8>) -> Result<()> {
        let root = proxy_artifact_root(&self.artifact_uri)?;
        let url = format!("{}/{ARTIFACTS_API}/{root}/{relative}", self.tracker.base_url);
        let resp = self.tracker.http.put(&url).body(bytes).send().await.with_context(|| format!("uploading {relative}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("artifact upload {relative} returned {status}: {text}");
        }
        tracing::debug!(run_id = %self.run_id, artifact = relative, "uploaded artifact");
        Ok(())
    }

    pub async fn finish(self, status: RunStatus) -> Result<()> {
        let body = json!({ "run_id": self.run_id, "status": status, "end_time": now_millis() });
        self.tracker.post::<serde_json::Value>("runs/update", &body).await?;
        tracing::info!(run_id = %self.run_id, ?status, "finished mlflow run");
        Ok(())
    }
}

fn join_artifact_path(dir: Option<&str>, file_name: &str) -> String {
    match dir.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) {
        Some(d) => format!("{d}/{file_name}"),
        None => file_name.to_string(),
    }
}

/// Files under `local_dir` paired with their artifact paths, in file name order.
fn collect_artifacts(local_dir: &Path, artifact_path: Option<&str>) -> Result<Vec<(PathBuf, String)>> {
    if !local_dir.is_dir() {
        anyhow::bail!("artifact directory {} does not exist", local_dir.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(local_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", local_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(local_dir)?;
        let parts: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        files.push((entry.path().to_path_buf(), join_artifact_path(artifact_path, &parts.join("/"))));
    }
    Ok(files)
}

fn table_json<T: Serialize>(rows: &[T]) -> Result<serde_json::Value> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::to_value(row)? {
            serde_json::Value::Object(map) => records.push(map),
            other => anyhow::bail!("table rows must be objects, got {other}"),
        }
    }
    let columns: BTreeSet<&String> = records.iter().flat_map(|r| r.keys()).collect();
    let data: Vec<Vec<serde_json::Value>> = records
        .iter()
        .map(|r| columns.iter().map(|c| r.get(*c).cloned().unwrap_or(serde_json::Value::Null)).collect())
        .collect();
    Ok(json!({ "columns": columns, "data": data }))
}

/// `mlflow-artifacts:/1/abc/artifacts` -> `1/abc/artifacts`.
fn proxy_artifact_root(artifact_uri: &str) -> Result<&str> {
    let rest = artifact_uri
        .strip_prefix(PROXY_SCHEME)
        .with_context(|| format!("artifact store {artifact_uri} is not served through the tracking server"))?;
    // The proxy uri may carry an authority: mlflow-artifacts://host:port/path
    let path = match rest.strip_prefix("//") {
        Some(with_host) => with_host.find('/').map(|i| &with_host[i..]).unwrap_or(""),
        None => rest,
    };
    Ok(path.trim_matches('/'))
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
