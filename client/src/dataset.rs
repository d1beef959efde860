use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

/// One prompt/response pair as recorded for later fine-tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub timestamp: String,
}

/// Appends [`DatasetRecord`]s to a JSONL file, one per line.
pub struct DatasetLogger {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl DatasetLogger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening dataset {}", path.display()))?;
        Ok(Self { path, out: Mutex::new(BufWriter::new(file)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, prompt: &str, response: &str, model: &str) -> Result<DatasetRecord> {
        let record = DatasetRecord {
            prompt: prompt.to_string(),
            response: response.to_string(),
            model: model.to_string(),
            timestamp: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        let mut out = self.out.lock();
        serde_json::to_writer(&mut *out, &record)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(record)
    }
}
