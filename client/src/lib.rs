pub mod chat_api;
pub mod dataset;
pub mod ollama;
pub mod tracking;

pub use chat_api::ChatApi;
pub use dataset::DatasetLogger;
pub use ollama::{Generator, OllamaClient};
pub use tracking::{MlflowTracker, RunStatus, TrackedRun};
