// src/error.rs
//
// Control-plane errors. The render path has no error type: it always
// produces a full block.

use std::path::PathBuf;

/// Failure to load an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure to turn an ingested payload into a catalog.
///
/// Individual malformed fields never end up here; they are replaced by
/// safe defaults while the catalog is built.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("cannot read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dataset contains no pathways")]
    Empty,
}

/// Failure to hand a command to the audio thread.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("command queue is full")]
    QueueFull,
    #[error("no dataset loaded")]
    NoDataset,
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
