use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid model shape: {0}")]
    Shape(String),

    #[error("Invalid scaler: {0}")]
    Scaler(String),

    #[error("Artifact loader task failed: {0}")]
    LoaderTask(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("No data provided")]
    Empty,

    #[error("Malformed CSV: {0}")]
    Csv(String),

    #[error("CSV contains a header but no data rows")]
    NoRows,

    #[error("Non-numeric value '{value}' in column '{column}' at row {row}")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Column '{0}' has no values")]
    EmptyColumn(String),

    #[error("Expected {expected} feature columns, got {actual}")]
    ColumnCount {
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model is not loaded")]
    ModelUnavailable,

    #[error("Inference failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Missing API key")]
    Missing,

    #[error("Invalid API key")]
    Invalid,

    #[error("Invalid or missing master key")]
    InvalidMaster,

    #[error("Key store error: {0}")]
    Store(String),
}
