use std::path::PathBuf;

/// Problems with a persisted station dataset file
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to serialize JSON for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("Data shape error in {path} at line {line}: {message}")]
    Shape {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("Cannot derive station identity from {path}: no rows")]
    NoStationIdentity { path: PathBuf },
}
