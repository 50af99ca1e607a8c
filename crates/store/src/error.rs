use std::path::PathBuf;
use std::sync::Arc;
use sylva_xquery::{Error as QueryError, ErrorCode};
use thiserror::Error;

/// Errors raised by the store outside of query evaluation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration{}: {source}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    ConfigParse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration: {source}")]
    ConfigSerialize { source: toml::ser::Error },
    #[error("invalid index configuration for {collection}: {message}")]
    IndexConfig { collection: String, message: String },
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("'{0}' is not a valid database path")]
    InvalidPath(String),
    #[error("a collection named {0} already exists")]
    CollectionExists(String),
    #[error("{0} is not an XML document")]
    NotXml(String),
    #[error(transparent)]
    Query(#[from] QueryError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// The query error code this failure carries, if it came from the engine.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            StoreError::Query(e) => Some(e.code_enum()),
            _ => None,
        }
    }

    /// True for lock timeouts, which a caller may retry.
    pub fn is_retryable(&self) -> bool {
        self.code().is_some_and(|c| c.is_retryable())
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Query(q) => q,
            StoreError::ResourceNotFound(path) => {
                QueryError::from_code(ErrorCode::FODC0002, format!("no document at {path}"))
            }
            StoreError::CollectionNotFound(path) => {
                QueryError::from_code(ErrorCode::FODC0004, format!("no collection at {path}"))
            }
            other => QueryError::from_code(ErrorCode::FOER0000, other.to_string())
                .with_source(Some(Arc::new(other) as Arc<dyn std::error::Error + Send + Sync>)),
        }
    }
}
