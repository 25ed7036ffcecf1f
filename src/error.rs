//! Typed errors for the catalog cache.
//! Application plumbing (CLI, config, server bootstrap) stays on `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("price must be non-negative, got {0}")]
    NegativePrice(rust_decimal::Decimal),

    #[error("record #{index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("duplicate product id '{0}' (ids are case-insensitive)")]
    DuplicateId(String),

    #[error("catalog root must be a JSON array, found {0}")]
    MalformedRoot(&'static str),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("lookup cancelled by caller")]
    Cancelled,

    #[error("watcher unavailable: {0}")]
    Watch(String),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
