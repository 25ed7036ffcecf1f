//! Immutable, case-insensitively indexed view of one catalog load.

use super::fingerprint::{fingerprint_records, EMPTY_TAG, ERROR_TAG};
use super::product::{id_key, Product};
use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How the snapshot came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOrigin {
    /// Parsed from the backing file.
    Loaded,
    /// Backing file absent.
    Missing,
    /// Read or parse failure.
    Failed,
}

impl fmt::Display for SnapshotOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SnapshotOrigin::Loaded => "loaded",
            SnapshotOrigin::Missing => "missing",
            SnapshotOrigin::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub struct Snapshot {
    records: Vec<Arc<Product>>,
    by_id: HashMap<String, usize>,
    etag: String,
    origin: SnapshotOrigin,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// Index `records` (file order kept) and fingerprint them.
    /// Two records whose ids differ only by case are rejected.
    pub fn from_records(records: Vec<Product>) -> CatalogResult<Self> {
        let etag = fingerprint_records(&records)?;
        let mut by_id = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            if by_id.insert(id_key(record.id()), pos).is_some() {
                return Err(CatalogError::DuplicateId(record.id().to_string()));
            }
        }
        Ok(Self {
            records: records.into_iter().map(Arc::new).collect(),
            by_id,
            etag,
            origin: SnapshotOrigin::Loaded,
            loaded_at: Utc::now(),
        })
    }

    pub fn missing() -> Self {
        Self::empty(EMPTY_TAG, SnapshotOrigin::Missing)
    }

    pub fn failed() -> Self {
        Self::empty(ERROR_TAG, SnapshotOrigin::Failed)
    }

    fn empty(tag: &str, origin: SnapshotOrigin) -> Self {
        Self {
            records: Vec::new(),
            by_id: HashMap::new(),
            etag: tag.to_string(),
            origin,
            loaded_at: Utc::now(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Product>> {
        self.by_id.get(&id_key(id)).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(&id_key(id))
    }

    pub fn records(&self) -> &[Arc<Product>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
