//! Get-by-ids: validation, lookup, and status classification including conditional GET.

use super::{Lookup, Product, ProductCache};
use crate::error::{CatalogError, CatalogResult};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_IDS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Query 'ids' is required")]
    Required,
    #[error("All ids must be non-empty")]
    BlankId,
    #[error("At most {0} ids may be requested")]
    TooMany(usize),
}

/// Reject empty id lists, blank ids, and lists longer than `max_ids` (0 = unlimited).
pub fn validate_ids<S: AsRef<str>>(ids: &[S], max_ids: usize) -> Result<(), ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::Required);
    }
    if ids.iter().any(|id| id.as_ref().trim().is_empty()) {
        return Err(ValidationError::BlankId);
    }
    if max_ids > 0 && ids.len() > max_ids {
        return Err(ValidationError::TooMany(max_ids));
    }
    Ok(())
}

/// Anything that can answer a cancellable point lookup.
pub trait ProductSource {
    fn lookup_ids(&self, ids: &[String], cancel: &CancellationToken) -> CatalogResult<Lookup>;
}

impl ProductSource for ProductCache {
    fn lookup_ids(&self, ids: &[String], cancel: &CancellationToken) -> CatalogResult<Lookup> {
        self.lookup_cancellable(ids, cancel)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetByIdsRequest {
    pub ids: Vec<String>,
    pub if_none_match: Option<String>,
}

impl GetByIdsRequest {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            if_none_match: None,
        }
    }

    pub fn if_none_match(mut self, tag: impl Into<String>) -> Self {
        self.if_none_match = Some(tag.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GetByIdsResponse {
    pub products: Vec<Arc<Product>>,
}

#[derive(Debug, Clone)]
pub enum GetByIdsOutcome {
    Ok {
        body: GetByIdsResponse,
        etag: String,
    },
    NotModified {
        etag: String,
    },
    BadRequest {
        detail: String,
    },
    NotFound,
    /// Caller went away; nothing should be written.
    Cancelled,
}

impl GetByIdsOutcome {
    pub fn status(&self) -> u16 {
        match self {
            GetByIdsOutcome::Ok { .. } => 200,
            GetByIdsOutcome::NotModified { .. } => 304,
            GetByIdsOutcome::BadRequest { .. } => 400,
            GetByIdsOutcome::NotFound => 404,
            GetByIdsOutcome::Cancelled => 499,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        match self {
            GetByIdsOutcome::Ok { etag, .. } | GetByIdsOutcome::NotModified { etag } => {
                Some(etag)
            }
            _ => None,
        }
    }
}

pub struct GetByIdsHandler<'a, S: ProductSource + ?Sized> {
    source: &'a S,
    max_ids: usize,
}

impl<'a, S: ProductSource + ?Sized> GetByIdsHandler<'a, S> {
    pub fn new(source: &'a S, max_ids: usize) -> Self {
        Self { source, max_ids }
    }

    pub fn handle(&self, req: &GetByIdsRequest, cancel: &CancellationToken) -> GetByIdsOutcome {
        if let Err(e) = validate_ids(&req.ids, self.max_ids) {
            tracing::warn!(error = %e, "products.get validation failed");
            return GetByIdsOutcome::BadRequest {
                detail: e.to_string(),
            };
        }

        let Lookup {
            found,
            etag,
            missing,
        } = match self.source.lookup_ids(&req.ids, cancel) {
            Ok(lookup) => lookup,
            Err(CatalogError::Cancelled) => return GetByIdsOutcome::Cancelled,
            Err(e) => {
                tracing::error!(error = %e, "products.get lookup failed");
                return GetByIdsOutcome::NotFound;
            }
        };

        if !missing.is_empty() {
            tracing::info!(missing = missing.len(), "products.get missing ids");
        }
        if found.is_empty() {
            return GetByIdsOutcome::NotFound;
        }
        if req
            .if_none_match
            .as_deref()
            .is_some_and(|header| etag_matches(header, &etag))
        {
            return GetByIdsOutcome::NotModified { etag };
        }
        GetByIdsOutcome::Ok {
            body: GetByIdsResponse { products: found },
            etag,
        }
    }
}

/// `If-None-Match` check: `*`, or any listed tag equal to `etag` (weak prefix ignored).
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .any(|tag| tag == "*" || strip_weak(tag) == strip_weak(etag))
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}
