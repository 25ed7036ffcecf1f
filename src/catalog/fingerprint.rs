//! Content fingerprint used as the HTTP entity tag.

use super::product::Product;
use crate::error::CatalogResult;
use sha2::{Digest, Sha256};

/// Tag for a catalog whose backing file does not exist.
pub const EMPTY_TAG: &str = "\"empty\"";
/// Tag for a catalog whose backing file could not be read or parsed.
pub const ERROR_TAG: &str = "\"error\"";

/// Quoted uppercase SHA-256 hex of `bytes`. Depends on nothing but the bytes.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", hex::encode_upper(digest))
}

/// Serialize `records` in the given order and fingerprint the result.
pub fn fingerprint_records(records: &[Product]) -> CatalogResult<String> {
    let serialized = serde_json::to_vec(records)?;
    Ok(fingerprint_bytes(&serialized))
}

pub fn is_sentinel(tag: &str) -> bool {
    tag == EMPTY_TAG || tag == ERROR_TAG
}
