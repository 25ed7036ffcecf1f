//! Reload procedure: backing file -> new snapshot, never an error to the caller.

use super::product::{json_kind, Product};
use super::snapshot::Snapshot;
use crate::error::{CatalogError, CatalogResult};
use serde_json::Value;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Instant;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Result of one load attempt.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Snapshot),
    /// Backing file does not exist.
    Missing,
    /// Read or parse failure.
    Failed(CatalogError),
}

/// Load `path` into a fresh snapshot. All I/O, parsing and hashing happen here,
/// before anything is published.
pub fn load(path: &Path) -> LoadOutcome {
    let started = Instant::now();
    let bytes = match read_shared(path) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return LoadOutcome::Missing,
        Err(e) => return LoadOutcome::Failed(e),
    };
    match parse_catalog(&bytes).and_then(Snapshot::from_records) {
        Ok(snapshot) => {
            tracing::debug!(
                path = %path.display(),
                bytes = bytes.len(),
                records = snapshot.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "catalog.load parsed"
            );
            LoadOutcome::Loaded(snapshot)
        }
        Err(e) => LoadOutcome::Failed(e),
    }
}

/// Read the whole file without taking any lock; a concurrent writer may hold it open.
/// `Ok(None)` when the file is absent (including when it vanishes between checks).
fn read_shared(path: &Path) -> CatalogResult<Option<Vec<u8>>> {
    // std opens with read/write/delete sharing on Windows and no flock on Unix.
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(bytes))
}

/// Parse a JSON array of product objects, keeping file order.
pub fn parse_catalog(bytes: &[u8]) -> CatalogResult<Vec<Product>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let root: Value = serde_json::from_slice(bytes)?;
    let items = match root {
        Value::Array(items) => items,
        other => return Err(CatalogError::MalformedRoot(json_kind(&other))),
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| Product::from_json(index, item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fingerprint::fingerprint_records;
    use std::fs;
    use tempfile::TempDir;

    const TWO: &str = r#"[{"id":"kbd-1","name":"Keyboard"},{"id":"hx-2","name":"Headset"}]"#;

    #[test]
    fn missing_file_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let outcome = load(&tmp.path().join("nope.json"));
        assert!(matches!(outcome, LoadOutcome::Missing));
    }

    #[test]
    fn loads_records_in_file_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, TWO).unwrap();
        let snap = match load(&path) {
            LoadOutcome::Loaded(snap) => snap,
            other => panic!("expected loaded, got {other:?}"),
        };
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.records()[0].id(), "kbd-1");
        assert!(snap.contains("HX-2"));
    }

    #[test]
    fn malformed_json_and_wrong_root_fail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");

        fs::write(&path, "[{\"id\": \"a\"").unwrap();
        assert!(matches!(load(&path), LoadOutcome::Failed(CatalogError::Json(_))));

        fs::write(&path, r#"{"id": "a"}"#).unwrap();
        assert!(matches!(
            load(&path),
            LoadOutcome::Failed(CatalogError::MalformedRoot("object"))
        ));

        fs::write(&path, "").unwrap();
        assert!(matches!(load(&path), LoadOutcome::Failed(_)));
    }

    #[test]
    fn duplicate_ids_fail_the_whole_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, r#"[{"id":"a"},{"id":"A"}]"#).unwrap();
        assert!(matches!(
            load(&path),
            LoadOutcome::Failed(CatalogError::DuplicateId(_))
        ));
    }

    #[test]
    fn unreadable_path_is_an_io_failure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::create_dir(&path).unwrap();
        match load(&path) {
            LoadOutcome::Failed(CatalogError::Io { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected an I/O failure, got {other:?}"),
        }
    }

    #[test]
    fn byte_order_mark_is_tolerated() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(TWO.as_bytes());
        let records = parse_catalog(&bytes).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn fingerprint_ignores_whitespace_and_field_casing() {
        let compact = parse_catalog(TWO.as_bytes()).unwrap();
        let spaced = parse_catalog(
            br#"[
                { "ID": "kbd-1", "NAME": "Keyboard" },
                { "Id": "hx-2",  "Name": "Headset" }
            ]"#,
        )
        .unwrap();
        assert_eq!(
            fingerprint_records(&compact).unwrap(),
            fingerprint_records(&spaced).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn reads_while_another_handle_is_writing() {
        use std::io::Write;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, TWO).unwrap();
        let mut writer = fs::OpenOptions::new().append(true).open(&path).unwrap();
        assert!(matches!(load(&path), LoadOutcome::Loaded(_)));
        writer.write_all(b" ").unwrap();
        assert!(matches!(load(&path), LoadOutcome::Loaded(_)));
    }
}
