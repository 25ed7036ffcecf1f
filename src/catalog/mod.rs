//! Hot-reloading product lookup cache.
//!
//! The current [`Snapshot`] is published through an [`ArcSwap`]: readers grab the
//! `Arc` once and traverse an immutable map with no lock held; a reload does all
//! file I/O, parsing and hashing first and then swaps the pointer in one store.
//! Concurrent reloads are last-writer-wins.

pub mod api;
pub mod fingerprint;
pub mod handler;
pub mod loader;
pub mod problem;
pub mod product;
pub mod snapshot;
pub mod watcher;

use crate::error::{CatalogError, CatalogResult};
use arc_swap::ArcSwap;
use loader::LoadOutcome;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use watcher::{ChangeWatcher, ReloadTrigger};

pub use product::{Money, Product};
pub use snapshot::{Snapshot, SnapshotOrigin};

/// Construction-time knobs for [`ProductCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Start a filesystem watcher on the backing file's directory.
    pub watch: bool,
    /// Coalesce bursts of events; zero reloads on every event.
    pub debounce: Duration,
    /// On read/parse failure keep serving the last successfully loaded snapshot
    /// instead of an empty one.
    pub keep_last_good: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            watch: true,
            debounce: Duration::ZERO,
            keep_last_good: false,
        }
    }
}

/// Result of a point lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Hits, in request order.
    pub found: Vec<Arc<Product>>,
    /// Tag of the snapshot that was consulted.
    pub etag: String,
    /// Misses, in request order.
    pub missing: Vec<String>,
}

/// Point-in-time description of the cache, for logs and health checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub path: PathBuf,
    pub origin: SnapshotOrigin,
    pub records: usize,
    pub etag: String,
    pub loaded_at: String,
    pub reloads: u64,
    pub watching: bool,
}

struct CacheState {
    path: PathBuf,
    current: ArcSwap<Snapshot>,
    keep_last_good: bool,
    reloads: AtomicU64,
}

impl CacheState {
    fn reload(&self) -> Arc<Snapshot> {
        self.install(true)
    }

    /// Load and publish. `announce` is false for the initial load, which
    /// `catalog.init` reports instead.
    fn install(&self, announce: bool) -> Arc<Snapshot> {
        let next = match loader::load(&self.path) {
            LoadOutcome::Loaded(snapshot) => {
                if announce {
                    tracing::info!(
                        path = %self.path.display(),
                        records = snapshot.len(),
                        etag = snapshot.etag(),
                        "catalog.reload completed"
                    );
                }
                snapshot
            }
            LoadOutcome::Missing => {
                tracing::warn!(
                    path = %self.path.display(),
                    reason = "missing",
                    "catalog.degraded file not found, cache empty"
                );
                Snapshot::missing()
            }
            LoadOutcome::Failed(cause) => {
                let kept = self.current.load_full();
                if self.keep_last_good && kept.origin() == SnapshotOrigin::Loaded {
                    tracing::error!(
                        path = %self.path.display(),
                        reason = "error",
                        cause = %cause,
                        etag = kept.etag(),
                        "catalog.degraded load failed, keeping last good snapshot"
                    );
                    return kept;
                }
                tracing::error!(
                    path = %self.path.display(),
                    reason = "error",
                    cause = %cause,
                    "catalog.degraded load failed, cache empty"
                );
                Snapshot::failed()
            }
        };
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        self.reloads.fetch_add(1, Ordering::Relaxed);
        next
    }
}

/// Owns the current snapshot and the watcher feeding it.
pub struct ProductCache {
    state: Arc<CacheState>,
    watcher: Option<ChangeWatcher>,
}

impl ProductCache {
    /// Load `path` once, then (optionally) start watching it. Never fails:
    /// a missing or broken file yields an empty cache, and a watcher that
    /// cannot start leaves the cache static.
    pub fn open(path: impl Into<PathBuf>, options: CacheOptions) -> Self {
        let path = path.into();
        let state = Arc::new(CacheState {
            path,
            current: ArcSwap::from_pointee(Snapshot::missing()),
            keep_last_good: options.keep_last_good,
            reloads: AtomicU64::new(0),
        });
        let first = state.install(false);
        tracing::info!(
            path = %state.path.display(),
            records = first.len(),
            origin = %first.origin(),
            etag = first.etag(),
            "catalog.init"
        );

        let watcher = if options.watch {
            let target = Arc::clone(&state);
            let trigger: Arc<dyn ReloadTrigger> = Arc::new(move || {
                target.reload();
            });
            match ChangeWatcher::spawn(&state.path, options.debounce, trigger) {
                Ok(w) => {
                    tracing::info!(
                        dir = %w.dir().display(),
                        debounce_ms = options.debounce.as_millis() as u64,
                        "catalog.watch started"
                    );
                    Some(w)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "catalog.watch inert");
                    None
                }
            }
        } else {
            None
        };

        Self { state, watcher }
    }

    /// Partition `ids` into hits and misses against the current snapshot.
    pub fn lookup<S: AsRef<str>>(&self, ids: &[S]) -> Lookup {
        let snapshot = self.state.current.load_full();
        lookup_in(&snapshot, ids)
    }

    /// [`lookup`](Self::lookup) that honours a caller's cancellation token before and after.
    pub fn lookup_cancellable<S: AsRef<str>>(
        &self,
        ids: &[S],
        cancel: &CancellationToken,
    ) -> CatalogResult<Lookup> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        let result = self.lookup(ids);
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        Ok(result)
    }

    /// Re-read the backing file and install the result. Returns the snapshot now current.
    pub fn reload(&self) -> Arc<Snapshot> {
        self.state.reload()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn status(&self) -> CacheStatus {
        let snapshot = self.snapshot();
        CacheStatus {
            path: self.state.path.clone(),
            origin: snapshot.origin(),
            records: snapshot.len(),
            etag: snapshot.etag().to_string(),
            loaded_at: snapshot.loaded_at().to_rfc3339(),
            reloads: self.state.reloads.load(Ordering::Relaxed),
            watching: self.is_watching(),
        }
    }
}

fn lookup_in<S: AsRef<str>>(snapshot: &Snapshot, ids: &[S]) -> Lookup {
    let mut found = Vec::with_capacity(ids.len());
    let mut missing = Vec::new();
    for id in ids {
        let id = id.as_ref();
        match snapshot.get(id) {
            Some(product) => found.push(Arc::clone(product)),
            None => missing.push(id.to_string()),
        }
    }
    Lookup {
        found,
        etag: snapshot.etag().to_string(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::{EMPTY_TAG, ERROR_TAG};
    use std::fs;
    use std::sync::Barrier;
    use tempfile::TempDir;

    const TWO: &str = r#"[{"id":"kbd-1","name":"Keyboard"},{"id":"hx-2","name":"Headset"}]"#;
    const THREE: &str = r#"[{"id":"kbd-1","name":"Keyboard"},{"id":"hx-2","name":"Headset"},{"id":"ms-3","name":"Mouse"}]"#;

    fn static_opts() -> CacheOptions {
        CacheOptions {
            watch: false,
            ..CacheOptions::default()
        }
    }

    fn cache_with(content: &str) -> (TempDir, ProductCache) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, content).unwrap();
        let cache = ProductCache::open(&path, static_opts());
        (tmp, cache)
    }

    fn ids(lookup: &Lookup) -> Vec<&str> {
        lookup.found.iter().map(|p| p.id()).collect()
    }

    #[test]
    fn two_record_scenario() {
        let (_tmp, cache) = cache_with(TWO);

        let all = cache.lookup(&["kbd-1", "hx-2"]);
        assert_eq!(all.found.len(), 2);
        assert!(all.missing.is_empty());
        assert!(all.etag.starts_with('"') && all.etag.len() > 2);
        assert!(!fingerprint::is_sentinel(&all.etag));

        let partial = cache.lookup(&["kbd-1", "zzz"]);
        assert_eq!(ids(&partial), ["kbd-1"]);
        assert_eq!(partial.missing, ["zzz"]);

        let none = cache.lookup(&["zzz"]);
        assert!(none.found.is_empty());
        assert_eq!(none.missing, ["zzz"]);
        assert_eq!(none.etag, all.etag);
    }

    #[test]
    fn lookup_ignores_case_and_keeps_miss_order() {
        let (_tmp, cache) = cache_with(TWO);
        let r = cache.lookup(&["b", "KBD-1", "a", "Hx-2", "c"]);
        assert_eq!(ids(&r), ["kbd-1", "hx-2"]);
        assert_eq!(r.missing, ["b", "a", "c"]);
    }

    #[test]
    fn found_and_missing_partition_the_request() {
        let (_tmp, cache) = cache_with(TWO);
        let request = ["hx-2", "nope", "kbd-1", "nope", "HX-2"];
        let r = cache.lookup(&request);
        assert_eq!(r.found.len() + r.missing.len(), request.len());
        for id in &r.missing {
            assert!(!cache.snapshot().contains(id));
        }
        for p in &r.found {
            assert!(request.iter().any(|id| id.eq_ignore_ascii_case(p.id())));
        }
    }

    #[test]
    fn reload_without_change_keeps_tag() {
        let (_tmp, cache) = cache_with(TWO);
        let before = cache.snapshot().etag().to_string();
        let after = cache.reload();
        assert_eq!(after.etag(), before);
        assert_eq!(cache.status().reloads, 2);
    }

    #[test]
    fn rewrite_and_reload_picks_up_new_record() {
        let (tmp, cache) = cache_with(TWO);
        let before = cache.lookup(&["ms-3"]);
        assert_eq!(before.missing, ["ms-3"]);

        fs::write(tmp.path().join("products.json"), THREE).unwrap();
        cache.reload();

        let after = cache.lookup(&["ms-3"]);
        assert_eq!(ids(&after), ["ms-3"]);
        assert_ne!(after.etag, before.etag);
    }

    #[test]
    fn nonexistent_path_degrades_to_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = ProductCache::open(tmp.path().join("nope.json"), static_opts());
        let r = cache.lookup(&["a", "b"]);
        assert!(r.found.is_empty());
        assert_eq!(r.missing, ["a", "b"]);
        assert_eq!(r.etag, EMPTY_TAG);
        assert_eq!(cache.status().origin, SnapshotOrigin::Missing);
    }

    #[test]
    fn corrupt_file_degrades_to_error_tag_by_default() {
        let (tmp, cache) = cache_with(TWO);
        fs::write(tmp.path().join("products.json"), "{not json").unwrap();
        let snap = cache.reload();
        assert_eq!(snap.etag(), ERROR_TAG);
        assert!(cache.lookup(&["kbd-1"]).found.is_empty());
    }

    #[test]
    fn keep_last_good_survives_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, TWO).unwrap();
        let cache = ProductCache::open(
            &path,
            CacheOptions {
                watch: false,
                keep_last_good: true,
                ..CacheOptions::default()
            },
        );
        let good = cache.snapshot().etag().to_string();

        fs::write(&path, "[{\"id\":").unwrap();
        assert_eq!(cache.reload().etag(), good);
        assert_eq!(cache.lookup(&["kbd-1"]).found.len(), 1);

        // an absent file is still honoured as an empty catalog
        fs::remove_file(&path).unwrap();
        assert_eq!(cache.reload().etag(), EMPTY_TAG);
    }

    #[test]
    fn keep_last_good_starts_failed_when_first_load_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, "oops").unwrap();
        let cache = ProductCache::open(
            &path,
            CacheOptions {
                watch: false,
                keep_last_good: true,
                ..CacheOptions::default()
            },
        );
        assert_eq!(cache.snapshot().origin(), SnapshotOrigin::Failed);
        assert_eq!(cache.snapshot().etag(), ERROR_TAG);
    }

    #[test]
    fn read_error_degrades_to_error_tag_by_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        // opening succeeds on a directory but reading it fails
        fs::create_dir(&path).unwrap();
        let cache = ProductCache::open(&path, static_opts());
        assert_eq!(cache.snapshot().origin(), SnapshotOrigin::Failed);
        assert_eq!(cache.snapshot().etag(), ERROR_TAG);
        assert!(cache.lookup(&["kbd-1"]).found.is_empty());
    }

    #[test]
    fn keep_last_good_survives_read_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, TWO).unwrap();
        let cache = ProductCache::open(
            &path,
            CacheOptions {
                watch: false,
                keep_last_good: true,
                ..CacheOptions::default()
            },
        );
        let good = cache.snapshot().etag().to_string();

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        let snap = cache.reload();
        assert_eq!(snap.etag(), good);
        assert_eq!(snap.origin(), SnapshotOrigin::Loaded);
        assert_eq!(cache.lookup(&["hx-2"]).found.len(), 1);
    }

    #[derive(Clone, Default)]
    struct Notices(Arc<std::sync::Mutex<Vec<String>>>);

    struct MessageField<'a>(&'a mut String);

    impl tracing::field::Visit for MessageField<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Notices {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut message = String::new();
            event.record(&mut MessageField(&mut message));
            self.0.lock().unwrap().push(message);
        }
    }

    #[test]
    fn initial_load_is_reported_by_init_only() {
        use tracing_subscriber::layer::SubscriberExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, TWO).unwrap();

        let notices = Notices::default();
        let subscriber = tracing_subscriber::registry().with(notices.clone());
        tracing::subscriber::with_default(subscriber, || {
            let cache = ProductCache::open(&path, static_opts());
            cache.reload();
        });

        let seen = notices.0.lock().unwrap().clone();
        let init = seen.iter().position(|m| m == "catalog.init");
        let reloads: Vec<usize> = seen
            .iter()
            .enumerate()
            .filter(|(_, m)| m.as_str() == "catalog.reload completed")
            .map(|(i, _)| i)
            .collect();
        let init = init.expect("catalog.init logged");
        assert_eq!(reloads.len(), 1, "only the manual reload announces itself: {seen:?}");
        assert!(init < reloads[0], "got: {seen:?}");
    }

    #[test]
    fn cancelled_lookup_reports_cancellation() {
        let (_tmp, cache) = cache_with(TWO);
        let server = CancellationToken::new();
        let request = server.child_token();
        assert!(cache.lookup_cancellable(&["kbd-1"], &request).is_ok());
        server.cancel();
        assert!(matches!(
            cache.lookup_cancellable(&["kbd-1"], &request),
            Err(CatalogError::Cancelled)
        ));
    }

    #[test]
    fn readers_never_observe_a_torn_snapshot() {
        let (tmp, cache) = cache_with(TWO);
        let path = tmp.path().join("products.json");
        let cache = Arc::new(cache);
        let tag_two = cache.snapshot().etag().to_string();
        fs::write(&path, THREE).unwrap();
        let tag_three = cache.reload().etag().to_string();

        let barrier = Arc::new(Barrier::new(5));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = Arc::clone(&cache);
            let b = Arc::clone(&barrier);
            let (t2, t3) = (tag_two.clone(), tag_three.clone());
            handles.push(std::thread::spawn(move || {
                b.wait();
                for _ in 0..500 {
                    let r = c.lookup(&["kbd-1", "ms-3"]);
                    // each result must be internally consistent with one snapshot
                    if r.etag == t3 {
                        assert_eq!(r.found.len(), 2);
                    } else {
                        assert_eq!(r.etag, t2);
                        assert_eq!(r.found.len(), 1);
                        assert_eq!(r.missing, ["ms-3"]);
                    }
                }
            }));
        }
        barrier.wait();
        for i in 0..50 {
            let content = if i % 2 == 0 { TWO } else { THREE };
            fs::write(&path, content).unwrap();
            cache.reload();
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn watcher_reloads_after_external_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("products.json");
        fs::write(&path, TWO).unwrap();
        let cache = ProductCache::open(&path, CacheOptions::default());
        assert!(cache.is_watching());

        let tmp_path = tmp.path().join(".products.json.tmp");
        fs::write(&tmp_path, THREE).unwrap();
        fs::rename(&tmp_path, &path).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.lookup(&["ms-3"]).found.is_empty() {
            assert!(
                std::time::Instant::now() < deadline,
                "watcher did not pick up the rename"
            );
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn watcher_is_inert_when_directory_missing() {
        let tmp = TempDir::new().unwrap();
        let cache = ProductCache::open(
            tmp.path().join("absent").join("products.json"),
            CacheOptions::default(),
        );
        assert!(!cache.is_watching());
        assert_eq!(cache.snapshot().etag(), EMPTY_TAG);
    }
}
