//! Change watcher: turns filesystem events on the backing file into reload calls.
//! Knows nothing about snapshots; the only coupling is [`ReloadTrigger`].

use crate::error::{CatalogError, CatalogResult};
use notify::event::{MetadataKind, ModifyKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// "Reload now" signal. The watcher calls it once per qualifying event
/// (or once per burst when debouncing).
pub trait ReloadTrigger: Send + Sync + 'static {
    fn reload_now(&self);
}

impl<F> ReloadTrigger for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn reload_now(&self) {
        self()
    }
}

/// Running watcher. Dropping it stops the backend and joins the worker thread.
pub struct ChangeWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
    dir: PathBuf,
}

impl ChangeWatcher {
    /// Watch the directory containing `file` (non-recursively) for events naming `file`.
    /// Fails when the directory does not exist; no retry is attempted.
    pub fn spawn(
        file: &Path,
        debounce: Duration,
        trigger: Arc<dyn ReloadTrigger>,
    ) -> CatalogResult<Self> {
        let (dir, name) = split_target(file)?;
        if !dir.is_dir() {
            return Err(CatalogError::Watch(format!(
                "directory {} does not exist",
                dir.display()
            )));
        }

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| CatalogError::Watch(format!("failed to create watcher: {e}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| CatalogError::Watch(format!("failed to watch {}: {e}", dir.display())))?;

        let worker = std::thread::Builder::new()
            .name("catalog-watch".to_string())
            .spawn(move || run_loop(rx, name, debounce, trigger))
            .map_err(|e| CatalogError::Watch(format!("failed to spawn watch thread: {e}")))?;

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        // Dropping the backend drops the sender, which ends the worker loop.
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn split_target(file: &Path) -> CatalogResult<(PathBuf, OsString)> {
    let absolute = std::path::absolute(file)
        .map_err(|e| CatalogError::Watch(format!("cannot resolve {}: {e}", file.display())))?;
    let name = absolute
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| CatalogError::Watch(format!("{} has no file name", file.display())))?;
    let dir = absolute
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| CatalogError::Watch(format!("{} has no parent", file.display())))?;
    Ok((dir, name))
}

fn run_loop(
    rx: mpsc::Receiver<notify::Result<Event>>,
    name: OsString,
    debounce: Duration,
    trigger: Arc<dyn ReloadTrigger>,
) {
    loop {
        let event = match rx.recv() {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "catalog.watch backend error");
                continue;
            }
            Err(_) => break,
        };
        if !is_relevant(&event, &name) {
            continue;
        }
        tracing::debug!(kind = ?event.kind, "catalog.watch event");

        if !debounce.is_zero() && !drain_burst(&rx, debounce) {
            trigger.reload_now();
            break;
        }
        trigger.reload_now();
    }
    tracing::debug!("catalog.watch stopped");
}

/// Swallow further events until `window` elapses. Returns false if the channel closed.
fn drain_burst(rx: &mpsc::Receiver<notify::Result<Event>>, window: Duration) -> bool {
    let deadline = Instant::now() + window;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(_) | Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return false,
        }
    }
}

/// Content change, creation or rename that names the watched file.
pub(crate) fn is_relevant(event: &Event, name: &OsString) -> bool {
    let kind_matches = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == name.as_os_str()))
}
