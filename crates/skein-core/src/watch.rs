//! Filesystem-change invalidation coordinator.
//!
//! One recursive watcher per project root, created on first subscribe and
//! torn down when the last subscription drops. Raw events are buffered into
//! rename/change sets; a debounce task flushes after a 100 ms quiet period:
//! every buffered rename path is re-checked for existence (exists ⇒ added,
//! missing ⇒ removed), every buffered change path not already classified is
//! emitted as changed. Buffers are cleared before listeners run, so events
//! arriving during listener execution start a fresh cycle instead of being
//! dropped. Each flush invalidates the project memo caches before any
//! listener observes the event.

use crate::locator::ModuleLocator;
use crate::project::ModuleCaches;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Quiet period between the last raw event and a flush.
const DEBOUNCE_WINDOW_MS: u64 = 100;

/// What happened to a watched target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// A changed target: a filesystem path, or a locator pushed out-of-band.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    Path(PathBuf),
    Locator(ModuleLocator),
}

/// One coalesced batch of changes.
#[derive(Clone, Debug)]
pub struct WatchEvent {
    pub changes: HashMap<WatchTarget, ChangeKind>,
}

type Listener = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Raw event classification before the debounce flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Rename,
    Change,
}

struct WatchInner {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
    /// The shared OS watcher; present iff at least one listener exists.
    watcher: Option<RecommendedWatcher>,
}

/// Shared watch state for one project root.
pub struct WatchCoordinator {
    root: PathBuf,
    caches: Arc<ModuleCaches>,
    inner: Arc<Mutex<WatchInner>>,
}

impl WatchCoordinator {
    pub(crate) fn new(root: PathBuf, caches: Arc<ModuleCaches>) -> Self {
        Self {
            root,
            caches,
            inner: Arc::new(Mutex::new(WatchInner {
                next_id: 0,
                listeners: HashMap::new(),
                watcher: None,
            })),
        }
    }

    /// Subscribe to coalesced change events. The first subscription starts
    /// the shared OS watcher and debounce task; dropping the returned handle
    /// unsubscribes, and the last drop tears the watcher down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch(
        &self,
        listener: impl Fn(&WatchEvent) + Send + Sync + 'static,
    ) -> Result<WatchSubscription, crate::error::Error> {
        let mut inner = self.inner.lock().unwrap();

        if inner.listeners.is_empty() {
            let (tx, rx) = mpsc::unbounded_channel::<(RawKind, PathBuf)>();

            let mut watcher = RecommendedWatcher::new(
                move |res: Result<notify::Event, notify::Error>| match res {
                    Ok(event) => {
                        if let Some(kind) = classify(&event.kind) {
                            for path in event.paths {
                                if tx.send((kind, path)).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Watch error");
                    }
                },
                notify::Config::default(),
            )
            .map_err(|e| crate::error::Error::Watch(e.to_string()))?;

            watcher
                .watch(&self.root, RecursiveMode::Recursive)
                .map_err(|e| crate::error::Error::Watch(e.to_string()))?;

            debug!(root = %self.root.display(), "watching project root");
            inner.watcher = Some(watcher);

            let caches = Arc::clone(&self.caches);
            let inner_for_task = Arc::clone(&self.inner);
            tokio::spawn(async move {
                process_events(rx, &caches, &inner_for_task).await;
            });
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Arc::new(listener));

        Ok(WatchSubscription {
            id,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Push a synthetic single-target `added` change directly to listeners,
    /// bypassing the filesystem — used to signal out-of-band artifact
    /// updates.
    pub fn notify_update(&self, locator: ModuleLocator) {
        let mut changes = HashMap::new();
        changes.insert(WatchTarget::Locator(locator), ChangeKind::Added);
        let event = WatchEvent { changes };

        let listeners: Vec<Listener> = {
            let inner = self.inner.lock().unwrap();
            inner.listeners.values().cloned().collect()
        };

        for listener in listeners {
            listener(&event);
        }
    }

    /// Whether the shared OS watcher currently exists.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.inner.lock().unwrap().watcher.is_some()
    }
}

/// Subscription handle; unsubscribes on drop.
pub struct WatchSubscription {
    id: u64,
    inner: Arc<Mutex<WatchInner>>,
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.remove(&self.id);

        if inner.listeners.is_empty() {
            // Dropping the watcher closes the raw event channel, which ends
            // the debounce task.
            inner.watcher = None;
        }
    }
}

fn classify(kind: &EventKind) -> Option<RawKind> {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(RawKind::Rename)
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(RawKind::Change)
        }
        _ => None,
    }
}

/// Debounce loop: accumulate raw events, flush after the quiet period.
async fn process_events(
    mut rx: mpsc::UnboundedReceiver<(RawKind, PathBuf)>,
    caches: &Arc<ModuleCaches>,
    inner: &Arc<Mutex<WatchInner>>,
) {
    let mut rename: HashSet<PathBuf> = HashSet::new();
    let mut change: HashSet<PathBuf> = HashSet::new();

    loop {
        let timeout =
            tokio::time::timeout(Duration::from_millis(DEBOUNCE_WINDOW_MS), rx.recv()).await;

        match timeout {
            Ok(Some((kind, path))) => match kind {
                RawKind::Rename => {
                    rename.insert(path);
                }
                RawKind::Change => {
                    change.insert(path);
                }
            },

            Ok(None) => {
                debug!("watch event channel closed");
                break;
            }

            Err(_) => {
                if rename.is_empty() && change.is_empty() {
                    continue;
                }

                // Buffers drain before listeners run: anything arriving
                // while they execute starts a fresh debounce cycle.
                let changes = flush_buffers(&mut rename, &mut change);

                for target in changes.keys() {
                    if let WatchTarget::Path(path) = target {
                        let removed = caches.invalidate_path(path);
                        if removed > 0 {
                            debug!(path = %path.display(), count = removed, "invalidated memo entries");
                        }
                    }
                }

                let event = WatchEvent { changes };
                let listeners: Vec<Listener> = {
                    let inner = inner.lock().unwrap();
                    inner.listeners.values().cloned().collect()
                };

                if listeners.is_empty() {
                    warn!("watch flush with no listeners");
                }

                for listener in &listeners {
                    listener(&event);
                }
            }
        }
    }
}

/// Classify buffered paths into the final change map, clearing both buffers.
fn flush_buffers(
    rename: &mut HashSet<PathBuf>,
    change: &mut HashSet<PathBuf>,
) -> HashMap<WatchTarget, ChangeKind> {
    let mut changes = HashMap::new();

    for path in rename.drain() {
        let kind = if path.exists() {
            ChangeKind::Added
        } else {
            ChangeKind::Removed
        };
        changes.insert(WatchTarget::Path(path), kind);
    }

    for path in change.drain() {
        let target = WatchTarget::Path(path);
        changes.entry(target).or_insert(ChangeKind::Changed);
    }

    changes
}
