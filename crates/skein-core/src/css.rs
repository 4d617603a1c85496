//! CSS framework compile worker.
//!
//! The framework compile itself is a collaborator plugged in behind
//! [`CssCompiler`]; this module owns the coordination: a dedicated worker
//! thread, requests keyed by a monotonic version counter, stale replies
//! discarded (last-writer-wins, no cancellation), and reads issued while a
//! compile is in flight parked until the next completed compile resolves
//! them together. Completed compiles update a dependency filter that
//! decides which watch events trigger the next recompile.

use crate::locator::{LocatorKind, ModuleLocator};
use crate::project::Project;
use crate::watch::{WatchSubscription, WatchTarget};
use glob::{MatchOptions, Pattern};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One dependency reported by a completed compile.
#[derive(Debug, Clone)]
pub enum CssDependency {
    /// Exact file.
    File(PathBuf),
    /// Directory subtree, optionally narrowed by a glob.
    Dir { dir: PathBuf, glob: Option<String> },
}

/// Output of one framework compile.
#[derive(Debug, Clone, Default)]
pub struct CssOutput {
    pub css: String,
    pub dependencies: Vec<CssDependency>,
}

/// The pluggable framework compile step, run on the worker thread.
pub trait CssCompiler: Send + 'static {
    fn compile(&mut self) -> CssOutput;
}

impl CssCompiler for Box<dyn CssCompiler> {
    fn compile(&mut self) -> CssOutput {
        (**self).compile()
    }
}

struct CssState {
    version: u64,
    /// Whether a compile is in flight for the latest version.
    active: bool,
    css: String,
    filter: Vec<CssDependency>,
    pending: Vec<oneshot::Sender<String>>,
}

/// Coordinates one framework compile worker.
pub struct CssWorker {
    tx: std_mpsc::Sender<u64>,
    state: Arc<Mutex<CssState>>,
}

impl CssWorker {
    /// Spawn the worker thread and trigger the initial compile.
    /// `on_update` runs after every accepted (non-stale) compile.
    pub fn new(
        mut compiler: impl CssCompiler,
        on_update: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        let (tx, rx) = std_mpsc::channel::<u64>();

        let state = Arc::new(Mutex::new(CssState {
            version: 0,
            active: false,
            css: String::new(),
            filter: Vec::new(),
            pending: Vec::new(),
        }));

        let worker_state = Arc::clone(&state);
        std::thread::spawn(move || {
            while let Ok(version) = rx.recv() {
                let output = compiler.compile();

                let accepted = {
                    let mut state = worker_state.lock().unwrap();

                    // A reply for anything but the latest request is stale:
                    // a newer compile is already queued behind it.
                    if state.version != version {
                        debug!(version, latest = state.version, "discarding stale compile");
                        false
                    } else {
                        state.active = false;
                        state.css = output.css;
                        state.filter = output.dependencies;

                        let css = state.css.clone();
                        for waiter in state.pending.drain(..) {
                            let _ = waiter.send(css.clone());
                        }
                        true
                    }
                };

                if accepted {
                    on_update();
                }
            }
        });

        let worker = Arc::new(Self { tx, state });
        worker.recompile();
        worker
    }

    /// Request a recompile. Bumps the version; any compile already in
    /// flight will be discarded on completion.
    pub fn recompile(&self) {
        let version = {
            let mut state = self.state.lock().unwrap();
            state.version += 1;
            state.active = true;
            state.version
        };

        if self.tx.send(version).is_err() {
            warn!("css worker thread is gone");
        }
    }

    /// Read the current CSS. While a compile is in flight the caller is
    /// parked and resolved together with every other waiting read from the
    /// next completed compile.
    pub async fn read(&self) -> String {
        let waiter = {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return state.css.clone();
            }

            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            rx
        };

        waiter
            .await
            .expect("Assertion failed: CSS worker dropped a pending read")
    }

    /// Whether a changed path (relative to the project root) affects the
    /// last compile's inputs.
    #[must_use]
    pub fn is_affected_by(&self, relative_path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.filter.iter().any(|dep| match dep {
            CssDependency::File(file) => relative_path == file,
            CssDependency::Dir { dir, glob } => {
                let Ok(rest) = relative_path.strip_prefix(dir) else {
                    return false;
                };
                match glob {
                    None => true,
                    Some(pattern) => Pattern::new(pattern).is_ok_and(|p| {
                        p.matches_path_with(
                            rest,
                            MatchOptions {
                                require_literal_separator: true,
                                ..MatchOptions::default()
                            },
                        )
                    }),
                }
            }
        })
    }
}

struct PipelineInstance {
    worker: Arc<CssWorker>,
    _subscription: WatchSubscription,
}

/// Lazily-created compile workers, one per framework config file.
///
/// The first read for a config file spawns its worker, announces completed
/// compiles as synthetic watch updates under a synthetic locator, and
/// subscribes to the shared watcher so changes to the compile's inputs
/// trigger a recompile.
pub struct CssPipeline {
    project: Arc<Project>,
    instances: Mutex<HashMap<PathBuf, PipelineInstance>>,
}

impl CssPipeline {
    #[must_use]
    pub fn new(project: Arc<Project>) -> Self {
        Self {
            project,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The synthetic locator a config file's output is announced under.
    #[must_use]
    pub fn output_locator(project: &Project, config_path: &Path) -> ModuleLocator {
        let specifier = project
            .ns_qualified_from_path(config_path)
            .unwrap_or_else(|| {
                panic!(
                    "Assertion failed: CSS config escapes the registered namespaces ({})",
                    config_path.display()
                )
            });

        ModuleLocator::new(LocatorKind::Synthetic, format!("css/{specifier}"), vec![])
    }

    /// Read the compiled CSS for a config file, creating its worker on
    /// first access.
    pub async fn read(
        &self,
        config_path: &Path,
        make_compiler: impl FnOnce() -> Box<dyn CssCompiler>,
    ) -> Result<String, crate::error::Error> {
        let worker = {
            let mut instances = self.instances.lock().unwrap();

            match instances.get(config_path) {
                Some(instance) => Arc::clone(&instance.worker),
                None => {
                    let locator = Self::output_locator(&self.project, config_path);

                    let update_project = Arc::clone(&self.project);
                    let worker = CssWorker::new(make_compiler(), move || {
                        update_project.watcher().notify_update(locator.clone());
                    });

                    let watch_worker = Arc::clone(&worker);
                    let root = self.project.root.clone();
                    let subscription = self.project.watcher().watch(move |event| {
                        let affected = event.changes.keys().any(|target| match target {
                            WatchTarget::Path(path) => path
                                .strip_prefix(&root)
                                .is_ok_and(|rel| watch_worker.is_affected_by(rel)),
                            WatchTarget::Locator(_) => false,
                        });

                        if affected {
                            watch_worker.recompile();
                        }
                    })?;

                    instances.insert(
                        config_path.to_path_buf(),
                        PipelineInstance {
                            worker: Arc::clone(&worker),
                            _subscription: subscription,
                        },
                    );
                    worker
                }
            }
        };

        Ok(worker.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Compiler that blocks until released, for in-flight assertions.
    struct GatedCompiler {
        gate: std_mpsc::Receiver<()>,
        runs: Arc<AtomicUsize>,
    }

    impl CssCompiler for GatedCompiler {
        fn compile(&mut self) -> CssOutput {
            self.gate.recv().unwrap();
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            CssOutput {
                css: format!(".generated-{run} {{}}"),
                dependencies: vec![CssDependency::Dir {
                    dir: PathBuf::from("sources"),
                    glob: Some("**/*.html".to_string()),
                }],
            }
        }
    }

    fn gated_worker() -> (Arc<CssWorker>, std_mpsc::Sender<()>, Arc<AtomicUsize>) {
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let runs = Arc::new(AtomicUsize::new(0));
        let worker = CssWorker::new(
            GatedCompiler {
                gate: gate_rx,
                runs: Arc::clone(&runs),
            },
            || {},
        );
        (worker, gate_tx, runs)
    }

    #[tokio::test]
    async fn test_reads_park_until_compile_completes() {
        let (worker, gate, _) = gated_worker();

        let read = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.read().await })
        };

        gate.send(()).unwrap();
        let css = read.await.unwrap();
        assert_eq!(css, ".generated-1 {}");

        // With nothing in flight, reads return immediately.
        assert_eq!(worker.read().await, ".generated-1 {}");
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded() {
        let (worker, gate, runs) = gated_worker();

        // A second request supersedes the initial one before it finishes.
        worker.recompile();

        let read = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.read().await })
        };

        // Release both compiles; the first reply is stale and dropped, the
        // second resolves the queued read.
        gate.send(()).unwrap();
        gate.send(()).unwrap();

        let css = read.await.unwrap();
        assert_eq!(css, ".generated-2 {}");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_on_update_fires_per_accepted_compile() {
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let updates = Arc::new(AtomicUsize::new(0));
        let updates_in_callback = Arc::clone(&updates);

        let worker = CssWorker::new(
            GatedCompiler {
                gate: gate_rx,
                runs: Arc::new(AtomicUsize::new(0)),
            },
            move || {
                updates_in_callback.fetch_add(1, Ordering::SeqCst);
            },
        );

        worker.recompile();
        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();

        // Drain both compiles.
        let _ = worker.read().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Two compiles ran, only the non-stale one reported.
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pipeline_announces_updates_under_its_locator() {
        struct InstantCompiler;
        impl CssCompiler for InstantCompiler {
            fn compile(&mut self) -> CssOutput {
                CssOutput {
                    css: ".generated {}".to_string(),
                    dependencies: vec![],
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let project = Arc::new(crate::project::Project::new(dir.path()));

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_listener = Arc::clone(&seen);
        let _subscription = project
            .watcher()
            .watch(move |event| {
                for target in event.changes.keys() {
                    if let WatchTarget::Locator(locator) = target {
                        seen_in_listener.lock().unwrap().push(locator.url.clone());
                    }
                }
            })
            .unwrap();

        let pipeline = CssPipeline::new(Arc::clone(&project));
        let config_path = dir.path().join("tailwind.config.js");

        let css = pipeline
            .read(&config_path, || Box::new(InstantCompiler))
            .await
            .unwrap();
        assert_eq!(css, ".generated {}");

        // The completed compile is announced as a synthetic watch update.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["/_dev/synthetic/css/app/tailwind.config.js".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dependency_filter_matches_files_and_globs() {
        let (worker, gate, _) = gated_worker();
        gate.send(()).unwrap();
        let _ = worker.read().await;

        assert!(worker.is_affected_by(Path::new("sources/pages/index.html")));
        assert!(!worker.is_affected_by(Path::new("sources/pages/index.js")));
        assert!(!worker.is_affected_by(Path::new("dist/pages/index.html")));
    }
}
