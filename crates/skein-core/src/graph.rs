//! Dependency-graph traversal.
//!
//! Grows the module graph from a set of entry locators: each unvisited
//! locator is transformed, its declared imports resolved with the locator
//! as issuer, the specifier→URL mapping recorded, and newly discovered
//! locators enqueued subject to the traversal filters. Branches run as
//! concurrent tasks over a shared worklist; completion is
//! settle-all-then-rethrow-first, so one failing branch never cancels its
//! siblings. A module that fails to transform or resolve still registers
//! in the output — failure containment, not abort-on-first-error.

use crate::error::ModuleError;
use crate::locator::{LocatorKind, ModuleLocator};
use crate::project::Project;
use crate::resolve::{self, ResolveArgs, ResolveOpts};
use crate::transform::{self, TransformArgs, TransformEngine};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Traversal filters.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Follow resolved dependencies (full graph) or stop at the entries.
    pub traverse_dependencies: bool,
    /// Cross package boundaries instead of deferring them to the runtime.
    pub traverse_packages: bool,
    /// Descend into vendored subtrees (`node_modules`).
    pub traverse_vendors: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            traverse_dependencies: true,
            traverse_packages: false,
            traverse_vendors: false,
        }
    }
}

/// One successfully processed module.
#[derive(Debug, Clone)]
pub struct BatchModule {
    pub locator: ModuleLocator,
    pub mime_type: String,
    pub code: String,
    /// specifier → resolved locator URL; `None` defers to the host.
    pub resolutions: HashMap<String, Option<String>>,
}

/// Per-module traversal result; failures are contained values.
#[derive(Debug)]
pub struct BatchModuleResult {
    pub result: Result<BatchModule, ModuleError>,
}

/// The completed traversal, keyed by locator URL.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub results: HashMap<String, BatchModuleResult>,
}

struct BatchMessage {
    locator: ModuleLocator,
    sender: UnboundedSender<BatchMessage>,
}

/// Traverse the graph from `locators`.
pub async fn batch(
    project: Arc<Project>,
    engine: Arc<dyn TransformEngine>,
    locators: Vec<ModuleLocator>,
    opts: BatchOptions,
) -> BatchResult {
    let results = Arc::new(Mutex::new(HashMap::new()));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let entry_url = locators.first().map(|l| l.url.clone());

    for locator in locators {
        tx.send(BatchMessage {
            locator,
            sender: tx.clone(),
        })
        .unwrap();
    }
    drop(tx);

    let traversed = Arc::new(Mutex::new(HashSet::new()));
    let opts = Arc::new(opts);
    let mut tasks = Vec::new();

    while let Some(msg) = rx.recv().await {
        if !traversed.lock().unwrap().insert(msg.locator.clone()) {
            continue;
        }

        let project = Arc::clone(&project);
        let engine = Arc::clone(&engine);
        let opts = Arc::clone(&opts);
        let results = Arc::clone(&results);
        let entry_url = entry_url.clone();

        tasks.push(tokio::spawn(async move {
            process_module(
                &project,
                engine.as_ref(),
                &opts,
                &results,
                entry_url.as_deref(),
                msg,
            );
        }));
    }

    // Settle every branch before surfacing the first panic.
    let mut join_results = Vec::with_capacity(tasks.len());
    for task in tasks {
        join_results.push(task.await);
    }
    for joined in join_results {
        joined.expect("Assertion failed: A graph traversal branch panicked");
    }

    let results = Arc::try_unwrap(results)
        .unwrap_or_else(|_| panic!("Assertion failed: Batch results still shared after settling"))
        .into_inner()
        .unwrap();

    debug!(modules = results.len(), "batch traversal complete");
    BatchResult { results }
}

fn process_module(
    project: &Project,
    engine: &dyn TransformEngine,
    opts: &BatchOptions,
    results: &Mutex<HashMap<String, BatchModuleResult>>,
    entry_url: Option<&str>,
    msg: BatchMessage,
) {
    let locator = msg.locator;
    let is_entry = entry_url == Some(locator.url.as_str());

    let transformed = transform::transform(
        project,
        engine,
        &TransformArgs {
            locator: locator.clone(),
        },
    );

    let data = match transformed.result {
        Ok(data) => data,
        Err(error) => {
            results.lock().unwrap().insert(
                locator.url.clone(),
                BatchModuleResult { result: Err(error) },
            );
            return;
        }
    };

    let mut resolutions: HashMap<String, Option<String>> = HashMap::new();
    let mut resolution_errors = Vec::new();

    for import in &data.imports {
        let resolution = resolve::resolve(
            project,
            &ResolveArgs {
                kind: import.kind,
                request: import.specifier.clone(),
                issuer: Some(locator.clone()),
                span: import.span,
                opts: ResolveOpts::default(),
            },
        );

        match resolution.result {
            Ok(target) => {
                let target_locator = target.locator;
                let mut target_url = match target_locator.kind {
                    LocatorKind::External => None,
                    _ => Some(target_locator.url.clone()),
                };

                if !opts.traverse_vendors {
                    if let Some(url) = &target_url {
                        if url.contains("/node_modules/") {
                            target_url = None;
                        }
                    }
                }

                if target_url.is_some() && !opts.traverse_packages {
                    // Synthetic issuers have no package of their own and
                    // never prune their fan-out.
                    let issuer_pkg = project.package_dir_from_locator(&locator);
                    let target_pkg = project.package_dir_from_locator(&target_locator);
                    if issuer_pkg.is_some() && issuer_pkg != target_pkg {
                        target_url = None;
                    }
                }

                if target_url.is_some() && opts.traverse_dependencies {
                    // Send failures only mean the traversal already drained.
                    let _ = msg.sender.send(BatchMessage {
                        locator: target_locator,
                        sender: msg.sender.clone(),
                    });
                }

                resolutions.insert(import.specifier.clone(), target_url);
            }

            Err(mut error) => {
                resolution_errors.append(&mut error.diagnostics);
            }
        }
    }

    if !resolution_errors.is_empty() {
        results.lock().unwrap().insert(
            locator.url.clone(),
            BatchModuleResult {
                result: Err(ModuleError::from_diagnostics(resolution_errors)),
            },
        );
        return;
    }

    if data.mime_type != "text/javascript" && !is_entry {
        results.lock().unwrap().insert(
            locator.url.clone(),
            BatchModuleResult {
                result: Err(ModuleError::from_string(format!(
                    "Bundled modules can only be of type text/javascript; module {} seems to be {} instead",
                    locator.url, data.mime_type
                ))),
            },
        );
        return;
    }

    let module = BatchModule {
        locator: locator.clone(),
        mime_type: data.mime_type,
        code: data.code,
        resolutions,
    };

    results.lock().unwrap().insert(
        locator.url.clone(),
        BatchModuleResult {
            result: Ok(module),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::DevTransformer;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    async fn run_batch(root: &Path, entry_rel: &str, opts: BatchOptions) -> BatchResult {
        let project = Arc::new(Project::new(root));
        let entry = project.locator_from_path(&root.join(entry_rel), &[]).unwrap();
        batch(project, Arc::new(DevTransformer::new()), vec![entry], opts).await
    }

    #[tokio::test]
    async fn test_batch_traverses_static_graph() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "require(\"./b.js\");");
        write(dir.path(), "src/b.js", "require(\"./c.js\");");
        write(dir.path(), "src/c.js", "module.exports = 3;");

        let result = run_batch(dir.path(), "src/a.js", BatchOptions::default()).await;
        assert_eq!(result.results.len(), 3);

        let a = &result.results["/_dev/file/app/src/a.js"];
        let a = a.result.as_ref().unwrap();
        assert_eq!(
            a.resolutions["./b.js"],
            Some("/_dev/file/app/src/b.js".to_string())
        );
    }

    #[tokio::test]
    async fn test_batch_entry_only_traversal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "require(\"./b.js\");");
        write(dir.path(), "src/b.js", "module.exports = 2;");

        let opts = BatchOptions {
            traverse_dependencies: false,
            ..BatchOptions::default()
        };
        let result = run_batch(dir.path(), "src/a.js", opts).await;

        // The resolution table is still produced, but nothing is enqueued.
        assert_eq!(result.results.len(), 1);
        let a = result.results["/_dev/file/app/src/a.js"].result.as_ref().unwrap();
        assert_eq!(
            a.resolutions["./b.js"],
            Some("/_dev/file/app/src/b.js".to_string())
        );
    }

    #[tokio::test]
    async fn test_batch_failure_containment() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "require(\"./b.js\");\nrequire.import(\"./c.js\");");
        write(dir.path(), "src/b.js", "module.exports = 2;");
        write(dir.path(), "src/c.js", "require(\"missing-pkg\");");

        let result = run_batch(dir.path(), "src/a.js", BatchOptions::default()).await;
        assert_eq!(result.results.len(), 3);

        assert!(result.results["/_dev/file/app/src/a.js"].result.is_ok());
        assert!(result.results["/_dev/file/app/src/b.js"].result.is_ok());

        let c = &result.results["/_dev/file/app/src/c.js"];
        let err = c.result.as_ref().unwrap_err();
        assert!(err.diagnostics[0].message.contains("Module not found"));
    }

    #[tokio::test]
    async fn test_batch_prunes_vendor_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "require(\"dep\");");
        write(
            dir.path(),
            "node_modules/dep/package.json",
            r#"{"main": "index.js"}"#,
        );
        write(dir.path(), "node_modules/dep/index.js", "module.exports = 1;");

        let result = run_batch(dir.path(), "src/a.js", BatchOptions::default()).await;

        // The vendored module resolves but is deferred, not traversed.
        assert_eq!(result.results.len(), 1);
        let a = result.results["/_dev/file/app/src/a.js"].result.as_ref().unwrap();
        assert_eq!(a.resolutions["dep"], None);
    }

    #[tokio::test]
    async fn test_batch_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.js", "require(\"./b.js\");");
        write(dir.path(), "src/b.js", "require(\"./a.js\");");

        let result = run_batch(dir.path(), "src/a.js", BatchOptions::default()).await;
        assert_eq!(result.results.len(), 2);
        assert!(result.results.values().all(|r| r.result.is_ok()));
    }
}
