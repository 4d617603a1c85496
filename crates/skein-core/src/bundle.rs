//! Bundle assembly.
//!
//! Concatenates a traversed graph into one artifact: optional runtime
//! prelude, module factories in deterministic order, error definitions for
//! failed modules, a metadata trailer carrying each module's path and
//! resolution table, and an optional require-on-load footer. Failed modules
//! keep their slot — their error surfaces only when something actually
//! requires them.

use crate::client;
use crate::error::ModuleError;
use crate::graph::{batch, BatchModuleResult, BatchOptions};
use crate::locator::ModuleLocator;
use crate::project::Project;
use crate::transform::TransformEngine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Bundle assembly options.
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    pub batch: BatchOptions,
    /// Append a footer requiring the entry as soon as the bundle loads.
    pub require_on_load: bool,
    /// Prepend the module runtime so the bundle is self-contained.
    pub include_runtime: bool,
}

/// Per-module metadata embedded in the bundle trailer.
#[derive(Debug, Clone, Serialize)]
pub struct BundleModuleMeta {
    pub error: Option<ModuleError>,
    pub path: Option<String>,
    pub resolutions: HashMap<String, Option<String>>,
}

/// One assembled artifact.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    pub entry: String,
    pub mime_type: String,
    pub code: String,
}

/// Bundle the graph reachable from `entry`.
pub async fn bundle(
    project: Arc<Project>,
    engine: Arc<dyn TransformEngine>,
    entry: ModuleLocator,
    opts: BundleOptions,
) -> BundleOutput {
    let batch_result = batch(
        Arc::clone(&project),
        engine,
        vec![entry.clone()],
        opts.batch,
    )
    .await;

    // Non-JS entries (stylesheets, raw assets) pass through untouched.
    if let Some(BatchModuleResult { result: Ok(module) }) = batch_result.results.get(&entry.url) {
        if module.mime_type != "text/javascript" {
            return BundleOutput {
                entry: entry.url,
                mime_type: module.mime_type.clone(),
                code: module.code.clone(),
            };
        }
    }

    let mut sorted: Vec<(&String, &BatchModuleResult)> = batch_result.results.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut code = String::new();
    if opts.include_runtime {
        code.push_str(client::runtime_source());
        code.push('\n');
    }

    let mut meta: HashMap<String, BundleModuleMeta> = HashMap::new();

    for (url, entry_result) in sorted {
        match &entry_result.result {
            Ok(module) => {
                code.push_str(&module.code);
                if !code.ends_with('\n') {
                    code.push('\n');
                }

                meta.insert(
                    url.clone(),
                    BundleModuleMeta {
                        error: None,
                        path: project
                            .physical_path(&module.locator)
                            .map(|p| p.to_string_lossy().into_owned()),
                        resolutions: module.resolutions.clone(),
                    },
                );
            }

            Err(error) => {
                code.push_str(&format!(
                    "$skein$.defineError({}, {});\n",
                    serde_json::to_string(url).unwrap(),
                    serde_json::to_string(error).unwrap(),
                ));

                meta.insert(
                    url.clone(),
                    BundleModuleMeta {
                        error: Some(error.clone()),
                        path: None,
                        resolutions: HashMap::new(),
                    },
                );
            }
        }
    }

    code.push_str(&format!(
        "$skein$.meta({});\n",
        serde_json::to_string(&meta).unwrap()
    ));

    if opts.require_on_load {
        code.push_str(&format!(
            "\n(typeof module !== 'undefined' ? module : {{}}).exports = $skein$.require({});\n",
            serde_json::to_string(&entry.url).unwrap()
        ));
    }

    BundleOutput {
        entry: entry.url,
        mime_type: "text/javascript".to_string(),
        code,
    }
}
