//! Dev-server request/response shapes.
//!
//! A request carries a locator URL; the response is either a self-contained
//! bundle or a single transformed module plus its resolution table, tagged
//! with a MIME type. Transport plumbing lives with the caller.

use crate::bundle::{bundle, BundleOptions, BundleOutput};
use crate::error::ModuleError;
use crate::graph::{batch, BatchOptions};
use crate::project::Project;
use crate::transform::TransformEngine;
use std::collections::HashMap;
use std::sync::Arc;

/// A single module plus the resolution table the runtime needs to load it.
#[derive(Debug, Clone)]
pub struct ModuleResponse {
    pub mime_type: String,
    pub code: String,
    pub resolutions: HashMap<String, Option<String>>,
}

/// Serve a locator URL as a bundle of its reachable graph.
pub async fn serve_bundle(
    project: Arc<Project>,
    engine: Arc<dyn TransformEngine>,
    url: &str,
) -> Result<BundleOutput, ModuleError> {
    let locator = project
        .locator(url)
        .ok_or_else(|| ModuleError::from_string(format!("Route not found ({url})")))?;

    Ok(bundle(project, engine, locator, BundleOptions::default()).await)
}

/// Serve a locator URL as a single module plus its resolution table,
/// deferring dependency loading to the runtime.
pub async fn serve_module(
    project: Arc<Project>,
    engine: Arc<dyn TransformEngine>,
    url: &str,
) -> Result<ModuleResponse, ModuleError> {
    let locator = project
        .locator(url)
        .ok_or_else(|| ModuleError::from_string(format!("Route not found ({url})")))?;

    let opts = BatchOptions {
        traverse_dependencies: false,
        ..BatchOptions::default()
    };

    let mut result = batch(project, engine, vec![locator.clone()], opts).await;
    let entry = result
        .results
        .remove(&locator.url)
        .expect("Assertion failed: Entry-only batch lost its entry");

    let module = entry.result?;

    Ok(ModuleResponse {
        mime_type: module.mime_type,
        code: module.code,
        resolutions: module.resolutions,
    })
}
