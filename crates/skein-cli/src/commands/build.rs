//! `skein build` command implementation.
//!
//! Bundles every build declared in the project configuration: each entry
//! matched by a build's include globs becomes a self-contained artifact in
//! that build's dist folder.

use miette::{IntoDiagnostic, Result};
use skein_core::bundle::{bundle, BundleOptions};
use skein_core::graph::BatchOptions;
use skein_core::project::Project;
use skein_core::transform::DevTransformer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
}

pub async fn run(action: BuildAction) -> Result<()> {
    let cwd = action.cwd.canonicalize().into_diagnostic()?;

    let config = super::load_config(&cwd)?;
    if config.builds.is_empty() {
        warn!("no builds declared in skein.config.json");
        println!("  Nothing to build (no builds declared)");
        return Ok(());
    }

    let mut project = Project::new(&cwd);
    project.config = config.clone();
    let project = Arc::new(project);
    let engine = Arc::new(DevTransformer::new());

    let opts = BundleOptions {
        batch: BatchOptions {
            traverse_dependencies: true,
            traverse_packages: true,
            traverse_vendors: true,
        },
        require_on_load: true,
        include_runtime: true,
    };

    for (name, build) in &config.builds {
        let source_dir = cwd.join(config.patterns.source_folder_for(name));
        let dist_dir = cwd.join(config.patterns.dist_folder_for(name));

        for pattern in &build.include {
            let full_pattern = source_dir.join(pattern);
            let paths = glob::glob(&full_pattern.to_string_lossy()).into_diagnostic()?;

            for entry_path in paths {
                let entry_path = entry_path.into_diagnostic()?;
                let Some(locator) = project.locator_from_path(&entry_path, &[]) else {
                    warn!(path = %entry_path.display(), "entry escapes the project root");
                    continue;
                };

                let output = bundle(
                    Arc::clone(&project),
                    Arc::clone(&engine) as Arc<dyn skein_core::TransformEngine>,
                    locator,
                    opts.clone(),
                )
                .await;

                let rel = entry_path
                    .strip_prefix(&source_dir)
                    .unwrap_or(&entry_path)
                    .to_path_buf();
                let out_path = dist_dir.join(&rel);

                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent).into_diagnostic()?;
                }
                std::fs::write(&out_path, &output.code).into_diagnostic()?;

                info!(build = %name, entry = %rel.display(), out = %out_path.display(), "bundled");
                println!("  [{name}] {} -> {}", rel.display(), out_path.display());
            }
        }
    }

    Ok(())
}
