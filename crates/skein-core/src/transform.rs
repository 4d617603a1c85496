//! Transform seam and the default dev transformer.
//!
//! The engine consumes the transform step through [`TransformEngine`]:
//! fetched source goes in, runtime-executable code plus declared imports
//! come out. [`DevTransformer`] is the built-in implementation for the
//! dev-runtime module format — it scans dependency specifiers and wraps
//! the source into a `$skein$.define` factory. Full source-to-source
//! compilation (TypeScript, JSX, ...) is a collaborator concern plugged in
//! behind the same trait.

use crate::error::{ModuleError, Span};
use crate::fetch::{fetch, FetchArgs, FetchData};
use crate::locator::ModuleLocator;
use crate::project::Project;
use crate::resolve::ResolutionKind;
use crate::scan;
use std::path::PathBuf;

/// One dependency declared by a transformed module.
#[derive(Clone, Debug)]
pub struct Import {
    pub kind: ResolutionKind,
    pub specifier: String,
    pub span: Option<Span>,
}

/// Transformed module output.
#[derive(Clone, Debug)]
pub struct TransformData {
    pub mime_type: String,
    pub code: String,
    pub imports: Vec<Import>,
}

/// Value-or-error transform result plus the files consulted.
#[derive(Clone, Debug)]
pub struct TransformOutcome {
    pub result: Result<TransformData, ModuleError>,
    pub dependencies: Vec<PathBuf>,
}

/// One transform request.
#[derive(Clone, Debug)]
pub struct TransformArgs {
    pub locator: ModuleLocator,
}

/// The external transform step, consumed as a seam.
pub trait TransformEngine: Send + Sync {
    /// Turn fetched source into executable code plus declared dependencies
    /// and diagnostics. Must return a value — errors travel inside the
    /// outcome, never as panics.
    fn transform(
        &self,
        project: &Project,
        locator: &ModuleLocator,
        fetched: &FetchData,
    ) -> TransformOutcome;
}

/// Transform a module, memoized per locator URL for the project's lifetime.
///
/// Memo entries are invalidated surgically by the watch coordinator when a
/// consulted file changes — never cleared wholesale.
pub fn transform(
    project: &Project,
    engine: &dyn TransformEngine,
    args: &TransformArgs,
) -> TransformOutcome {
    if let Some(cached) = project.cached_transform(&args.locator.url) {
        return cached;
    }

    let fetched = fetch(
        project,
        &FetchArgs {
            locator: args.locator.clone(),
        },
    );

    let mut watch_paths = fetched.dependencies.clone();

    let outcome = match fetched.result {
        Err(error) => TransformOutcome {
            result: Err(error),
            dependencies: fetched.dependencies,
        },
        Ok(data) => {
            let mut outcome = engine.transform(project, &args.locator, &data);
            watch_paths.extend(outcome.dependencies.iter().cloned());
            outcome.dependencies = watch_paths.clone();
            outcome
        }
    };

    project.store_transform(args.locator.url.clone(), &outcome, watch_paths);
    outcome
}

/// Default transformer for the dev-runtime module format.
///
/// JavaScript sources are wrapped into a registry factory and their
/// specifiers scanned; JSON becomes an exporting module; everything else
/// passes through under its own MIME type with no dependencies.
#[derive(Debug, Default)]
pub struct DevTransformer;

impl DevTransformer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TransformEngine for DevTransformer {
    fn transform(
        &self,
        _project: &Project,
        locator: &ModuleLocator,
        fetched: &FetchData,
    ) -> TransformOutcome {
        match fetched.mime_type.as_str() {
            "text/javascript" => {
                let imports = scan::scan_imports(&fetched.source)
                    .into_iter()
                    .map(|found| Import {
                        kind: found.kind,
                        specifier: found.specifier,
                        span: Some(found.span),
                    })
                    .collect();

                TransformOutcome {
                    result: Ok(TransformData {
                        mime_type: "text/javascript".to_string(),
                        code: wrap_factory(&locator.url, &fetched.source),
                        imports,
                    }),
                    dependencies: vec![],
                }
            }

            "application/json" => {
                let code = match serde_json::from_str::<serde_json::Value>(&fetched.source) {
                    Ok(value) => {
                        let body = format!("module.exports = {value};\n");
                        wrap_factory(&locator.url, &body)
                    }
                    Err(err) => {
                        return TransformOutcome {
                            result: Err(ModuleError::from_string(format!(
                                "Invalid JSON module ({}): {err}",
                                locator.url
                            ))),
                            dependencies: vec![],
                        };
                    }
                };

                TransformOutcome {
                    result: Ok(TransformData {
                        mime_type: "text/javascript".to_string(),
                        code,
                        imports: vec![],
                    }),
                    dependencies: vec![],
                }
            }

            other => TransformOutcome {
                result: Ok(TransformData {
                    mime_type: other.to_string(),
                    code: fetched.source.clone(),
                    imports: vec![],
                }),
                dependencies: vec![],
            },
        }
    }
}

/// Wrap module source into a registry factory definition.
fn wrap_factory(url: &str, source: &str) -> String {
    let url = serde_json::to_string(url).unwrap();
    format!(
        "$skein$.define({url}, function (module, exports, require, __filename, __dirname) {{\n{source}\n}});\n"
    )
}
