//! Import resolution engine.
//!
//! Maps an import request plus its issuer to a locator. Interception hooks
//! run first, in registration order, matched against the raw request; the
//! default resolver handles locator URLs, builtins, relative/absolute
//! paths (with extension and index probing), and bare package specifiers
//! via `node_modules` walking.
//!
//! Every outcome carries the list of files consulted along the way so the
//! watch coordinator can invalidate the resolution memo when, e.g., a
//! package manifest changes.

use crate::error::{Diagnostic, Highlight, ModuleError, Span};
use crate::locator::{LocatorKind, ModuleLocator, Param};
use crate::project::Project;
use crate::vpath;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether a request came from a static or a dynamic import.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolutionKind {
    StaticImport,
    DynamicImport,
}

/// Options threaded through a resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolveOpts {
    /// Params appended to every successfully resolved file locator.
    pub force_params: Vec<Param>,
}

/// One resolution request.
#[derive(Clone, Debug)]
pub struct ResolveArgs {
    pub kind: ResolutionKind,
    pub request: String,
    pub issuer: Option<ModuleLocator>,
    pub span: Option<Span>,
    pub opts: ResolveOpts,
}

/// A successful resolution.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub locator: ModuleLocator,
}

/// Value-or-error resolution result plus the files consulted on the way.
#[derive(Clone, Debug)]
pub struct ResolveOutcome {
    pub result: Result<Resolution, ModuleError>,
    pub dependencies: Vec<PathBuf>,
}

impl ResolveOutcome {
    #[must_use]
    pub fn found(locator: ModuleLocator) -> Self {
        Self {
            result: Ok(Resolution { locator }),
            dependencies: vec![],
        }
    }
}

/// An ordered interception hook: first hook whose pattern matches the raw
/// request *and* whose callback returns an outcome wins.
pub struct ResolveHook {
    pub pattern: Regex,
    #[allow(clippy::type_complexity)]
    pub callback: Box<dyn Fn(&Project, &ResolveArgs) -> Option<ResolveOutcome> + Send + Sync>,
}

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "process",
    "stream",
    "url",
    "util",
    "worker_threads",
    "zlib",
];

const EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "json", "css"];

/// Resolve a request to a locator. Memoized per (request, issuer, kind).
pub fn resolve(project: &Project, args: &ResolveArgs) -> ResolveOutcome {
    let key = (
        args.request.clone(),
        args.issuer.as_ref().map(|l| l.url.clone()).unwrap_or_default(),
        args.kind,
    );

    if let Some(cached) = project.cached_resolution(&key) {
        return cached;
    }

    let outcome = resolve_uncached(project, args);
    project.store_resolution(key, &outcome);
    outcome
}

fn resolve_uncached(project: &Project, args: &ResolveArgs) -> ResolveOutcome {
    // Requests that already denote a locator bypass the hooks entirely.
    if let Some(locator) = project.locator(&args.request) {
        return ResolveOutcome::found(locator);
    }

    for hook in &project.on_resolve {
        if hook.pattern.is_match(&args.request) {
            if let Some(outcome) = (hook.callback)(project, args) {
                return outcome;
            }
        }
    }

    resolve_no_hooks(project, args)
}

/// The default path/package resolution, without interception.
pub fn resolve_no_hooks(project: &Project, args: &ResolveArgs) -> ResolveOutcome {
    let (specifier, request_params) = match args.request.split_once('?') {
        Some((specifier, qs)) => (specifier, crate::locator::parse_query(qs)),
        None => (args.request.as_str(), vec![]),
    };

    let bare_name = specifier.split('/').next().unwrap_or(specifier);
    if specifier.starts_with("node:") || NODE_BUILTINS.contains(&bare_name) {
        let locator = ModuleLocator::new(LocatorKind::External, specifier.to_string(), vec![]);
        return ResolveOutcome::found(locator);
    }

    let mut params = args.opts.force_params.clone();
    params.extend(request_params);

    let base_dir = issuer_dir(project, args);

    let mut consulted: Vec<PathBuf> = Vec::new();

    let found = if specifier.starts_with("./") || specifier.starts_with("../") {
        let joined = base_dir.join(specifier);
        let normalized = PathBuf::from(vpath::normalize_abs(&joined.to_string_lossy()));
        probe(&normalized, &mut consulted)
    } else if specifier.starts_with('/') {
        probe(Path::new(specifier), &mut consulted)
    } else {
        resolve_bare(specifier, &base_dir, &mut consulted)
    };

    match found {
        Some(path) => match project.locator_from_path(&path, &params) {
            Some(locator) => {
                debug!(request = %args.request, url = %locator.url, "resolved");
                ResolveOutcome {
                    result: Ok(Resolution { locator }),
                    dependencies: consulted,
                }
            }
            None => ResolveOutcome {
                result: Err(ModuleError::from_diagnostics(vec![
                    Diagnostic::with_highlight(
                        format!(
                            "Resolution escaped every registered namespace ({})",
                            path.display()
                        ),
                        issuer_highlight(args),
                    ),
                ])),
                dependencies: consulted,
            },
        },
        None => ResolveOutcome {
            result: Err(ModuleError::from_diagnostics(vec![
                Diagnostic::with_highlight(
                    format!("Module not found ({})", args.request),
                    issuer_highlight(args),
                ),
            ])),
            dependencies: consulted,
        },
    }
}

fn issuer_highlight(args: &ResolveArgs) -> Highlight {
    Highlight {
        source: args.issuer.as_ref().map(|l| l.url.clone()),
        label: None,
        span: args.span,
    }
}

/// Directory that relative requests resolve against.
///
/// # Panics
/// Asserts that a dynamic import's issuer has a physical path: without one
/// there is no anchor to resolve relative to.
fn issuer_dir(project: &Project, args: &ResolveArgs) -> PathBuf {
    match &args.issuer {
        None => project.root.clone(),
        Some(issuer) => match project.physical_path(issuer) {
            Some(path) => path.parent().map_or_else(|| project.root.clone(), Path::to_path_buf),
            None => {
                assert!(
                    args.kind != ResolutionKind::DynamicImport,
                    "Assertion failed: Cannot resolve a dynamic import from a module without a physical path ({})",
                    issuer.url,
                );
                project.root.clone()
            }
        },
    }
}

/// Probe a path: exact file, appended extensions, then directory index.
/// Every candidate is recorded in `consulted`, hit or miss, so the memo is
/// invalidated when a previously-missing candidate appears.
fn probe(path: &Path, consulted: &mut Vec<PathBuf>) -> Option<PathBuf> {
    consulted.push(path.to_path_buf());
    if path.is_file() {
        return Some(path.to_path_buf());
    }

    for ext in EXTENSIONS {
        let candidate = PathBuf::from(format!("{}.{ext}", path.to_string_lossy()));
        consulted.push(candidate.clone());
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if path.is_dir() {
        for ext in EXTENSIONS {
            let candidate = path.join(format!("index.{ext}"));
            consulted.push(candidate.clone());
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Bare specifier resolution: walk `node_modules` upward from the issuer,
/// consulting each candidate package manifest.
fn resolve_bare(specifier: &str, base_dir: &Path, consulted: &mut Vec<PathBuf>) -> Option<PathBuf> {
    let (pkg, subpath) = split_package_specifier(specifier);

    let mut dir = Some(base_dir);
    while let Some(current) = dir {
        let pkg_dir = current.join("node_modules").join(pkg);

        if let Some(sub) = subpath {
            if pkg_dir.is_dir() {
                if let Some(found) = probe(&pkg_dir.join(sub), consulted) {
                    return Some(found);
                }
            }
        } else {
            let manifest = pkg_dir.join("package.json");
            consulted.push(manifest.clone());

            if let Ok(raw) = std::fs::read_to_string(&manifest) {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&raw) {
                    for field in ["module", "main"] {
                        if let Some(entry) = json.get(field).and_then(|v| v.as_str()) {
                            let entry = entry.trim_start_matches("./");
                            if let Some(found) = probe(&pkg_dir.join(entry), consulted) {
                                return Some(found);
                            }
                        }
                    }
                }
            }

            if pkg_dir.is_dir() {
                if let Some(found) = probe(&pkg_dir, consulted) {
                    return Some(found);
                }
            }
        }

        dir = current.parent();
    }

    None
}

/// Split `@scope/pkg/sub/path` into the package name and optional subpath.
fn split_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    let segments_in_name = if specifier.starts_with('@') { 2 } else { 1 };

    let mut idx = 0;
    let mut seen = 0;
    for (i, c) in specifier.char_indices() {
        if c == '/' {
            seen += 1;
            if seen == segments_in_name {
                idx = i;
                break;
            }
        }
    }

    if idx == 0 {
        (specifier, None)
    } else {
        (&specifier[..idx], Some(&specifier[idx + 1..]))
    }
}
