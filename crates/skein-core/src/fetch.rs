//! Module source fetching.
//!
//! Turns a locator into raw source plus a MIME type. Fetch hooks run first
//! (matched against the locator URL) — the dynamic module synthesizer uses
//! one to serve generated sources. The default path reads the physical file
//! after collapsing any virtual segments.

use crate::error::ModuleError;
use crate::locator::{LocatorKind, ModuleLocator};
use crate::project::Project;
use regex_lite::Regex;
use std::path::PathBuf;

/// One fetch request.
#[derive(Clone, Debug)]
pub struct FetchArgs {
    pub locator: ModuleLocator,
}

/// Fetched module source.
#[derive(Clone, Debug)]
pub struct FetchData {
    pub locator: ModuleLocator,
    pub mime_type: String,
    pub source: String,
}

/// Value-or-error fetch result plus the files read along the way.
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    pub result: Result<FetchData, ModuleError>,
    pub dependencies: Vec<PathBuf>,
}

/// An ordered fetch interception hook, matched against the locator URL.
pub struct FetchHook {
    pub pattern: Regex,
    #[allow(clippy::type_complexity)]
    pub callback: Box<dyn Fn(&Project, &FetchArgs) -> Option<FetchOutcome> + Send + Sync>,
}

/// Fetch a module's source.
pub fn fetch(project: &Project, args: &FetchArgs) -> FetchOutcome {
    if args.locator.kind == LocatorKind::External {
        return FetchOutcome {
            result: Err(ModuleError::from_string(format!(
                "Cannot fetch this module ({} is external)",
                args.locator.url
            ))),
            dependencies: vec![],
        };
    }

    for hook in &project.on_fetch {
        if hook.pattern.is_match(&args.locator.url) {
            if let Some(outcome) = (hook.callback)(project, args) {
                return outcome;
            }
        }
    }

    fetch_no_hooks(project, args)
}

/// The default fetch path, without interception.
pub fn fetch_no_hooks(project: &Project, args: &FetchArgs) -> FetchOutcome {
    // A `transform=url` param asks for the module's public URL as a module
    // rather than its contents.
    if args.locator.param("transform") == Some("url") {
        let url = serde_json::to_string(&args.locator.without_params().url).unwrap();

        return FetchOutcome {
            result: Ok(FetchData {
                locator: args.locator.clone(),
                mime_type: "text/javascript".to_string(),
                source: format!("module.exports = {url};\n"),
            }),
            dependencies: vec![],
        };
    }

    let Some(path) = project.physical_path(&args.locator) else {
        return FetchOutcome {
            result: Err(ModuleError::from_string(format!(
                "Cannot fetch this module (no fetcher configured for {})",
                args.locator.url
            ))),
            dependencies: vec![],
        };
    };

    match std::fs::read_to_string(&path) {
        Ok(source) => {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();

            FetchOutcome {
                result: Ok(FetchData {
                    locator: args.locator.clone(),
                    mime_type: mime_from_ext(&ext).to_string(),
                    source,
                }),
                dependencies: vec![path],
            }
        }

        Err(_) => FetchOutcome {
            result: Err(ModuleError::from_string(format!(
                "Cannot fetch this module (an error happened while reading {})",
                args.locator.url
            ))),
            dependencies: vec![path],
        },
    }
}

/// MIME type for a file extension.
#[must_use]
pub fn mime_from_ext(ext: &str) -> &'static str {
    match ext {
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => "text/javascript",
        "json" => "application/json",
        "css" => "text/css",
        "html" => "text/html",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_fetch_reads_physical_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.js"), "module.exports = 1;").unwrap();

        let project = Project::new(dir.path());
        let locator = project
            .locator_from_path(&dir.path().join("src/a.js"), &[])
            .unwrap();

        let outcome = fetch(&project, &FetchArgs { locator });
        let data = outcome.result.unwrap();
        assert_eq!(data.mime_type, "text/javascript");
        assert_eq!(data.source, "module.exports = 1;");
        assert_eq!(outcome.dependencies, vec![dir.path().join("src/a.js")]);
    }

    #[test]
    fn test_fetch_url_transform_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        let locator = ModuleLocator::new(
            LocatorKind::File,
            "app/assets/logo.svg".to_string(),
            vec![crate::locator::Param::new("transform", "url")],
        );

        let outcome = fetch(&project, &FetchArgs { locator });
        let data = outcome.result.unwrap();
        assert_eq!(
            data.source,
            "module.exports = \"/_dev/file/app/assets/logo.svg\";\n"
        );
    }

    #[test]
    fn test_fetch_external_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        let locator = ModuleLocator::new(LocatorKind::External, "node:fs".to_string(), vec![]);

        let outcome = fetch(&project, &FetchArgs { locator });
        assert!(outcome.result.is_err());
    }

    #[test]
    fn test_fetch_missing_file_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        let locator = project
            .locator_from_path(&dir.path().join("src/gone.js"), &[])
            .unwrap();

        let outcome = fetch(&project, &FetchArgs { locator });
        assert!(outcome.result.is_err());
        // The missing path is still a dependency: creating it later must
        // invalidate this outcome.
        assert_eq!(outcome.dependencies, vec![dir.path().join("src/gone.js")]);
    }
}
