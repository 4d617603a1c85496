//! Graph failure containment, wired end to end: a broken module keeps its
//! slot in the bundle as an error definition, the rest of the graph
//! completes, and the failure surfaces only when something requires it.

use serde_json::json;
use skein_core::bundle::{bundle, BundleOptions};
use skein_core::error::ModuleError;
use skein_core::project::Project;
use skein_core::runtime::{ModuleMeta, Runtime, RuntimeError};
use skein_core::transform::DevTransformer;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Parse the bundle's metadata trailer into runtime metas plus the set of
/// broken URLs.
fn parse_meta(code: &str) -> (HashMap<String, ModuleMeta>, Vec<String>) {
    let start = code.find("$skein$.meta(").expect("meta trailer missing");
    let rest = &code[start + "$skein$.meta(".len()..];
    let end = rest.find(");\n").expect("meta trailer unterminated");
    let raw: serde_json::Value = serde_json::from_str(&rest[..end]).unwrap();

    let mut metas = HashMap::new();
    let mut broken = Vec::new();

    for (url, entry) in raw.as_object().unwrap() {
        let error = !entry["error"].is_null();
        if error {
            broken.push(url.clone());
        }

        let resolutions = entry["resolutions"]
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(spec, target)| {
                        (spec.clone(), target.as_str().map(str::to_string))
                    })
                    .collect()
            })
            .unwrap_or_default();

        metas.insert(
            url.clone(),
            ModuleMeta {
                error: error.then(|| ModuleError::from_string("failed upstream")),
                path: entry["path"].as_str().map(str::to_string),
                resolutions,
            },
        );
    }

    broken.sort();
    (metas, broken)
}

#[tokio::test]
async fn test_broken_module_fails_only_its_consumers() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/a.js",
        "module.exports = require(\"./b.js\");\nrequire.import(\"./c.js\");",
    );
    write(dir.path(), "src/b.js", "module.exports = {fine: true};");
    write(dir.path(), "src/c.js", "require(\"missing-pkg\");");

    let project = Arc::new(Project::new(dir.path()));
    let entry = project
        .locator_from_path(&dir.path().join("src/a.js"), &[])
        .unwrap();

    let output = bundle(
        Arc::clone(&project),
        Arc::new(DevTransformer::new()),
        entry.clone(),
        BundleOptions::default(),
    )
    .await;

    // The traversal completed past the broken branch.
    assert!(output.code.contains("$skein$.define(\"/_dev/file/app/src/a.js\""));
    assert!(output.code.contains("$skein$.define(\"/_dev/file/app/src/b.js\""));
    assert!(output
        .code
        .contains("$skein$.defineError(\"/_dev/file/app/src/c.js\""));

    let (metas, broken) = parse_meta(&output.code);
    assert_eq!(broken, vec!["/_dev/file/app/src/c.js".to_string()]);

    // Mirror the bundle in the runtime registry: real resolution tables,
    // factories standing in for the generated code.
    let runtime = Runtime::new();
    runtime.merge_meta(metas);

    runtime.define(
        "/_dev/file/app/src/a.js",
        Rc::new(|runtime, ctx| {
            let b = runtime.require_from(&ctx.id, "./b.js")?;
            *ctx.exports.borrow_mut() = b.borrow().clone();
            Ok(())
        }),
    );
    runtime.define(
        "/_dev/file/app/src/b.js",
        Rc::new(|_, ctx| {
            *ctx.exports.borrow_mut() = json!({"fine": true});
            Ok(())
        }),
    );
    runtime.define_error(
        "/_dev/file/app/src/c.js",
        ModuleError::from_string("Module not found (missing-pkg)"),
    );

    // The entry evaluates cleanly; the broken module never ran.
    let a = runtime.require("/_dev/file/app/src/a.js").unwrap();
    assert_eq!(*a.borrow(), json!({"fine": true}));

    // Only a direct require of the broken module observes the failure.
    match runtime.require("/_dev/file/app/src/c.js") {
        Err(RuntimeError::Failed { locator, error }) => {
            assert_eq!(locator, "/_dev/file/app/src/c.js");
            assert!(error.diagnostics[0].message.contains("missing-pkg"));
        }
        other => panic!("expected a structured failure, got {other:?}"),
    }
}
