//! The module-loader registry.
//!
//! A dependency-free registry mirroring the browser runtime's semantics on
//! the server side: factories register under locator URLs, `require`
//! evaluates lazily against a per-module resolution table, failed modules
//! carry error factories whose failure surfaces only on use, and virtual
//! instances fan out from their physical URL for HMR. The equivalent
//! JavaScript shipped to browsers lives in [`crate::client`].
//!
//! The registry is an explicit object constructed once per page load — no
//! process-wide static state — and is single-threaded by design: all
//! suspension happens between module evaluations, never inside the
//! registry.

use crate::error::ModuleError;
use crate::vpath;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Shared, mutable module exports.
pub type Exports = Rc<RefCell<Value>>;

/// A module factory. Mutates the module's exports cell; dependencies are
/// reached back through the registry with the module's own id as issuer.
pub type Factory = Rc<dyn Fn(&Runtime, &ModuleCtx) -> Result<(), RuntimeError>>;

/// Context handed to a factory.
pub struct ModuleCtx {
    pub id: String,
    pub exports: Exports,
    pub filename: Option<String>,
    pub dirname: Option<String>,
}

/// Evaluation state; `Evaluating` is observable during cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleState {
    Evaluating,
    Evaluated,
}

/// A constructed module instance.
pub struct ModuleInstance {
    pub id: String,
    pub exports: Exports,
    pub state: ModuleState,
}

/// Registry slot for one URL.
struct ModuleSlot {
    /// Virtual locator URLs sharing this physical URL (the HMR fan-out
    /// list); `None` until the first virtual instance registers.
    instances: Option<HashSet<String>>,
    factory: Factory,
    module: Option<ModuleInstance>,
}

/// Per-module metadata: failure state, physical path, resolution table.
#[derive(Debug, Clone, Default)]
pub struct ModuleMeta {
    pub error: Option<ModuleError>,
    pub path: Option<String>,
    /// specifier → locator URL; `None` defers to the host environment.
    pub resolutions: HashMap<String, Option<String>>,
}

/// Runtime-level failures. Structured, never panics: a broken module only
/// fails the code paths that actually require it.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    ModuleNotFound(String),
    /// The specifier is deferred to the host environment, which this
    /// registry does not provide.
    External(String),
    /// The module was registered with an error factory upstream.
    Failed { locator: String, error: ModuleError },
    Evaluation(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModuleNotFound(url) => write!(f, "Module not found: {url}"),
            Self::External(spec) => write!(f, "External module not provided: {spec}"),
            Self::Failed { locator, error } => {
                write!(f, "Module failed upstream ({locator}): {error}")
            }
            Self::Evaluation(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Network seam for [`Runtime::import`]: fetches a module's bundle and
/// feeds its definitions back into the registry.
pub trait ScriptHost {
    fn load(&self, runtime: &Runtime, url: &str) -> Result<(), RuntimeError>;
}

/// The module registry.
#[derive(Default)]
pub struct Runtime {
    modules: RefCell<HashMap<String, ModuleSlot>>,
    refresh_requests: RefCell<HashSet<String>>,
    meta: RefCell<HashMap<String, ModuleMeta>>,
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) a module factory.
    ///
    /// A URL that is a virtual instance of a physical URL also lazily
    /// registers that physical URL — with a factory that must never run
    /// directly — and joins its `instances` fan-out set.
    pub fn define(&self, url: &str, factory: Factory) {
        {
            let mut modules = self.modules.borrow_mut();
            match modules.get_mut(url) {
                Some(slot) => slot.factory = factory,
                None => {
                    modules.insert(
                        url.to_string(),
                        ModuleSlot {
                            instances: None,
                            factory,
                            module: None,
                        },
                    );
                }
            }
        }

        let physical = vpath::resolve_virtual(url);
        if physical != url && physical.starts_with("/_dev/") {
            let mut modules = self.modules.borrow_mut();
            let slot = modules.entry(physical.clone()).or_insert_with(|| ModuleSlot {
                instances: None,
                factory: Rc::new(move |_, _| {
                    Err(RuntimeError::Evaluation(
                        "Physical paths with virtual instances cannot be directly instantiated"
                            .to_string(),
                    ))
                }),
                module: None,
            });

            slot.instances
                .get_or_insert_with(HashSet::new)
                .insert(url.to_string());
        }
    }

    /// Register a module whose failure is deferred until something
    /// requires it.
    pub fn define_error(&self, url: &str, error: ModuleError) {
        let locator = url.to_string();
        self.define(
            url,
            Rc::new(move |_, _| {
                Err(RuntimeError::Failed {
                    locator: locator.clone(),
                    error: error.clone(),
                })
            }),
        );
    }

    /// Merge module metadata (resolution tables) into the registry.
    pub fn merge_meta(&self, meta: HashMap<String, ModuleMeta>) {
        self.meta.borrow_mut().extend(meta);
    }

    /// Flag a URL for refresh: its next `require` re-runs the factory.
    pub fn mark_refresh(&self, url: &str) {
        self.refresh_requests.borrow_mut().insert(url.to_string());
    }

    /// Whether a refresh is pending for a URL.
    #[must_use]
    pub fn is_refresh_pending(&self, url: &str) -> bool {
        self.refresh_requests.borrow().contains(url)
    }

    #[must_use]
    pub fn is_defined(&self, url: &str) -> bool {
        self.modules.borrow().contains_key(url)
    }

    /// The HMR fan-out list for a URL: its virtual instances, or the URL
    /// itself when it has none.
    #[must_use]
    pub fn instances(&self, url: &str) -> Vec<String> {
        let modules = self.modules.borrow();
        match modules.get(url).and_then(|slot| slot.instances.as_ref()) {
            Some(instances) => {
                let mut list: Vec<String> = instances.iter().cloned().collect();
                list.sort();
                list
            }
            None => vec![url.to_string()],
        }
    }

    /// All registered URLs, sorted.
    #[must_use]
    pub fn defined_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.modules.borrow().keys().cloned().collect();
        urls.sort();
        urls
    }

    /// All evaluated URLs, sorted.
    #[must_use]
    pub fn evaluated_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .modules
            .borrow()
            .iter()
            .filter(|(_, slot)| {
                matches!(
                    slot.module,
                    Some(ModuleInstance {
                        state: ModuleState::Evaluated,
                        ..
                    })
                )
            })
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    /// Require a module by URL.
    ///
    /// The module object is inserted into the registry **before** its
    /// factory runs, so a re-entrant require during a cycle observes the
    /// partially-populated exports instead of recursing. Subsequent calls
    /// return the cached exports — unless the URL is flagged for refresh,
    /// in which case the factory re-runs and the flag clears.
    pub fn require(&self, url: &str) -> Result<Exports, RuntimeError> {
        let refresh = self.refresh_requests.borrow_mut().remove(url);

        let factory = {
            let modules = self.modules.borrow();
            let slot = modules
                .get(url)
                .ok_or_else(|| RuntimeError::ModuleNotFound(url.to_string()))?;

            if !refresh {
                if let Some(instance) = &slot.module {
                    return Ok(Rc::clone(&instance.exports));
                }
            }

            Rc::clone(&slot.factory)
        };

        let exports: Exports = Rc::new(RefCell::new(Value::Object(serde_json::Map::new())));
        {
            let mut modules = self.modules.borrow_mut();
            let slot = modules.get_mut(url).unwrap();
            slot.module = Some(ModuleInstance {
                id: url.to_string(),
                exports: Rc::clone(&exports),
                state: ModuleState::Evaluating,
            });
        }

        let (filename, dirname) = {
            let meta = self.meta.borrow();
            let path = meta.get(url).and_then(|m| m.path.clone());
            let dirname = path
                .as_deref()
                .and_then(|p| p.rfind('/').map(|idx| p[..idx].to_string()));
            (path, dirname)
        };

        let ctx = ModuleCtx {
            id: url.to_string(),
            exports: Rc::clone(&exports),
            filename,
            dirname,
        };

        match factory(self, &ctx) {
            Ok(()) => {
                let mut modules = self.modules.borrow_mut();
                if let Some(instance) = modules.get_mut(url).and_then(|s| s.module.as_mut()) {
                    instance.state = ModuleState::Evaluated;
                }
                Ok(exports)
            }
            Err(error) => {
                // A failed evaluation leaves no half-evaluated instance
                // behind; the next require retries (and fails again for
                // error factories).
                let mut modules = self.modules.borrow_mut();
                if let Some(slot) = modules.get_mut(url) {
                    slot.module = None;
                }
                Err(error)
            }
        }
    }

    /// Resolve a specifier through a module's own resolution table.
    pub fn resolve_from(&self, issuer: &str, request: &str) -> Result<String, RuntimeError> {
        if request.starts_with("/_dev/") {
            return Ok(request.to_string());
        }

        let meta = self.meta.borrow();
        let module_meta = meta.get(issuer).ok_or_else(|| {
            RuntimeError::Evaluation(format!(
                "Assertion failed: Cannot resolve from a module that doesn't exist ({issuer})"
            ))
        })?;

        if let Some(error) = &module_meta.error {
            return Err(RuntimeError::Failed {
                locator: issuer.to_string(),
                error: error.clone(),
            });
        }

        match module_meta.resolutions.get(request) {
            None => Err(RuntimeError::ModuleNotFound(request.to_string())),
            Some(Some(url)) => Ok(url.clone()),
            Some(None) => Err(RuntimeError::External(request.to_string())),
        }
    }

    /// Require a specifier relative to an issuing module.
    pub fn require_from(&self, issuer: &str, request: &str) -> Result<Exports, RuntimeError> {
        let url = self.resolve_from(issuer, request)?;
        self.require(&url)
    }

    /// Load a module over the network seam: resolves immediately if already
    /// defined, otherwise asks the host to fetch-and-define first.
    pub fn import(&self, url: &str, host: &dyn ScriptHost) -> Result<Exports, RuntimeError> {
        if !self.is_defined(url) {
            host.load(self, url)?;
        }
        self.require(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value_factory(value: Value) -> Factory {
        Rc::new(move |_, ctx| {
            *ctx.exports.borrow_mut() = value.clone();
            Ok(())
        })
    }

    #[test]
    fn test_require_caches_exports() {
        let runtime = Runtime::new();
        runtime.define("/_dev/file/app/a.js", value_factory(json!({"n": 1})));

        let first = runtime.require("/_dev/file/app/a.js").unwrap();
        let second = runtime.require("/_dev/file/app/a.js").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_require_unknown_module_fails() {
        let runtime = Runtime::new();
        assert!(matches!(
            runtime.require("/_dev/file/app/nope.js"),
            Err(RuntimeError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_resolution_table_is_per_module() {
        let runtime = Runtime::new();
        runtime.define("/_dev/file/app/b.js", value_factory(json!("from b")));
        runtime.define(
            "/_dev/file/app/a.js",
            Rc::new(|runtime, ctx| {
                let b = runtime.require_from(&ctx.id, "./b.js")?;
                *ctx.exports.borrow_mut() = b.borrow().clone();
                Ok(())
            }),
        );

        runtime.merge_meta(HashMap::from([
            (
                "/_dev/file/app/a.js".to_string(),
                ModuleMeta {
                    resolutions: HashMap::from([(
                        "./b.js".to_string(),
                        Some("/_dev/file/app/b.js".to_string()),
                    )]),
                    ..ModuleMeta::default()
                },
            ),
            ("/_dev/file/app/b.js".to_string(), ModuleMeta::default()),
        ]));

        let a = runtime.require("/_dev/file/app/a.js").unwrap();
        assert_eq!(*a.borrow(), json!("from b"));
    }

    #[test]
    fn test_error_factory_defers_failure() {
        let runtime = Runtime::new();
        runtime.define("/_dev/file/app/ok.js", value_factory(json!(1)));
        runtime.define_error(
            "/_dev/file/app/broken.js",
            ModuleError::from_string("went wrong upstream"),
        );

        assert!(runtime.require("/_dev/file/app/ok.js").is_ok());

        match runtime.require("/_dev/file/app/broken.js") {
            Err(RuntimeError::Failed { locator, error }) => {
                assert_eq!(locator, "/_dev/file/app/broken.js");
                assert_eq!(error.diagnostics[0].message, "went wrong upstream");
            }
            other => panic!("expected structured failure, got {other:?}"),
        }

        // Still failing on the second require; no half-evaluated state.
        assert!(runtime.require("/_dev/file/app/broken.js").is_err());
    }

    #[test]
    fn test_cycle_observes_partial_exports() {
        let runtime = Runtime::new();

        runtime.define(
            "/_dev/file/app/a.js",
            Rc::new(|runtime, ctx| {
                ctx.exports
                    .borrow_mut()
                    .as_object_mut()
                    .unwrap()
                    .insert("ready".to_string(), json!(true));
                let b = runtime.require_from(&ctx.id, "./b.js")?;
                ctx.exports
                    .borrow_mut()
                    .as_object_mut()
                    .unwrap()
                    .insert("fromB".to_string(), b.borrow().clone());
                Ok(())
            }),
        );
        runtime.define(
            "/_dev/file/app/b.js",
            Rc::new(|runtime, ctx| {
                // Re-entrant require sees a's partially-populated exports.
                let a = runtime.require_from(&ctx.id, "./a.js")?;
                assert_eq!(a.borrow()["ready"], json!(true));
                assert!(a.borrow().get("fromB").is_none());
                *ctx.exports.borrow_mut() = json!("b done");
                Ok(())
            }),
        );

        runtime.merge_meta(HashMap::from([
            (
                "/_dev/file/app/a.js".to_string(),
                ModuleMeta {
                    resolutions: HashMap::from([(
                        "./b.js".to_string(),
                        Some("/_dev/file/app/b.js".to_string()),
                    )]),
                    ..ModuleMeta::default()
                },
            ),
            (
                "/_dev/file/app/b.js".to_string(),
                ModuleMeta {
                    resolutions: HashMap::from([(
                        "./a.js".to_string(),
                        Some("/_dev/file/app/a.js".to_string()),
                    )]),
                    ..ModuleMeta::default()
                },
            ),
        ]));

        let a = runtime.require("/_dev/file/app/a.js").unwrap();
        assert_eq!(a.borrow()["fromB"], json!("b done"));
    }

    #[test]
    fn test_refresh_flag_reruns_factory() {
        let runtime = Runtime::new();
        runtime.define("/_dev/file/app/a.js", value_factory(json!(1)));

        let first = runtime.require("/_dev/file/app/a.js").unwrap();
        assert_eq!(*first.borrow(), json!(1));

        runtime.define("/_dev/file/app/a.js", value_factory(json!(2)));
        // Not flagged: still the cached exports.
        let cached = runtime.require("/_dev/file/app/a.js").unwrap();
        assert_eq!(*cached.borrow(), json!(1));

        runtime.mark_refresh("/_dev/file/app/a.js");
        let refreshed = runtime.require("/_dev/file/app/a.js").unwrap();
        assert_eq!(*refreshed.borrow(), json!(2));

        // The flag clears after one re-run.
        assert!(!runtime.is_refresh_pending("/_dev/file/app/a.js"));
    }

    #[test]
    fn test_virtual_instance_registers_physical_fanout() {
        let runtime = Runtime::new();
        let virtual_a = "/_dev/file/app/pkg/__virtual__/abc123/1/mod.js";
        let virtual_b = "/_dev/file/app/pkg/__virtual__/def456/1/mod.js";

        runtime.define(virtual_a, value_factory(json!("a")));
        runtime.define(virtual_b, value_factory(json!("b")));

        let physical = "/_dev/file/app/mod.js";
        assert!(runtime.is_defined(physical));
        assert_eq!(runtime.instances(physical), vec![virtual_a, virtual_b]);

        // The physical slot exists only as a fan-out anchor.
        assert!(runtime.require(physical).is_err());
    }

    #[test]
    fn test_import_delegates_to_script_host() {
        struct FakeHost;
        impl ScriptHost for FakeHost {
            fn load(&self, runtime: &Runtime, url: &str) -> Result<(), RuntimeError> {
                runtime.define(
                    url,
                    Rc::new(|_, ctx| {
                        *ctx.exports.borrow_mut() = json!("loaded over the wire");
                        Ok(())
                    }),
                );
                Ok(())
            }
        }

        let runtime = Runtime::new();
        let exports = runtime
            .import("/_dev/file/app/remote.js", &FakeHost)
            .unwrap();
        assert_eq!(*exports.borrow(), json!("loaded over the wire"));
    }
}
