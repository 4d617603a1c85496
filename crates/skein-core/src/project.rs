//! Project state: namespace roots, plugin hooks, and memo caches.
//!
//! One logical project per process. All caches live behind plain mutexes and
//! are read/written from cooperative async control flow; entries are
//! invalidated surgically by the watch coordinator, never cleared wholesale.

use crate::config::Config;
use crate::fetch::FetchHook;
use crate::locator::{LocatorKind, ModuleLocator, Param};
use crate::resolve::{ResolveHook, ResolveOutcome, ResolutionKind};
use crate::transform::TransformOutcome;
use crate::vpath;
use crate::watch::WatchCoordinator;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Key for the resolution memo: (request, issuer url or empty, kind).
pub(crate) type ResolutionKey = (String, String, ResolutionKind);

/// A memoized outcome plus the files whose change invalidates it.
#[derive(Debug, Clone)]
pub(crate) struct CachedEntry<T> {
    pub outcome: T,
    pub watch_paths: Vec<PathBuf>,
}

/// Memo caches shared between the project and the watch coordinator.
#[derive(Default)]
pub(crate) struct ModuleCaches {
    pub resolutions: Mutex<HashMap<ResolutionKey, CachedEntry<ResolveOutcome>>>,
    pub transforms: Mutex<HashMap<String, CachedEntry<TransformOutcome>>>,
    /// Synthesized module sources, keyed by their own locator URL.
    pub synthetic: Mutex<HashMap<String, CachedEntry<String>>>,
}

impl ModuleCaches {
    /// Drop every memo entry that consulted `path` (or anything under it).
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let affected = |watch_paths: &[PathBuf]| {
            watch_paths
                .iter()
                .any(|dep| path == dep || path.starts_with(dep))
        };

        let mut removed = 0;

        {
            let mut resolutions = self.resolutions.lock().unwrap();
            let before = resolutions.len();
            resolutions.retain(|_, entry| !affected(&entry.watch_paths));
            removed += before - resolutions.len();
        }

        {
            let mut transforms = self.transforms.lock().unwrap();
            let before = transforms.len();
            transforms.retain(|_, entry| !affected(&entry.watch_paths));
            removed += before - transforms.len();
        }

        {
            let mut synthetic = self.synthetic.lock().unwrap();
            let before = synthetic.len();
            synthetic.retain(|_, entry| !affected(&entry.watch_paths));
            removed += before - synthetic.len();
        }

        removed
    }
}

/// A skein project: one source tree plus its namespace-mapped package roots.
pub struct Project {
    pub root: PathBuf,
    pub config: Config,

    ns_to_path: HashMap<String, PathBuf>,
    /// Namespace roots ordered longest-path-first for ancestor lookup.
    path_to_ns: Vec<(PathBuf, String)>,

    pub(crate) on_resolve: Vec<ResolveHook>,
    pub(crate) on_fetch: Vec<FetchHook>,

    pub(crate) caches: Arc<ModuleCaches>,
    watch: WatchCoordinator,
}

impl Project {
    /// Create a project rooted at `root`, registered as the `app` namespace.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        let caches = Arc::new(ModuleCaches::default());

        let mut project = Self {
            root: root.to_path_buf(),
            config: Config::default(),
            ns_to_path: HashMap::new(),
            path_to_ns: Vec::new(),
            on_resolve: Vec::new(),
            on_fetch: Vec::new(),
            caches: Arc::clone(&caches),
            watch: WatchCoordinator::new(root.to_path_buf(), caches),
        };

        project.register_ns("app", root);
        crate::dynamic::register(&mut project);
        project
    }

    /// Register a namespace root addressable inside specifiers.
    pub fn register_ns(&mut self, ns: impl AsRef<str>, path: &Path) {
        self.ns_to_path
            .insert(ns.as_ref().to_string(), path.to_path_buf());

        self.path_to_ns
            .push((path.to_path_buf(), ns.as_ref().to_string()));
        self.path_to_ns
            .sort_by_key(|(p, _)| std::cmp::Reverse(p.as_os_str().len()));
    }

    /// Register a resolve interception hook. Hooks run in registration
    /// order; the first whose pattern matches and whose callback returns a
    /// result wins.
    pub fn on_resolve(&mut self, hook: ResolveHook) {
        self.on_resolve.push(hook);
    }

    /// Register a fetch interception hook.
    pub fn on_fetch(&mut self, hook: FetchHook) {
        self.on_fetch.push(hook);
    }

    /// Root directory of a registered namespace.
    ///
    /// # Panics
    /// Asserts that the namespace was registered.
    #[must_use]
    pub fn ns_root(&self, ns: &str) -> &Path {
        self.ns_to_path
            .get(ns)
            .unwrap_or_else(|| panic!("Assertion failed: Unknown namespace ({ns})"))
    }

    /// Turn a specifier into a locator, when it denotes one directly:
    /// locator URLs parse as-is, absolute paths (optionally carrying a
    /// query) map through the namespace table.
    #[must_use]
    pub fn locator(&self, specifier: &str) -> Option<ModuleLocator> {
        if specifier.starts_with("/_dev/") || specifier.contains(':') {
            return ModuleLocator::from_url(specifier);
        }

        if specifier.starts_with('/') {
            let (pathname, query) = match specifier.split_once('?') {
                Some((p, qs)) => (p, qs),
                None => (specifier, ""),
            };

            let params = crate::locator::parse_query(query);
            return self.locator_from_path(Path::new(pathname), &params);
        }

        None
    }

    /// Map a physical path under one of the registered namespaces to its
    /// file locator. Bijective within a namespace root.
    #[must_use]
    pub fn locator_from_path(&self, path: &Path, params: &[Param]) -> Option<ModuleLocator> {
        self.ns_qualified_from_path(path).map(|specifier| {
            ModuleLocator::new(LocatorKind::File, specifier, params.to_vec())
        })
    }

    /// Physical path for a file locator; `None` for synthetic/external.
    ///
    /// The returned path still carries any virtual segments; collapse with
    /// [`vpath::resolve_virtual`] before touching the filesystem.
    #[must_use]
    pub fn path_from_locator(&self, locator: &ModuleLocator) -> Option<PathBuf> {
        match locator.kind {
            LocatorKind::File => Some(self.path_from_ns_qualified(&locator.specifier)),
            _ => None,
        }
    }

    /// Physical path for a file locator with virtual segments collapsed.
    #[must_use]
    pub fn physical_path(&self, locator: &ModuleLocator) -> Option<PathBuf> {
        self.path_from_locator(locator)
            .map(|p| PathBuf::from(vpath::resolve_virtual(&p.to_string_lossy())))
    }

    /// Namespace-qualify a path: `<ns>/<path relative to the ns root>`,
    /// picking the longest matching namespace root.
    #[must_use]
    pub fn ns_qualified_from_path(&self, path: &Path) -> Option<String> {
        self.path_to_ns.iter().find_map(|(base, ns)| {
            path.strip_prefix(base).ok().map(|rel| {
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                format!("{ns}/{rel}")
            })
        })
    }

    /// Inverse of [`Self::ns_qualified_from_path`].
    ///
    /// # Panics
    /// Asserts that the specifier carries a registered namespace prefix.
    #[must_use]
    pub fn path_from_ns_qualified(&self, specifier: &str) -> PathBuf {
        let (ns, rest) = specifier
            .split_once('/')
            .unwrap_or_else(|| panic!("Assertion failed: Unqualified specifier ({specifier})"));

        self.ns_root(ns).join(rest)
    }

    /// Directory of the closest `package.json` above the locator's file.
    #[must_use]
    pub fn package_dir_from_locator(&self, locator: &ModuleLocator) -> Option<PathBuf> {
        let path = self.physical_path(locator)?;
        let mut current = path.parent()?.to_path_buf();

        loop {
            if current.join("package.json").is_file() {
                return Some(current);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Access the watch coordinator.
    #[must_use]
    pub fn watcher(&self) -> &WatchCoordinator {
        &self.watch
    }

    pub(crate) fn cached_resolution(&self, key: &ResolutionKey) -> Option<ResolveOutcome> {
        self.caches
            .resolutions
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| entry.outcome.clone())
    }

    pub(crate) fn store_resolution(&self, key: ResolutionKey, outcome: &ResolveOutcome) {
        self.caches.resolutions.lock().unwrap().insert(
            key,
            CachedEntry {
                outcome: outcome.clone(),
                watch_paths: outcome.dependencies.clone(),
            },
        );
    }

    pub(crate) fn cached_transform(&self, url: &str) -> Option<TransformOutcome> {
        self.caches
            .transforms
            .lock()
            .unwrap()
            .get(url)
            .map(|entry| entry.outcome.clone())
    }

    pub(crate) fn store_transform(
        &self,
        url: String,
        outcome: &TransformOutcome,
        watch_paths: Vec<PathBuf>,
    ) {
        self.caches.transforms.lock().unwrap().insert(
            url,
            CachedEntry {
                outcome: outcome.clone(),
                watch_paths,
            },
        );
    }
}
