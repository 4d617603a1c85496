//! Browser-resident runtime sources.
//!
//! The JavaScript twin of [`crate::runtime`], embedded as string constants
//! and served to browsers: the base registry at `/_dev/runtime`, plus the
//! HMR client that listens on the dev server's socket. Semantics mirror the
//! Rust registry — keep the two in sync.

/// Base module runtime. Installs the `$skein$` global that bundles talk to.
pub const BASE_RUNTIME: &str = r#"// skein module runtime. Served as a plain script; installs the $skein$
// global that bundles talk to.
var $skein$ = (() => {
  const modules = new Map();
  const refreshRequests = new Set();
  const meta = {};

  class ModuleFailure extends Error {
    constructor(locator, error) {
      super(`Module failed upstream (${locator})`);
      this.locator = locator;
      this.error = error;
    }
  }

  const NUMBER_REGEXP = /^[0-9]+$/;
  const VIRTUAL_REGEXP = /^(\/(?:[^/]+\/)*?(?:\$\$virtual|__virtual__))((?:\/((?:[^/]+-)?[a-f0-9]+)(?:\/([^/]+))?)?((?:\/.*)?))$/;

  function resolveVirtual(p) {
    p = p.replace(/\?.*/, ``);

    while (true) {
      const match = p.match(VIRTUAL_REGEXP);
      if (!match || (!match[3] && match[5]))
        return p;

      const target = match[1].replace(/\/[^/]+\/*$/, ``);
      if (!match[3] || !match[4])
        return target;

      if (!NUMBER_REGEXP.test(match[4]))
        return p;

      const depth = Number(match[4]);
      const backstep = `../`.repeat(depth);
      const subpath = match[5] || `.`;

      p = new URL(`${target}/${backstep}/${subpath}`, `https://localhost`).pathname.replace(/\/{2,}/g, `/`);
    }
  }

  function upsertSlot(p, factory) {
    const existing = modules.get(p);
    if (existing) {
      existing.factory = factory;
      return existing;
    }

    const slot = {instances: null, factory, module: null};
    modules.set(p, slot);
    return slot;
  }

  function define(p, factory) {
    upsertSlot(p, factory);

    const physical = resolveVirtual(p);
    if (physical !== p && physical.startsWith(`/_dev/`)) {
      const physicalSlot = upsertSlot(physical, () => {
        throw new Error(`Physical paths with virtual instances cannot be directly instantiated`);
      });

      physicalSlot.instances ??= new Set();
      physicalSlot.instances.add(p);
    }
  }

  function defineError(p, error) {
    define(p, () => {
      throw new ModuleFailure(p, error);
    });
  }

  function makeRequireApi(p, moduleMeta) {
    const resolveFn = request => {
      if (request.startsWith(`/_dev/`))
        return request;

      if (!Object.prototype.hasOwnProperty.call(moduleMeta.resolutions, request))
        throw new Error(`Module not found: ${request}`);

      return moduleMeta.resolutions[request];
    };

    const requireFn = request => {
      const resolution = resolveFn(request);

      // A null resolution defers the specifier to the host environment.
      return resolution === null
        ? require(request)
        : api.require(resolution);
    };

    const importFn = request => {
      const resolution = resolveFn(request);

      return resolution === null
        ? import(request)
        : api.require.import(resolution);
    };

    return Object.assign(requireFn, {
      import: importFn,
      resolve: resolveFn,
    });
  }

  function requireModule(p) {
    const slot = modules.get(p);
    if (typeof slot === `undefined`)
      throw new Error(`Module not found: ${p}`);

    const refresh = refreshRequests.delete(p);
    if (slot.module !== null && !refresh)
      return slot.module.exports;

    const module = {id: p, exports: {}, hot: {accept: () => {}}};
    slot.module = module;

    const moduleMeta = Object.prototype.hasOwnProperty.call(meta, p)
      ? meta[p]
      : {error: null, path: null, resolutions: {}};

    const filename = moduleMeta.path;
    const dirname = filename ? filename.replace(/\/[^/]*$/, ``) : null;

    const requireApi = makeRequireApi(p, moduleMeta);

    try {
      api.instantiate(p, () => {
        slot.factory(module, module.exports, requireApi, filename, dirname);
      });
    } catch (error) {
      slot.module = null;
      throw error;
    }

    return module.exports;
  }

  function importModule(p) {
    if (modules.has(p))
      return Promise.resolve().then(() => api.require(p));

    return injectScript(p).then(() => api.require(p));
  }

  function injectScript(url) {
    return new Promise((resolve, reject) => {
      const script = document.createElement(`script`);
      script.src = url;
      script.onload = () => resolve();
      script.onerror = err => reject(err);
      document.head.appendChild(script);
    });
  }

  const api = {
    ModuleFailure,
    modules,
    refreshRequests,
    resolveVirtual,
    injectScript,

    log(msg, ...extra) {
      console.log(msg, ...extra);
    },

    meta(newMeta) {
      Object.assign(meta, newMeta);
    },

    define,
    defineError,

    require: Object.assign(requireModule, {
      resolve: p => p,
      import: importModule,
    }),

    instantiate(p, fn) {
      // Hook point for refresh integrations to track evaluation.
      fn();
    },
  };

  return api;
})();
"#;

/// HMR client, layered on the base runtime.
pub const HMR_CLIENT: &str = r#"// skein HMR client. Connects back to the dev server and live-patches the
// page when watched modules change.
(() => {
  const socket = new WebSocket(`ws://${window.location.host}/_dev/ws`);

  socket.addEventListener(`message`, async e => {
    if (!e.data)
      return;

    const data = JSON.parse(e.data);
    if (data.type !== `watch`)
      return;

    const pending = [];
    for (const [url] of data.changes) {
      if (url === null)
        continue;

      const slot = $skein$.modules.get(url);
      if (typeof slot === `undefined`)
        continue;

      const instances = slot.instances
        ? [...slot.instances]
        : [url];

      for (const instanceUrl of instances) {
        $skein$.log(`refreshing`, {url: instanceUrl});
        $skein$.refreshRequests.add(instanceUrl);
        pending.push(instanceUrl);
      }
    }

    // Every refresh flag is set before any re-fetch begins, so a shared
    // dependency required mid-batch is treated as stale.
    await Promise.all(pending.map(url => $skein$.injectScript(url)));
    $skein$.refresh?.();
  });
})();
"#;

/// The base runtime, for self-contained bundles.
#[must_use]
pub fn runtime_source() -> &'static str {
    BASE_RUNTIME
}

/// Base runtime plus HMR client, as served at `/_dev/runtime` by the dev
/// server.
#[must_use]
pub fn runtime_source_with_hmr() -> String {
    format!("{BASE_RUNTIME}\n{HMR_CLIENT}")
}
