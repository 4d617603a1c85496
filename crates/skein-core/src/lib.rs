#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core engine for skein: an incremental module-resolution, bundling, and
//! hot-reload engine for a local development server.
//!
//! The pieces, leaf-first: locator codec ([`locator`], [`vpath`]),
//! resolution engine with pluggable hooks ([`resolve`]), dynamic
//! bracket-pattern synthesizer ([`dynamic`]), graph builder and bundler
//! over an external transform seam ([`graph`], [`bundle`], [`transform`]),
//! watch-based invalidation ([`watch`]), and the module runtime with its
//! HMR protocol ([`runtime`], [`client`], [`hmr`]).

pub mod bundle;
pub mod client;
pub mod config;
pub mod css;
pub mod dynamic;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod hmr;
pub mod locator;
pub mod project;
pub mod resolve;
pub mod routes;
pub mod runtime;
pub mod scan;
pub mod serve;
pub mod transform;
pub mod vpath;
pub mod watch;

pub use bundle::{bundle, BundleOptions, BundleOutput};
pub use config::Config;
pub use css::{CssCompiler, CssOutput, CssPipeline, CssWorker};
pub use error::{Diagnostic, Error, ModuleError};
pub use fetch::{fetch, FetchArgs, FetchData, FetchHook, FetchOutcome};
pub use graph::{batch, BatchModule, BatchOptions, BatchResult};
pub use hmr::{apply_watch_message, watch_message, WatchMessage};
pub use locator::{LocatorKind, ModuleLocator, Param};
pub use project::Project;
pub use resolve::{
    resolve, Resolution, ResolutionKind, ResolveArgs, ResolveHook, ResolveOpts, ResolveOutcome,
};
pub use routes::{parse_file_pattern, serialize_to_radix, RoutePattern, RouteSegment};
pub use runtime::{Runtime, RuntimeError, ScriptHost};
pub use serve::{serve_bundle, serve_module, ModuleResponse};
pub use transform::{transform, DevTransformer, TransformArgs, TransformEngine, TransformOutcome};
pub use watch::{ChangeKind, WatchEvent, WatchSubscription, WatchTarget};
