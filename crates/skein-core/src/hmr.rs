//! Hot-module-replacement protocol.
//!
//! One persistent server-to-client channel per connected client carries
//! `{"type":"watch","changes":[[url, action], ...]}` messages built from
//! coalesced watch events; changes with no derivable public URL are
//! filtered before send. [`apply_watch_message`] is the Rust rendition of
//! the client handling (the JavaScript twin lives in [`crate::client`]):
//! flag every affected instance for refresh first, re-fetch each one, then
//! fire a single post-update callback for the whole batch.

use crate::project::Project;
use crate::runtime::{Runtime, RuntimeError};
use crate::watch::{ChangeKind, WatchEvent, WatchTarget};
use serde::{Deserialize, Serialize};

/// The wire message pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub changes: Vec<(Option<String>, ChangeKind)>,
}

impl WatchMessage {
    #[must_use]
    pub fn new(changes: Vec<(Option<String>, ChangeKind)>) -> Self {
        Self {
            kind: "watch".to_string(),
            changes,
        }
    }
}

/// Build the broadcast message for a coalesced watch event.
///
/// Paths map through the locator codec; targets with no derivable public
/// URL are dropped rather than sent as nulls.
#[must_use]
pub fn watch_message(project: &Project, event: &WatchEvent) -> WatchMessage {
    let mut changes: Vec<(Option<String>, ChangeKind)> = event
        .changes
        .iter()
        .filter_map(|(target, kind)| {
            let url = match target {
                WatchTarget::Locator(locator) => Some(locator.url.clone()),
                WatchTarget::Path(path) => {
                    project.locator_from_path(path, &[]).map(|l| l.url)
                }
            };
            url.map(|url| (Some(url), *kind))
        })
        .collect();

    changes.sort();
    WatchMessage::new(changes)
}

/// Re-fetch seam for [`apply_watch_message`]: retrieves a module's current
/// code and re-registers its factory on the runtime.
pub trait Refetcher {
    fn refetch(&self, runtime: &Runtime, url: &str) -> Result<(), RuntimeError>;
}

/// Apply a watch message to a runtime registry.
///
/// For each changed URL known to the registry, the fan-out set is its
/// virtual `instances` (or the URL itself). All affected instances are
/// flagged for refresh **before** any re-fetch begins, so a shared
/// dependency required transitively mid-batch is treated as stale rather
/// than served from its old cached export. The post-update callback fires
/// exactly once for the whole batch.
pub fn apply_watch_message(
    runtime: &Runtime,
    message: &WatchMessage,
    refetcher: &dyn Refetcher,
    on_refresh: impl FnOnce(),
) -> Result<(), RuntimeError> {
    let mut pending: Vec<String> = Vec::new();

    for (url, _action) in &message.changes {
        let Some(url) = url else {
            continue;
        };

        if !runtime.is_defined(url) {
            continue;
        }

        for instance in runtime.instances(url) {
            runtime.mark_refresh(&instance);
            pending.push(instance);
        }
    }

    for instance in &pending {
        refetcher.refetch(runtime, instance)?;
    }

    on_refresh();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::{LocatorKind, ModuleLocator};
    use crate::runtime::Factory;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn value_factory(value: serde_json::Value) -> Factory {
        Rc::new(move |_, ctx| {
            *ctx.exports.borrow_mut() = value.clone();
            Ok(())
        })
    }

    #[test]
    fn test_watch_message_wire_shape() {
        let message = WatchMessage::new(vec![(
            Some("/_dev/file/app/src/a.js".to_string()),
            ChangeKind::Changed,
        )]);

        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"type":"watch","changes":[["/_dev/file/app/src/a.js","changed"]]}"#
        );
    }

    #[test]
    fn test_watch_message_filters_unmappable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());

        let mut changes = HashMap::new();
        changes.insert(
            WatchTarget::Path(dir.path().join("src/a.js")),
            ChangeKind::Changed,
        );
        changes.insert(
            WatchTarget::Path("/outside/the/project.js".into()),
            ChangeKind::Removed,
        );

        let message = watch_message(&project, &WatchEvent { changes });
        assert_eq!(message.changes.len(), 1);
        assert_eq!(
            message.changes[0].0.as_deref(),
            Some("/_dev/file/app/src/a.js")
        );
    }

    #[test]
    fn test_watch_message_passes_locator_targets_through() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());

        let locator = ModuleLocator::new(
            LocatorKind::Synthetic,
            "css/app/styles".to_string(),
            vec![],
        );
        let mut changes = HashMap::new();
        changes.insert(WatchTarget::Locator(locator.clone()), ChangeKind::Added);

        let message = watch_message(&project, &WatchEvent { changes });
        assert_eq!(message.changes, vec![(Some(locator.url), ChangeKind::Added)]);
    }

    #[test]
    fn test_hmr_fanout_refetches_instances_and_fires_once() {
        let runtime = Runtime::new();
        let virtual_a = "/_dev/file/app/pkg/__virtual__/abc123/1/mod.js";
        let virtual_b = "/_dev/file/app/pkg/__virtual__/def456/1/mod.js";
        runtime.define(virtual_a, value_factory(json!("a")));
        runtime.define(virtual_b, value_factory(json!("b")));

        struct RecordingRefetcher {
            refetched: RefCell<Vec<String>>,
        }
        impl Refetcher for RecordingRefetcher {
            fn refetch(&self, runtime: &Runtime, url: &str) -> Result<(), RuntimeError> {
                // By the time any re-fetch runs, every instance is already
                // flagged stale.
                assert!(runtime.is_refresh_pending(
                    "/_dev/file/app/pkg/__virtual__/abc123/1/mod.js"
                ));
                assert!(runtime.is_refresh_pending(
                    "/_dev/file/app/pkg/__virtual__/def456/1/mod.js"
                ));
                self.refetched.borrow_mut().push(url.to_string());
                Ok(())
            }
        }

        let refetcher = RecordingRefetcher {
            refetched: RefCell::new(Vec::new()),
        };

        // One physical-file change fans out to both virtual instances.
        let message = WatchMessage::new(vec![(
            Some("/_dev/file/app/mod.js".to_string()),
            ChangeKind::Changed,
        )]);

        let mut refresh_count = 0;
        apply_watch_message(&runtime, &message, &refetcher, || {
            refresh_count += 1;
        })
        .unwrap();

        assert_eq!(
            *refetcher.refetched.borrow(),
            vec![virtual_a.to_string(), virtual_b.to_string()]
        );
        assert_eq!(refresh_count, 1);
    }

    #[test]
    fn test_unknown_urls_are_ignored() {
        let runtime = Runtime::new();
        let message = WatchMessage::new(vec![(
            Some("/_dev/file/app/never-loaded.js".to_string()),
            ChangeKind::Changed,
        )]);

        struct PanickingRefetcher;
        impl Refetcher for PanickingRefetcher {
            fn refetch(&self, _: &Runtime, url: &str) -> Result<(), RuntimeError> {
                panic!("should not refetch {url}");
            }
        }

        let mut refresh_count = 0;
        apply_watch_message(&runtime, &message, &PanickingRefetcher, || {
            refresh_count += 1;
        })
        .unwrap();
        assert_eq!(refresh_count, 1);
    }
}
