//
// addon.rs
//
// Add-ons enabled by configuration and notified of workspace events
//

use std::path::Path;

use tower_lsp::lsp_types::{FileChangeType, FileEvent, MessageType};

use crate::error::AddonError;
use crate::message::Outbox;

/// What an add-on can reach while it runs.
pub struct AddonContext<'a> {
    pub workspace_root: Option<&'a Path>,
    pub outbox: &'a Outbox,
}

/// An extension built into the server and switched on by name.
pub trait Addon: Send {
    fn name(&self) -> &str;

    /// Returns a message describing why the add-on cannot run.
    fn activate(&mut self, context: &AddonContext<'_>) -> Result<(), String>;

    fn deactivate(&mut self) {}

    fn workspace_did_change_watched_files(&mut self, _changes: &[FileEvent], _context: &AddonContext<'_>) {}
}

/// Add-on for every name the server knows how to build.
pub fn known_addon(name: &str) -> Option<Box<dyn Addon>> {
    match name {
        BundleWatch::NAME => Some(Box::new(BundleWatch::default())),
        _ => None,
    }
}

// ============================================================================
// bundle_watch
// ============================================================================

/// Asks the user to restart when the bundle changes on disk.
#[derive(Default)]
pub struct BundleWatch {
    active: bool,
}

impl BundleWatch {
    pub const NAME: &'static str = "bundle_watch";
}

impl Addon for BundleWatch {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn activate(&mut self, context: &AddonContext<'_>) -> Result<(), String> {
        if context.workspace_root.is_none() {
            return Err("no workspace folder is open".to_string());
        }
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn workspace_did_change_watched_files(&mut self, changes: &[FileEvent], context: &AddonContext<'_>) {
        if !self.active {
            return;
        }
        let lockfile_changed = changes.iter().any(|change| {
            change.typ != FileChangeType::DELETED && change.uri.path().ends_with("/Gemfile.lock")
        });
        if lockfile_changed {
            context.outbox.show_message(
                MessageType::WARNING,
                "Gemfile.lock changed. Restart the Ruby language server to load the new dependencies.",
            );
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

struct AddonSlot {
    addon: Box<dyn Addon>,
    active: bool,
    errors: Vec<AddonError>,
}

/// Enabled add-ons with their activation state and recorded errors.
#[derive(Default)]
pub struct AddonRegistry {
    slots: Vec<AddonSlot>,
    /// Configured names with no matching add-on
    unknown: Vec<AddonError>,
}

impl AddonRegistry {
    /// Build the add-ons named in the configuration, in order.
    pub fn load(enabled: &[String]) -> Self {
        let mut registry = Self::default();
        for name in enabled {
            match known_addon(name) {
                Some(addon) => registry.register(addon),
                None => {
                    log::warn!("Unknown add-on '{}' in enabledAddons", name);
                    registry.unknown.push(AddonError::Unknown(name.clone()));
                }
            }
        }
        registry
    }

    pub fn register(&mut self, addon: Box<dyn Addon>) {
        self.slots.push(AddonSlot {
            addon,
            active: false,
            errors: Vec::new(),
        });
    }

    /// Activate every inactive add-on. Failures are recorded on the add-on
    /// and returned; the other add-ons still activate.
    pub fn activate_all(&mut self, context: &AddonContext<'_>) -> Vec<AddonError> {
        let mut failures = self.unknown.clone();
        for slot in self.slots.iter_mut().filter(|slot| !slot.active) {
            match slot.addon.activate(context) {
                Ok(()) => {
                    log::info!("Activated add-on {}", slot.addon.name());
                    slot.active = true;
                }
                Err(message) => {
                    let error = AddonError::Activation {
                        name: slot.addon.name().to_string(),
                        message,
                    };
                    log::warn!("{}", error);
                    slot.errors.push(error.clone());
                    failures.push(error);
                }
            }
        }
        failures
    }

    pub fn deactivate_all(&mut self) {
        for slot in self.slots.iter_mut().filter(|slot| slot.active) {
            slot.addon.deactivate();
            slot.active = false;
        }
    }

    pub fn file_events(&mut self, changes: &[FileEvent], context: &AddonContext<'_>) {
        for slot in self.slots.iter_mut().filter(|slot| slot.active) {
            slot.addon.workspace_did_change_watched_files(changes, context);
        }
    }

    /// Every error recorded so far, unknown names first.
    pub fn errors(&self) -> Vec<AddonError> {
        self.unknown
            .iter()
            .cloned()
            .chain(self.slots.iter().flat_map(|slot| slot.errors.iter().cloned()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.addon.name()).collect()
    }

    pub fn active_names(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| slot.addon.name())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tokio::sync::mpsc;
    use tower_lsp::lsp_types::Url;

    struct Broken;

    impl Addon for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn activate(&mut self, _context: &AddonContext<'_>) -> Result<(), String> {
            Err("missing dependency".to_string())
        }
    }

    fn event(path: &str, typ: FileChangeType) -> FileEvent {
        FileEvent::new(Url::parse(&format!("file:///workspace/{}", path)).unwrap(), typ)
    }

    #[test]
    fn test_load_records_unknown_names() {
        let registry = AddonRegistry::load(&["bundle_watch".to_string(), "nope".to_string()]);
        assert_eq!(registry.names(), vec!["bundle_watch"]);
        assert_eq!(registry.errors(), vec![AddonError::Unknown("nope".to_string())]);
    }

    #[test]
    fn test_failed_activation_is_recorded_not_fatal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        let mut registry = AddonRegistry::load(&["bundle_watch".to_string()]);
        registry.register(Box::new(Broken));

        let root = Path::new("/workspace");
        let context = AddonContext {
            workspace_root: Some(root),
            outbox: &outbox,
        };
        let failures = registry.activate_all(&context);
        assert_eq!(failures.len(), 1);
        assert_eq!(registry.active_names(), vec!["bundle_watch"]);
        assert!(matches!(&registry.errors()[0], AddonError::Activation { name, .. } if name == "broken"));

        registry.deactivate_all();
        assert!(registry.active_names().is_empty());
    }

    #[test]
    fn test_bundle_watch_warns_on_lockfile_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        let mut registry = AddonRegistry::load(&["bundle_watch".to_string()]);
        let root = Path::new("/workspace");
        let context = AddonContext {
            workspace_root: Some(root),
            outbox: &outbox,
        };
        registry.activate_all(&context);

        registry.file_events(&[event("lib/a.rb", FileChangeType::CHANGED)], &context);
        assert!(rx.try_recv().is_err());

        registry.file_events(&[event("Gemfile.lock", FileChangeType::CHANGED)], &context);
        match rx.try_recv().unwrap() {
            Message::Notification { method, .. } => assert_eq!(method, "window/showMessage"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_bundle_watch_needs_a_workspace() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        let mut registry = AddonRegistry::load(&["bundle_watch".to_string()]);
        let context = AddonContext {
            workspace_root: None,
            outbox: &outbox,
        };
        assert_eq!(registry.activate_all(&context).len(), 1);
        assert!(registry.active_names().is_empty());
    }
}
