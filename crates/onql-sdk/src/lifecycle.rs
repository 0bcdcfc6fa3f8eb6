//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Module lifecycle hook registry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Lifecycle hooks let a module react to being installed, activated,
//! uninstalled or deleted.
//!
//! `Install` and `Active` are fired by [`crate::Sdk::initialize`]. `Uninstall`
//! and `Delete` are driven by whatever manages module lifecycles, through
//! [`crate::Sdk::fire`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Lifecycle transitions a module can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Install,
    Uninstall,
    Delete,
    Active,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Install => "install",
            LifecycleEvent::Uninstall => "uninstall",
            LifecycleEvent::Delete => "delete",
            LifecycleEvent::Active => "active",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-argument lifecycle callback.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct HookTable {
    install: Option<Hook>,
    uninstall: Option<Hook>,
    delete: Option<Hook>,
    active: Option<Hook>,
}

impl HookTable {
    fn slot(&mut self, event: LifecycleEvent) -> &mut Option<Hook> {
        match event {
            LifecycleEvent::Install => &mut self.install,
            LifecycleEvent::Uninstall => &mut self.uninstall,
            LifecycleEvent::Delete => &mut self.delete,
            LifecycleEvent::Active => &mut self.active,
        }
    }

    fn get(&self, event: LifecycleEvent) -> Option<Hook> {
        match event {
            LifecycleEvent::Install => self.install.clone(),
            LifecycleEvent::Uninstall => self.uninstall.clone(),
            LifecycleEvent::Delete => self.delete.clone(),
            LifecycleEvent::Active => self.active.clone(),
        }
    }
}

/// Thread-safe hook storage. Hooks run outside the lock, so a hook may
/// register or replace hooks itself.
#[derive(Default)]
pub struct LifecycleHooks {
    table: RwLock<HookTable>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `event`, replacing any previous one.
    pub fn set<F>(&self, event: LifecycleEvent, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.table.write().slot(event) = Some(Arc::new(hook));
    }

    /// Remove the hook registered for `event`.
    pub fn clear(&self, event: LifecycleEvent) {
        *self.table.write().slot(event) = None;
    }

    pub fn is_registered(&self, event: LifecycleEvent) -> bool {
        self.table.read().get(event).is_some()
    }

    /// Run the hook for `event`. Returns whether one was registered.
    /// A panicking hook propagates to the caller.
    pub fn fire(&self, event: LifecycleEvent) -> bool {
        let hook = self.table.read().get(event);
        match hook {
            Some(hook) => {
                debug!(%event, "running lifecycle hook");
                hook();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fire_reports_missing_hooks() {
        let hooks = LifecycleHooks::new();
        assert!(!hooks.fire(LifecycleEvent::Delete));

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        hooks.set(LifecycleEvent::Delete, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(hooks.is_registered(LifecycleEvent::Delete));
        assert!(hooks.fire(LifecycleEvent::Delete));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        hooks.clear(LifecycleEvent::Delete);
        assert!(!hooks.fire(LifecycleEvent::Delete));
    }

    #[test]
    fn hooks_may_reregister_from_inside_a_hook() {
        let hooks = Arc::new(LifecycleHooks::new());
        let inner = hooks.clone();
        hooks.set(LifecycleEvent::Install, move || {
            inner.set(LifecycleEvent::Active, || {});
        });
        assert!(hooks.fire(LifecycleEvent::Install));
        assert!(hooks.is_registered(LifecycleEvent::Active));
    }

    #[test]
    fn concurrent_setters_and_fires_do_not_corrupt_slots() {
        let hooks = LifecycleHooks::new();
        let fired = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        hooks.set(LifecycleEvent::Active, || {});
                        hooks.set(LifecycleEvent::Uninstall, || {});
                    }
                });
                scope.spawn(|| {
                    for _ in 0..500 {
                        if hooks.fire(LifecycleEvent::Active) {
                            fired.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert!(hooks.is_registered(LifecycleEvent::Active));
        assert!(hooks.is_registered(LifecycleEvent::Uninstall));
        assert!(!hooks.is_registered(LifecycleEvent::Install));
        assert!(fired.load(Ordering::Relaxed) <= 2000);
    }

    #[test]
    fn event_names() {
        assert_eq!(LifecycleEvent::Uninstall.to_string(), "uninstall");
        assert_eq!(LifecycleEvent::Active.as_str(), "active");
    }
}
