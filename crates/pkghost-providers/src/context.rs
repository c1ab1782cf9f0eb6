//! Isolation contexts.
//!
//! Each loaded unit lives in its own [`IsolationContext`]. The context owns
//! the unit's exports, the plugins built from them and, through them, every
//! provider they manufactured. Unloading a context disposes its plugins and
//! flips a shared [`Liveness`] flag, after which every provider it produced
//! answers with empty sequences.
//!
//! [`ContextTable`] maps unit paths to contexts so no unit is ever loaded
//! into two contexts.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::binder::{CapabilityBinder, panic_message};
use crate::contract::PLUGIN_CONTRACT;
use crate::error::CallError;
use crate::plugin::Plugin;
use crate::provider::Provider;
use crate::router::CapabilityRouter;
use crate::unit::LoadedUnit;

/// Unique identifier of an isolation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared "still loaded" flag handed to every provider of a context.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// A live flag.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Whether the owner is still loaded.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the owner unloaded. Irreversible.
    pub fn invalidate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// An independently lifetime-scoped home for one loaded unit.
pub struct IsolationContext {
    id: ContextId,
    unit: LoadedUnit,
    liveness: Liveness,
    plugins: RwLock<Vec<Arc<Plugin>>>,
}

impl IsolationContext {
    /// Create a context owning `unit`.
    #[must_use]
    pub fn new(unit: LoadedUnit) -> Self {
        Self {
            id: ContextId::new(),
            unit,
            liveness: Liveness::new(),
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// Context id.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The unit this context owns.
    #[must_use]
    pub fn unit(&self) -> &LoadedUnit {
        &self.unit
    }

    /// Whether the context is still loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Build plugins from the unit's exports and collect their providers.
    ///
    /// Exports are type-level checked against the plugin contract first;
    /// only compatible types are instantiated. A plugin whose initializer
    /// fails contributes nothing.
    pub fn populate(
        &self,
        binder: &CapabilityBinder,
        router: &CapabilityRouter,
        queue_capacity: usize,
    ) -> Vec<Provider> {
        let unit_path = self.unit.path.as_path();
        let compatible: Vec<_> = self
            .unit
            .exports
            .iter()
            .filter(|export| binder.is_compatible(&PLUGIN_CONTRACT, export.shape()))
            .collect();

        if compatible.is_empty() {
            warn!(unit = %unit_path.display(), "Unit exports no plugin types");
            router.warning(&format!(
                "Unit '{}' exports no provider plugins",
                self.unit.name
            ));
            return Vec::new();
        }

        let mut providers = Vec::new();
        for export in compatible {
            let type_name = export.shape().type_name();
            let instance = catch_unwind(AssertUnwindSafe(|| export.instantiate())).unwrap_or_else(|payload| {
                Err(CallError::Panicked {
                    member: format!("{type_name}::new"),
                    message: panic_message(payload.as_ref()),
                })
            });
            let candidate = match instance {
                Ok(c) => c,
                Err(e) => {
                    warn!(unit = %unit_path.display(), type_name, error = %e, "Failed to instantiate plugin type");
                    continue;
                },
            };
            let Some(plugin) = Plugin::bind(binder, candidate, unit_path) else {
                debug!(unit = %unit_path.display(), type_name, "Plugin instance did not bind");
                continue;
            };
            if let Err(e) = plugin.initialize(router) {
                warn!(unit = %unit_path.display(), plugin = %plugin.name(), error = %e, "Plugin initialization failed");
                router.warning(&format!(
                    "Plugin '{}' failed to initialize: {e}",
                    plugin.name()
                ));
                continue;
            }
            let manufactured = plugin.manufacture(binder, router, &self.liveness, queue_capacity);
            // Feature lists are cached here, on the loading worker, so later
            // lookups from async callers never call into the provider.
            for provider in &manufactured {
                provider.features(router);
            }
            providers.extend(manufactured);
            if let Ok(mut plugins) = self.plugins.write() {
                plugins.push(Arc::new(plugin));
            }
        }

        info!(
            unit = %unit_path.display(),
            context = %self.id,
            providers = providers.len(),
            "Unit populated"
        );
        providers
    }

    /// Plugins living in this context.
    #[must_use]
    pub fn plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Every provider produced in this context.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        self.plugins().iter().flat_map(|p| p.providers()).collect()
    }

    /// Dispose every plugin and invalidate every provider. Idempotent.
    pub fn unload(&self) {
        if !self.liveness.is_alive() {
            return;
        }
        self.liveness.invalidate();
        let plugins = self
            .plugins
            .write()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default();
        for plugin in &plugins {
            plugin.dispose();
        }
        info!(unit = %self.unit.path.display(), context = %self.id, "Unit unloaded");
    }
}

impl fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationContext")
            .field("id", &self.id)
            .field("unit", &self.unit.path)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

enum Slot {
    Loading,
    Loaded(Arc<IsolationContext>),
}

/// Unit path → context table, guarded by a single mutex.
///
/// A path is reserved before loading starts so concurrent loads of the
/// same unit cannot both proceed.
#[derive(Default)]
pub(crate) struct ContextTable {
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ContextTable {
    /// Claim `path` for loading. `false` if it is loading or loaded.
    pub(crate) fn reserve(&self, path: &Path) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        if slots.contains_key(path) {
            return false;
        }
        slots.insert(path.to_path_buf(), Slot::Loading);
        true
    }

    /// Record the loaded context for a reserved path.
    pub(crate) fn commit(&self, path: &Path, context: Arc<IsolationContext>) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(path.to_path_buf(), Slot::Loaded(context));
        }
    }

    /// Drop a reservation after a failed load.
    pub(crate) fn release(&self, path: &Path) {
        if let Ok(mut slots) = self.slots.lock()
            && matches!(slots.get(path), Some(Slot::Loading))
        {
            slots.remove(path);
        }
    }

    /// Remove and return a loaded context.
    pub(crate) fn remove(&self, path: &Path) -> Option<Arc<IsolationContext>> {
        let mut slots = self.slots.lock().ok()?;
        match slots.get(path) {
            Some(Slot::Loaded(_)) => match slots.remove(path) {
                Some(Slot::Loaded(ctx)) => Some(ctx),
                _ => None,
            },
            _ => None,
        }
    }

    /// Remove and return every loaded context.
    pub(crate) fn drain(&self) -> Vec<Arc<IsolationContext>> {
        let Ok(mut slots) = self.slots.lock() else {
            return Vec::new();
        };
        let loaded: Vec<PathBuf> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Loaded(_)))
            .map(|(path, _)| path.clone())
            .collect();
        loaded
            .into_iter()
            .filter_map(|path| match slots.remove(&path) {
                Some(Slot::Loaded(ctx)) => Some(ctx),
                _ => None,
            })
            .collect()
    }

    /// Number of loaded contexts.
    pub(crate) fn loaded(&self) -> usize {
        self.slots
            .lock()
            .map(|s| s.values().filter(|v| matches!(v, Slot::Loaded(_))).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Candidate, ExportedType};
    use crate::testing::{RecordingRouter, scripted_plugin, scripted_provider};

    fn unit_with(exports: Vec<ExportedType>) -> LoadedUnit {
        LoadedUnit {
            name: "sample".into(),
            version: None,
            path: PathBuf::from("/units/sample.toml"),
            exports,
        }
    }

    #[test]
    fn populate_collects_providers_from_every_plugin() {
        let ctx = IsolationContext::new(unit_with(vec![
            ExportedType::from_fn(|| scripted_plugin("t.A", "a", &["Zip"])),
            ExportedType::from_fn(|| scripted_provider("t.NotAPlugin", "Stray")),
            ExportedType::from_fn(|| scripted_plugin("t.B", "b", &["Tar", "Gz"])),
        ]));
        let providers = ctx.populate(&CapabilityBinder::new(), &CapabilityRouter::empty(), 4);
        let mut names: Vec<_> = providers.iter().map(|p| p.name().to_owned()).collect();
        names.sort();
        assert_eq!(names, ["Gz", "Tar", "Zip"]);
        assert_eq!(ctx.plugins().len(), 2);
        assert_eq!(ctx.providers().len(), 3);
    }

    #[test]
    fn panicking_factory_skips_only_that_type() {
        let shape = scripted_plugin("t.Boom", "boom", &["Boom"]).shape().clone();
        let ctx = IsolationContext::new(unit_with(vec![
            ExportedType::new(shape, || panic!("constructor exploded")),
            ExportedType::from_fn(|| scripted_plugin("t.A", "a", &["Zip"])),
        ]));
        let providers = ctx.populate(&CapabilityBinder::new(), &CapabilityRouter::empty(), 4);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "Zip");
        assert_eq!(ctx.plugins().len(), 1);
    }

    #[test]
    fn populate_caches_features_up_front() {
        let ctx = IsolationContext::new(unit_with(vec![ExportedType::from_fn(|| {
            scripted_plugin("t.A", "a", &["Zip"])
        })]));
        let providers = ctx.populate(&CapabilityBinder::new(), &CapabilityRouter::empty(), 4);
        assert_eq!(providers.len(), 1);
        assert!(providers[0].has_cached_features());
    }

    #[test]
    fn no_plugin_types_means_a_warning_and_nothing_else() {
        let ctx = IsolationContext::new(unit_with(vec![ExportedType::from_fn(|| {
            scripted_provider("t.Lonely", "Lonely")
        })]));
        let recorder = RecordingRouter::new();
        assert!(ctx.populate(&CapabilityBinder::new(), &recorder.router(), 4).is_empty());
        assert_eq!(recorder.warnings().len(), 1);
    }

    #[test]
    fn failing_initializer_skips_the_plugin() {
        use crate::candidate::DynamicObject;
        use crate::error::CallError;
        use crate::value::{Dynamic, ValueKind};

        let ctx = IsolationContext::new(unit_with(vec![ExportedType::from_fn(|| {
            DynamicObject::builder("t.Grumpy")
                .method("GetPluginName", &[], ValueKind::Str, |_| Ok(Dynamic::from("grumpy")))
                .method("GetProviderNames", &[], ValueKind::List, |_| {
                    Ok(Dynamic::from(vec!["Zip".to_owned()]))
                })
                .method("CreateProvider", &[ValueKind::Str], ValueKind::Object, |_| {
                    Ok(Dynamic::Object(Arc::new(scripted_provider("t.Zip", "Zip"))))
                })
                .method("InitializePlugin", &[ValueKind::Router], ValueKind::Unit, |_| {
                    Err(CallError::failed("no config"))
                })
                .build()
        })]));
        let recorder = RecordingRouter::new();
        assert!(ctx.populate(&CapabilityBinder::new(), &recorder.router(), 4).is_empty());
        assert!(recorder.warnings()[0].contains("no config"));
    }

    #[test]
    fn unload_invalidates_providers() {
        let ctx = IsolationContext::new(unit_with(vec![ExportedType::from_fn(|| {
            scripted_plugin("t.C", "c", &["Zip"])
        })]));
        let providers = ctx.populate(&CapabilityBinder::new(), &CapabilityRouter::empty(), 4);
        assert!(providers[0].is_alive());
        ctx.unload();
        assert!(!ctx.is_loaded());
        assert!(!providers[0].is_alive());
        assert!(ctx.plugins().is_empty());
        ctx.unload();
    }

    #[test]
    fn table_refuses_a_second_reservation() {
        let table = ContextTable::default();
        let path = Path::new("/units/a.toml");
        assert!(table.reserve(path));
        assert!(!table.reserve(path));
        table.release(path);
        assert!(table.reserve(path));
        table.commit(path, Arc::new(IsolationContext::new(unit_with(Vec::new()))));
        assert!(!table.reserve(path));
        assert_eq!(table.loaded(), 1);
        assert!(table.remove(path).is_some());
        assert_eq!(table.loaded(), 0);
    }
}
