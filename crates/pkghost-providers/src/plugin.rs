//! Plugins: factories of providers.
//!
//! A plugin is any candidate that satisfies [`PLUGIN_CONTRACT`]. It is
//! initialized with the host router, asked for the names of the providers
//! it can build, and then asked to build each one. Every manufactured
//! candidate is certified against the provider contract before it is
//! handed back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::binder::{BoundAdapter, CapabilityBinder};
use crate::candidate::Candidate;
use crate::context::Liveness;
use crate::contract::{PLUGIN_CONTRACT, PROVIDER_CONTRACT, PluginOp};
use crate::error::{CallError, CallResult};
use crate::provider::{Provider, ProviderOrigin};
use crate::router::CapabilityRouter;
use crate::value::{Dynamic, ValueKind};

/// The plugin contract, typed.
pub trait ProviderPlugin: Send + Sync {
    /// The plugin's name.
    ///
    /// # Errors
    ///
    /// Any failure makes the plugin unusable.
    fn name(&self) -> CallResult<String>;

    /// One-time setup before providers are requested.
    ///
    /// # Errors
    ///
    /// A failure skips the whole plugin.
    fn initialize(&self, _router: &CapabilityRouter) -> CallResult<()> {
        Ok(())
    }

    /// Names of the providers this plugin can build.
    ///
    /// # Errors
    ///
    /// Plugin-defined.
    fn provider_names(&self) -> CallResult<Vec<String>>;

    /// Build one provider candidate.
    ///
    /// # Errors
    ///
    /// Plugin-defined.
    fn create_provider(&self, name: &str) -> CallResult<Arc<dyn Candidate>>;

    /// Release resources. Called when the owning unit is unloaded.
    ///
    /// # Errors
    ///
    /// Plugin-defined; reported and otherwise ignored.
    fn dispose(&self) -> CallResult<()> {
        Ok(())
    }
}

/// [`ProviderPlugin`] over a structurally bound candidate.
#[derive(Debug, Clone)]
pub struct BoundPlugin {
    adapter: BoundAdapter,
}

impl BoundPlugin {
    /// Wrap an adapter. Returns `None` if it was bound to another contract.
    #[must_use]
    pub fn new(adapter: BoundAdapter) -> Option<Self> {
        (adapter.contract() == &PLUGIN_CONTRACT).then_some(Self { adapter })
    }

    fn bad_return(op: PluginOp, expected: ValueKind) -> CallError {
        CallError::BadReturn {
            member: PLUGIN_CONTRACT.members[op.index()].name.to_owned(),
            expected,
        }
    }
}

impl ProviderPlugin for BoundPlugin {
    fn name(&self) -> CallResult<String> {
        self.adapter
            .call(PluginOp::GetName.index(), Vec::new())?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Self::bad_return(PluginOp::GetName, ValueKind::Str))
    }

    fn initialize(&self, router: &CapabilityRouter) -> CallResult<()> {
        self.adapter.call_action(
            PluginOp::Initialize.index(),
            vec![Dynamic::Router(router.clone())],
        )
    }

    fn provider_names(&self) -> CallResult<Vec<String>> {
        self.adapter
            .call(PluginOp::GetProviderNames.index(), Vec::new())?
            .to_string_list()
            .ok_or_else(|| Self::bad_return(PluginOp::GetProviderNames, ValueKind::List))
    }

    fn create_provider(&self, name: &str) -> CallResult<Arc<dyn Candidate>> {
        self.adapter
            .call(PluginOp::CreateProvider.index(), vec![Dynamic::from(name)])?
            .into_object()
            .ok_or_else(|| Self::bad_return(PluginOp::CreateProvider, ValueKind::Object))
    }

    fn dispose(&self) -> CallResult<()> {
        self.adapter
            .call_action(PluginOp::Dispose.index(), Vec::new())
    }
}

/// A named plugin plus the providers it manufactured.
pub struct Plugin {
    name: String,
    unit: PathBuf,
    backend: Arc<dyn ProviderPlugin>,
    providers: RwLock<Vec<Provider>>,
}

impl Plugin {
    /// Wrap a plugin backend, resolving its name.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the name cannot be read.
    pub fn new(backend: Arc<dyn ProviderPlugin>, unit: &Path) -> CallResult<Self> {
        let name = backend.name()?;
        Ok(Self {
            name,
            unit: unit.to_path_buf(),
            backend,
            providers: RwLock::new(Vec::new()),
        })
    }

    /// Bind a candidate to the plugin contract.
    ///
    /// Returns `None` (with a diagnostic) if it does not bind or its name
    /// cannot be read.
    #[must_use]
    pub fn bind(binder: &CapabilityBinder, candidate: Arc<dyn Candidate>, unit: &Path) -> Option<Self> {
        let type_name = candidate.shape().type_name().to_owned();
        let adapter = binder.bind(&PLUGIN_CONTRACT, candidate)?;
        let bound = BoundPlugin::new(adapter)?;
        match Self::new(Arc::new(bound), unit) {
            Ok(plugin) => Some(plugin),
            Err(e) => {
                warn!(unit = %unit.display(), type_name = %type_name, error = %e, "Plugin name could not be read");
                None
            },
        }
    }

    /// The plugin's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the plugin's initializer.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn initialize(&self, router: &CapabilityRouter) -> CallResult<()> {
        self.backend.initialize(router)
    }

    /// Build and certify every provider the plugin declares.
    ///
    /// A provider that fails to build, bind, name itself or initialize is
    /// dropped with a diagnostic; the rest are returned and retained.
    pub fn manufacture(
        &self,
        binder: &CapabilityBinder,
        router: &CapabilityRouter,
        liveness: &Liveness,
        queue_capacity: usize,
    ) -> Vec<Provider> {
        let names = match self.backend.provider_names() {
            Ok(names) => names,
            Err(e) => {
                warn!(plugin = %self.name, error = %e, "Could not list plugin providers");
                router.warning(&format!("Plugin '{}' could not list its providers: {e}", self.name));
                return Vec::new();
            },
        };

        let mut built = Vec::with_capacity(names.len());
        for declared in names {
            match self.manufacture_one(binder, router, liveness, &declared) {
                Ok(provider) => {
                    let provider = provider.with_queue_capacity(queue_capacity);
                    info!(plugin = %self.name, provider = %provider.name(), "Provider created");
                    built.push(provider);
                },
                Err(e) => {
                    warn!(plugin = %self.name, provider = %declared, error = %e, "Discarding provider");
                    router.verbose(&format!(
                        "Plugin '{}' could not create provider '{declared}': {e}",
                        self.name
                    ));
                },
            }
        }

        if let Ok(mut held) = self.providers.write() {
            held.extend(built.iter().cloned());
        }
        built
    }

    fn manufacture_one(
        &self,
        binder: &CapabilityBinder,
        router: &CapabilityRouter,
        liveness: &Liveness,
        declared: &str,
    ) -> CallResult<Provider> {
        let candidate = self.backend.create_provider(declared)?;
        let type_name = candidate.shape().type_name().to_owned();
        let adapter = binder
            .bind(&PROVIDER_CONTRACT, candidate)
            .ok_or_else(|| {
                CallError::failed(format!("{type_name} does not implement the provider contract"))
            })?;
        let origin = ProviderOrigin::Unit {
            unit: self.unit.clone(),
            plugin: self.name.clone(),
        };
        let provider = Provider::from_adapter(adapter, origin, liveness.clone())
            .ok_or_else(|| CallError::failed("adapter bound to the wrong contract"))?;

        let actual = provider.try_name()?;
        if !actual.eq_ignore_ascii_case(declared) {
            debug!(
                plugin = %self.name,
                declared,
                actual,
                "Provider reports a different name than declared; using its own"
            );
        }
        provider.initialize(router)?;
        Ok(provider)
    }

    /// Providers manufactured so far.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        self.providers.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Run the plugin's disposer and forget its providers.
    pub fn dispose(&self) {
        if let Err(e) = self.backend.dispose() {
            warn!(plugin = %self.name, error = %e, "Plugin dispose failed");
        }
        if let Ok(mut held) = self.providers.write() {
            held.clear();
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("providers", &self.providers().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::DynamicObject;
    use crate::testing::{RecordingRouter, scripted_plugin};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn unit() -> PathBuf {
        PathBuf::from("/units/test.toml")
    }

    #[test]
    fn manufactures_every_declared_provider() {
        let binder = CapabilityBinder::new();
        let plugin = Plugin::bind(
            &binder,
            Arc::new(scripted_plugin("t.Plugin", "archive", &["Zip", "Tar"])),
            &unit(),
        )
        .unwrap();
        assert_eq!(plugin.name(), "archive");

        let providers = plugin.manufacture(&binder, &CapabilityRouter::empty(), &Liveness::new(), 8);
        let names: Vec<_> = providers.iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, ["Zip", "Tar"]);
        assert_eq!(plugin.providers().len(), 2);
        assert!(matches!(
            providers[0].origin(),
            ProviderOrigin::Unit { plugin, .. } if plugin == "archive"
        ));
    }

    #[test]
    fn uncertifiable_providers_are_discarded() {
        let binder = CapabilityBinder::new();
        let obj = DynamicObject::builder("t.Mixed")
            .method("GetPluginName", &[], ValueKind::Str, |_| Ok(Dynamic::from("mixed")))
            .method("GetProviderNames", &[], ValueKind::List, |_| {
                Ok(Dynamic::from(vec!["Good".to_owned(), "Shapeless".to_owned(), "Broken".to_owned()]))
            })
            .method("CreateProvider", &[ValueKind::Str], ValueKind::Object, |args| {
                match args.first().and_then(Dynamic::as_str) {
                    Some("Good") => Ok(Dynamic::Object(Arc::new(
                        crate::testing::scripted_provider("t.Good", "Good"),
                    ))),
                    Some("Shapeless") => Ok(Dynamic::Object(Arc::new(
                        DynamicObject::builder("t.Shapeless").build(),
                    ))),
                    _ => Err(CallError::failed("cannot build")),
                }
            })
            .build();
        let plugin = Plugin::bind(&binder, Arc::new(obj), &unit()).unwrap();
        let recorder = RecordingRouter::new();
        let providers = plugin.manufacture(&binder, &recorder.router(), &Liveness::new(), 8);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "Good");
    }

    #[test]
    fn non_plugins_do_not_bind() {
        let binder = CapabilityBinder::new();
        let obj = crate::testing::scripted_provider("t.JustAProvider", "Zip");
        assert!(Plugin::bind(&binder, Arc::new(obj), &unit()).is_none());
    }

    #[test]
    fn dispose_reaches_the_backend() {
        let disposed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&disposed);
        let binder = CapabilityBinder::new();
        let obj = DynamicObject::builder("t.Disposable")
            .method("GetPluginName", &[], ValueKind::Str, |_| Ok(Dynamic::from("d")))
            .method("GetProviderNames", &[], ValueKind::List, |_| Ok(Dynamic::null()))
            .method("CreateProvider", &[ValueKind::Str], ValueKind::Object, |_| {
                Err(CallError::failed("none"))
            })
            .method("Dispose", &[], ValueKind::Unit, move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(Dynamic::null())
            })
            .build();
        let plugin = Plugin::bind(&binder, Arc::new(obj), &unit()).unwrap();
        assert!(plugin.manufacture(&binder, &CapabilityRouter::empty(), &Liveness::new(), 8).is_empty());
        plugin.dispose();
        assert!(disposed.load(Ordering::SeqCst));
    }
}
