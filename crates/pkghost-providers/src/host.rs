//! The host registry.
//!
//! [`PackageHost`] discovers plugin units, loads each into its own
//! [`IsolationContext`], and publishes every provider they manufacture in a
//! case-insensitive name → [`Provider`] directory.
//!
//! Initialization is one-shot. It is guarded by an atomic fast-path flag
//! plus an async mutex, so concurrent callers share a single discovery pass.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::binder::{CapabilityBinder, panic_message};
use crate::context::{ContextTable, IsolationContext};
use crate::error::{HostError, HostResult};
use crate::provider::Provider;
use crate::router::CapabilityRouter;
use crate::session::DEFAULT_QUEUE_CAPACITY;
use crate::unit::{HostEnvironment, ManifestUnitLoader, UnitCatalog, UnitLoader, UnitLocator};

type EnvironmentSource = Arc<dyn Fn() -> HostResult<HostEnvironment> + Send + Sync>;

/// Worker pool sizing and queue bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOptions {
    /// Units loaded concurrently during discovery.
    pub worker_threads: usize,
    /// Queue bound for every provider streaming call.
    pub queue_capacity: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(4, usize::from),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Everything needed to take one locator to a list of providers. Cloned
/// into each discovery worker.
#[derive(Clone)]
struct UnitPipeline {
    binder: Arc<CapabilityBinder>,
    loader: Arc<dyn UnitLoader>,
    contexts: Arc<ContextTable>,
    queue_capacity: usize,
}

impl UnitPipeline {
    fn load(
        &self,
        raw: &str,
        env: &HostEnvironment,
        router: &CapabilityRouter,
    ) -> HostResult<Vec<Provider>> {
        let path = UnitLocator::parse(raw)?.resolve(env)?;
        if !self.contexts.reserve(&path) {
            return Err(HostError::AlreadyLoaded(path));
        }

        let unit = match self.loader.load(&path) {
            Ok(unit) => unit,
            Err(e) => {
                self.contexts.release(&path);
                return Err(e);
            },
        };

        let context = Arc::new(IsolationContext::new(unit));
        let populated = catch_unwind(AssertUnwindSafe(|| {
            context.populate(&self.binder, router, self.queue_capacity)
        }));
        let providers = match populated {
            Ok(providers) => providers,
            Err(payload) => {
                self.contexts.release(&path);
                context.unload();
                return Err(HostError::LoadFailed {
                    unit: path,
                    message: format!("panicked while populating: {}", panic_message(payload.as_ref())),
                });
            },
        };
        debug!(unit = %path.display(), context = %context.id(), "Isolation context registered");
        self.contexts.commit(&path, context);
        Ok(providers)
    }
}

/// Discovers, isolates and publishes package providers.
pub struct PackageHost {
    pipeline: UnitPipeline,
    directory: RwLock<HashMap<String, Provider>>,
    environment: EnvironmentSource,
    resolved_env: OnceLock<HostEnvironment>,
    options: HostOptions,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl PackageHost {
    /// Start configuring a host.
    #[must_use]
    pub fn builder() -> PackageHostBuilder {
        PackageHostBuilder::default()
    }

    /// A host with the default manifest loader over `catalog`.
    #[must_use]
    pub fn new(catalog: UnitCatalog) -> Self {
        Self::builder().catalog(catalog).build()
    }

    /// Discover and load every unit in `locators`. Runs at most once.
    ///
    /// Returns `false` only if the host environment cannot be resolved, in
    /// which case nothing is loaded and a later call may try again. Failures
    /// of individual units are reported through the router and do not
    /// affect the result.
    pub async fn initialize(&self, router: &CapabilityRouter, locators: &[String]) -> bool {
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }

        let env = match self.environment() {
            Ok(env) => env,
            Err(e) => {
                error!(error = %e, "Host precondition failed; no units loaded");
                router.error(&format!("Package host cannot start: {e}"));
                return false;
            },
        };

        info!(units = locators.len(), workers = self.options.worker_threads, "Discovering provider units");
        self.discover(router, &env, locators).await;
        self.initialized.store(true, Ordering::Release);
        info!(providers = self.provider_count(), "Package host initialized");
        true
    }

    /// Whether [`initialize`](Self::initialize) has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn discover(&self, router: &CapabilityRouter, env: &HostEnvironment, locators: &[String]) {
        let workers = self.options.worker_threads.max(1);
        let mut results = futures::stream::iter(locators.iter().cloned())
            .map(|locator| {
                let pipeline = self.pipeline.clone();
                let env = env.clone();
                let router = router.clone();
                async move {
                    let task_locator = locator.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        pipeline.load(&task_locator, &env, &router)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(HostError::LoadFailed {
                            unit: PathBuf::from(&locator),
                            message: format!("loader task failed: {e}"),
                        })
                    });
                    (locator, outcome)
                }
            })
            .buffer_unordered(workers);

        while let Some((locator, outcome)) = results.next().await {
            self.absorb(&locator, outcome, router);
        }
    }

    fn absorb(&self, locator: &str, outcome: HostResult<Vec<Provider>>, router: &CapabilityRouter) {
        match outcome {
            Ok(providers) => {
                for provider in providers {
                    self.publish(provider);
                }
            },
            Err(HostError::AlreadyLoaded(path)) => {
                debug!(locator, unit = %path.display(), "Unit already loaded; skipping");
            },
            Err(e) => {
                warn!(locator, error = %e, "Failed to load provider unit");
                router.warning(&format!("Failed to load unit '{locator}': {e}"));
            },
        }
    }

    fn environment(&self) -> HostResult<HostEnvironment> {
        if let Some(env) = self.resolved_env.get() {
            return Ok(env.clone());
        }
        let env = (self.environment)()?;
        Ok(self.resolved_env.get_or_init(|| env).clone())
    }

    fn publish(&self, provider: Provider) {
        let name = provider.name().to_owned();
        if name.is_empty() {
            return;
        }
        let Ok(mut directory) = self.directory.write() else {
            return;
        };
        match directory.insert(name.to_ascii_lowercase(), provider.clone()) {
            Some(previous) if !previous.same_instance(&provider) => {
                warn!(
                    provider = %name,
                    replaced = %previous.origin(),
                    by = %provider.origin(),
                    "Provider name collision; the later registration wins"
                );
            },
            _ => info!(provider = %name, origin = %provider.origin(), "Provider published"),
        }
    }

    /// Publish a directly hosted provider. Its name and features are
    /// fetched here, on the caller's thread.
    ///
    /// # Errors
    ///
    /// [`HostError::Registration`] if the provider cannot report a name or
    /// its initializer fails.
    pub fn register_provider(&self, provider: Provider, router: &CapabilityRouter) -> HostResult<()> {
        let provider = provider.with_queue_capacity(self.options.queue_capacity);
        provider.try_name()?;
        provider.initialize(router)?;
        provider.features(router);
        self.publish(provider);
        Ok(())
    }

    /// Load one more unit and publish its providers.
    ///
    /// # Errors
    ///
    /// Any locator, manifest or load error. Errors inside plugins are
    /// reported through the router instead and yield fewer providers.
    pub fn try_load_unit(&self, locator: &str, router: &CapabilityRouter) -> HostResult<Vec<Provider>> {
        let env = self.environment()?;
        let providers = self.pipeline.load(locator, &env, router)?;
        for provider in &providers {
            self.publish(provider.clone());
        }
        Ok(providers)
    }

    /// Like [`try_load_unit`](Self::try_load_unit), reporting failures
    /// through the router and returning an empty list.
    pub fn load_unit(&self, locator: &str, router: &CapabilityRouter) -> Vec<Provider> {
        match self.try_load_unit(locator, router) {
            Ok(providers) => providers,
            Err(e) => {
                self.absorb(locator, Err(e), router);
                Vec::new()
            },
        }
    }

    /// Tear down the unit behind `locator` and withdraw its providers.
    ///
    /// Returns `false` if no loaded unit matches.
    pub fn unload_unit(&self, locator: &str) -> bool {
        let path = match self
            .environment()
            .and_then(|env| UnitLocator::parse(locator)?.resolve(&env))
        {
            Ok(path) => path,
            Err(e) => {
                debug!(locator, error = %e, "Cannot resolve unit to unload");
                return false;
            },
        };
        let Some(context) = self.pipeline.contexts.remove(&path) else {
            return false;
        };
        context.unload();
        self.withdraw_dead();
        true
    }

    /// Unload every unit. Directly hosted providers stay published.
    pub fn shutdown(&self) {
        let contexts = self.pipeline.contexts.drain();
        for context in &contexts {
            context.unload();
        }
        self.withdraw_dead();
        info!(units = contexts.len(), "Package host shut down");
    }

    fn withdraw_dead(&self) {
        if let Ok(mut directory) = self.directory.write() {
            directory.retain(|name, provider| {
                let alive = provider.is_alive();
                if !alive {
                    debug!(provider = %name, "Withdrawing provider of unloaded unit");
                }
                alive
            });
        }
    }

    /// Every published provider, sorted by name.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        let mut all: Vec<Provider> = self
            .directory
            .read()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by_key(|p| p.name().to_ascii_lowercase());
        all
    }

    /// Look up one provider by name (case-insensitive).
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Provider> {
        self.directory
            .read()
            .ok()?
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Providers matching an optional name. Source names are accepted for
    /// providers to filter on themselves and are not used here.
    #[must_use]
    pub fn select_providers(&self, name: Option<&str>, _source_names: &[String]) -> Vec<Provider> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => self.provider(name).into_iter().collect(),
            None => self.providers(),
        }
    }

    /// Number of published providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.directory.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Number of loaded units.
    #[must_use]
    pub fn loaded_units(&self) -> usize {
        self.pipeline.contexts.loaded()
    }

    /// Host options in effect.
    #[must_use]
    pub fn options(&self) -> HostOptions {
        self.options
    }
}

impl fmt::Debug for PackageHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageHost")
            .field("initialized", &self.is_initialized())
            .field("providers", &self.provider_count())
            .field("units", &self.loaded_units())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PackageHost`].
#[derive(Default)]
pub struct PackageHostBuilder {
    loader: Option<Arc<dyn UnitLoader>>,
    environment: Option<EnvironmentSource>,
    options: HostOptions,
}

impl PackageHostBuilder {
    /// Use a custom unit loader.
    #[must_use]
    pub fn loader(mut self, loader: impl UnitLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Use the manifest loader over `catalog`.
    #[must_use]
    pub fn catalog(self, catalog: UnitCatalog) -> Self {
        self.loader(ManifestUnitLoader::new(catalog))
    }

    /// Resolve bare unit names against fixed directories.
    #[must_use]
    pub fn environment(mut self, env: HostEnvironment) -> Self {
        self.environment = Some(Arc::new(move || Ok(env.clone())));
        self
    }

    /// Resolve the host environment lazily at initialization.
    #[must_use]
    pub fn environment_with<F>(mut self, source: F) -> Self
    where
        F: Fn() -> HostResult<HostEnvironment> + Send + Sync + 'static,
    {
        self.environment = Some(Arc::new(source));
        self
    }

    /// Units loaded concurrently during discovery.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.options.worker_threads = n.max(1);
        self
    }

    /// Queue bound for streaming calls.
    #[must_use]
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.options.queue_capacity = n.max(1);
        self
    }

    /// Finish the host.
    #[must_use]
    pub fn build(self) -> PackageHost {
        let loader: Arc<dyn UnitLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(ManifestUnitLoader::default()),
        };
        let environment: EnvironmentSource = match self.environment {
            Some(source) => source,
            None => Arc::new(HostEnvironment::detect),
        };
        PackageHost {
            pipeline: UnitPipeline {
                binder: Arc::new(CapabilityBinder::new()),
                loader,
                contexts: Arc::new(ContextTable::default()),
                queue_capacity: self.options.queue_capacity,
            },
            directory: RwLock::new(HashMap::new()),
            environment,
            resolved_env: OnceLock::new(),
            options: self.options,
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::ExportedType;
    use crate::testing::{RecordingRouter, StubProvider, scripted_plugin};
    use std::path::Path;

    fn write_unit(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    fn host_in(dir: &Path) -> PackageHost {
        let catalog = UnitCatalog::new()
            .with("zip", ExportedType::from_fn(|| scripted_plugin("t.ZipPlugin", "zip", &["Zip"])))
            .with("tar", ExportedType::from_fn(|| scripted_plugin("t.TarPlugin", "tar", &["Tar"])));
        PackageHost::builder()
            .catalog(catalog)
            .environment(HostEnvironment::new(dir, dir))
            .worker_threads(2)
            .build()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_precondition_loads_nothing_and_can_retry() {
        let recorder = RecordingRouter::new();
        let host = PackageHost::builder()
            .environment_with(|| Err(HostError::Precondition("no host dir".into())))
            .build();
        assert!(!host.initialize(&recorder.router(), &["zip".into()]).await);
        assert!(!host.is_initialized());
        assert_eq!(recorder.errors().len(), 1);
        assert_eq!(host.loaded_units(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_locators_load_the_unit_once() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "zip.toml", "[unit]\nname = \"zip\"\n[[exports]]\ntype = \"builtin:zip\"\n");
        let host = host_in(dir.path());
        let recorder = RecordingRouter::new();
        let locators = vec!["zip".to_owned(), "./zip.toml".to_owned()];
        assert!(host.initialize(&recorder.router(), &locators).await);
        assert_eq!(host.loaded_units(), 1);
        assert_eq!(host.provider_count(), 1);
        assert!(recorder.warnings().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn later_registration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let router = CapabilityRouter::empty();
        host.register_provider(Provider::native(StubProvider::new("Zip")), &router)
            .unwrap();
        let second = Provider::native(StubProvider::new("ZIP").with_packages(&["foo"]));
        host.register_provider(second.clone(), &router).unwrap();
        assert_eq!(host.provider_count(), 1);
        assert!(host.provider("zip").unwrap().same_instance(&second));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unload_withdraws_providers() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "zip.toml", "[unit]\nname = \"zip\"\n[[exports]]\ntype = \"builtin:zip\"\n");
        write_unit(dir.path(), "tar.toml", "[unit]\nname = \"tar\"\n[[exports]]\ntype = \"builtin:tar\"\n");
        let host = host_in(dir.path());
        let router = CapabilityRouter::empty();
        assert!(host.initialize(&router, &["zip".into(), "tar".into()]).await);
        let zip = host.provider("Zip").unwrap();

        assert!(host.unload_unit("zip"));
        assert!(!zip.is_alive());
        assert!(host.provider("zip").is_none());
        assert!(host.provider("tar").is_some());
        assert!(!host.unload_unit("zip"));

        assert_eq!(host.load_unit("zip", &router).len(), 1);
        assert!(host.provider("zip").unwrap().is_alive());

        host.shutdown();
        assert_eq!(host.provider_count(), 0);
        assert_eq!(host.loaded_units(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn selection_is_case_insensitive_and_ignores_sources() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let router = CapabilityRouter::empty();
        host.register_provider(Provider::native(StubProvider::new("Beta")), &router).unwrap();
        host.register_provider(Provider::native(StubProvider::new("alpha")), &router).unwrap();

        let names: Vec<_> = host.providers().iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, ["alpha", "Beta"]);
        assert_eq!(host.select_providers(Some("BETA"), &["anything".into()]).len(), 1);
        assert_eq!(host.select_providers(None, &[]).len(), 2);
        assert!(host.select_providers(Some("gamma"), &[]).is_empty());
    }

    #[test]
    fn panic_while_populating_frees_the_unit_for_another_load() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), "empty.toml", "[unit]\nname = \"empty\"\n");
        let host = host_in(dir.path());
        let reported = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let exploding = CapabilityRouter::builder()
            .with_text_sink(crate::router::capability::WARNING, move |text| {
                assert!(!text.contains("exports no provider plugins"), "warning sink exploded");
                sink.lock().unwrap().push(text.to_owned());
            })
            .build();

        assert!(host.load_unit("empty", &exploding).is_empty());
        assert_eq!(host.loaded_units(), 0);
        let reported = reported.lock().unwrap().clone();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("panicked while populating"));

        assert!(host.load_unit("empty", &CapabilityRouter::empty()).is_empty());
        assert_eq!(host.loaded_units(), 1);
    }

    #[test]
    fn load_unit_failure_is_reported_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let recorder = RecordingRouter::new();
        assert!(host.load_unit("zip, Version=1.0", &recorder.router()).is_empty());
        assert_eq!(recorder.warnings().len(), 1);
    }
}
