//! The host-side provider handle.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::binder::{BoundAdapter, panic_message};
use crate::context::Liveness;
use crate::error::{CallError, CallResult};
use crate::records::{
    FEATURE_FILE_EXTENSIONS, FEATURE_MAGIC_SIGNATURES, FEATURE_URI_SCHEMES, Feature, FeatureSet, OptionCategory,
    OptionDefinition, PackageRecord, PackageStatus, SourceRecord,
};
use crate::router::CapabilityRouter;
use crate::session::{
    CallOptions, DEFAULT_QUEUE_CAPACITY, SessionState, StreamSession, spawn_stream,
};
use crate::value::YieldFn;

use super::{BoundProvider, FindRequest, PackageProvider};

/// Where a provider came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOrigin {
    /// Registered directly with the host.
    Native,
    /// Manufactured by a plugin inside a loaded unit.
    Unit {
        /// Canonical path of the unit.
        unit: PathBuf,
        /// Name of the plugin that manufactured it.
        plugin: String,
    },
}

impl fmt::Display for ProviderOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Unit { unit, plugin } => write!(f, "{} ({plugin})", unit.display()),
        }
    }
}

struct ProviderInner {
    backend: Arc<dyn PackageProvider>,
    name: OnceLock<String>,
    features: OnceLock<FeatureSet>,
    origin: ProviderOrigin,
    liveness: Liveness,
}

/// A named package provider as published by the host. Cheap to clone.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
    queue_capacity: usize,
}

impl Provider {
    /// Wrap a backend.
    #[must_use]
    pub fn new(
        backend: Arc<dyn PackageProvider>,
        origin: ProviderOrigin,
        liveness: Liveness,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                backend,
                name: OnceLock::new(),
                features: OnceLock::new(),
                origin,
                liveness,
            }),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Wrap a natively implemented provider.
    #[must_use]
    pub fn native(backend: impl PackageProvider + 'static) -> Self {
        Self::new(Arc::new(backend), ProviderOrigin::Native, Liveness::new())
    }

    /// Wrap a candidate certified against the provider contract.
    ///
    /// Returns `None` if the adapter was bound to a different contract.
    #[must_use]
    pub fn from_adapter(
        adapter: BoundAdapter,
        origin: ProviderOrigin,
        liveness: Liveness,
    ) -> Option<Self> {
        let bound = BoundProvider::new(adapter)?;
        Some(Self::new(Arc::new(bound), origin, liveness))
    }

    /// Set the queue bound used by this handle's streaming calls.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Resolve (once) and return the provider's name.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the name could not be read. A failed
    /// read is not cached.
    pub fn try_name(&self) -> CallResult<&str> {
        if let Some(name) = self.inner.name.get() {
            return Ok(name);
        }
        let resolved = guarded("GetPackageProviderName", || self.inner.backend.name())?;
        if resolved.trim().is_empty() {
            return Err(CallError::failed("provider reported an empty name"));
        }
        Ok(self.inner.name.get_or_init(|| resolved))
    }

    /// The provider's name, or an empty string if it cannot be resolved.
    #[must_use]
    pub fn name(&self) -> &str {
        self.try_name().unwrap_or_default()
    }

    /// The provider's version, if it reports one.
    #[must_use]
    pub fn version(&self) -> Option<String> {
        match guarded("GetProviderVersion", || self.inner.backend.version()) {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) | Err(CallError::Unsupported(_)) => None,
            Err(e) => {
                debug!(provider = %self.name(), error = %e, "Version query failed");
                None
            },
        }
    }

    /// Where this provider came from.
    #[must_use]
    pub fn origin(&self) -> &ProviderOrigin {
        &self.inner.origin
    }

    /// Whether the unit behind this provider is still loaded.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.liveness.is_alive()
    }

    /// Whether two handles wrap the same provider instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the provider's one-time initializer.
    ///
    /// # Errors
    ///
    /// Returns the backend's error, or [`CallError::Unloaded`].
    pub fn initialize(&self, router: &CapabilityRouter) -> CallResult<()> {
        self.ensure_alive()?;
        guarded("InitializeProvider", || self.inner.backend.initialize(router))
    }

    // -----------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------

    /// Declared features. Fetched on first use and cached.
    pub fn features(&self, router: &CapabilityRouter) -> &FeatureSet {
        self.inner.features.get_or_init(|| {
            let collected = Arc::new(Mutex::new(FeatureSet::default()));
            let sink = Arc::clone(&collected);
            let out: YieldFn = Arc::new(move |tuple| {
                match (Feature::from_tuple(&tuple), sink.lock()) {
                    (Some(feature), Ok(mut set)) => set.add(feature),
                    (None, _) => warn!(tuple = ?tuple, "Skipping malformed feature tuple"),
                    (Some(_), Err(_)) => return false,
                }
                true
            });
            let result = if self.is_alive() {
                guarded("GetFeatures", || self.inner.backend.features(out, router))
            } else {
                Err(CallError::Unloaded)
            };
            if let Err(e) = result
                && !e.is_unsupported()
            {
                debug!(provider = %self.name(), error = %e, "Feature query failed");
            }
            collected
                .lock()
                .map(|set| set.clone())
                .unwrap_or_default()
        })
    }

    /// Whether [`Self::features`] has already been fetched.
    #[must_use]
    pub fn has_cached_features(&self) -> bool {
        self.inner.features.get().is_some()
    }

    /// URI schemes the provider declared.
    #[must_use]
    pub fn supported_uri_schemes(&self, router: &CapabilityRouter) -> Vec<String> {
        self.features(router).values(FEATURE_URI_SCHEMES).to_vec()
    }

    /// File extensions the provider declared.
    #[must_use]
    pub fn supported_file_extensions(&self, router: &CapabilityRouter) -> Vec<String> {
        self.features(router).values(FEATURE_FILE_EXTENSIONS).to_vec()
    }

    /// Whether the provider declared support for this file's extension.
    #[must_use]
    pub fn is_supported_file(&self, file: &str, router: &CapabilityRouter) -> bool {
        let lower = file.to_ascii_lowercase();
        self.features(router)
            .values(FEATURE_FILE_EXTENSIONS)
            .iter()
            .any(|ext| {
                let ext = ext.to_ascii_lowercase();
                let ext = ext.trim_start_matches('.');
                lower
                    .rsplit_once('.')
                    .is_some_and(|(_, actual)| actual == ext)
            })
    }

    /// Leading byte signatures the provider declared. Values that are not
    /// valid hex are ignored.
    #[must_use]
    pub fn supported_magic_signatures(&self, router: &CapabilityRouter) -> Vec<Vec<u8>> {
        self.features(router)
            .values(FEATURE_MAGIC_SIGNATURES)
            .iter()
            .filter_map(|sig| match hex::decode(sig.trim()) {
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => None,
                Err(e) => {
                    debug!(provider = %self.name(), signature = %sig, error = %e, "Ignoring malformed magic signature");
                    None
                },
            })
            .collect()
    }

    /// Whether `header`, the first bytes of a file, starts with one of the
    /// provider's declared magic signatures.
    #[must_use]
    pub fn is_supported_content(&self, header: &[u8], router: &CapabilityRouter) -> bool {
        self.supported_magic_signatures(router)
            .iter()
            .any(|sig| header.starts_with(sig))
    }

    /// Whether the provider declared support for this URI's scheme.
    #[must_use]
    pub fn is_supported_uri(&self, uri: &str, router: &CapabilityRouter) -> bool {
        let Some((scheme, _)) = uri.split_once(':') else {
            return false;
        };
        self.features(router)
            .values(FEATURE_URI_SCHEMES)
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    // -----------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------

    /// Whether `location` is usable as a source. Absent or failing: `false`.
    #[must_use]
    pub fn is_valid_package_source(&self, location: &str, router: &CapabilityRouter) -> bool {
        self.query_flag("IsValidPackageSource", router, |b, r| {
            b.is_valid_package_source(location, r)
        })
    }

    /// Whether `location` is trusted. Absent or failing: `false`.
    #[must_use]
    pub fn is_trusted_package_source(&self, location: &str, router: &CapabilityRouter) -> bool {
        self.query_flag("IsTrustedPackageSource", router, |b, r| {
            b.is_trusted_package_source(location, r)
        })
    }

    /// Stream the provider's sources.
    #[must_use]
    pub fn package_sources(&self, router: &CapabilityRouter) -> StreamSession<SourceRecord> {
        self.stream(
            "ResolvePackageSources",
            router,
            CallOptions::default(),
            source_mapper(self.name()),
            |backend, out, r| backend.resolve_package_sources(out, &r),
        )
    }

    /// Register a source, streaming the resulting source record.
    #[must_use]
    pub fn add_package_source(
        &self,
        name: &str,
        location: &str,
        trusted: bool,
        router: &CapabilityRouter,
    ) -> StreamSession<SourceRecord> {
        let (name, location) = (name.to_owned(), location.to_owned());
        self.stream(
            "AddPackageSource",
            router,
            CallOptions::default(),
            source_mapper(self.name()),
            move |backend, out, r| backend.add_package_source(&name, &location, trusted, out, &r),
        )
    }

    /// Unregister a source, streaming the removed source record.
    #[must_use]
    pub fn remove_package_source(
        &self,
        name: &str,
        router: &CapabilityRouter,
    ) -> StreamSession<SourceRecord> {
        let name = name.to_owned();
        self.stream(
            "RemovePackageSource",
            router,
            CallOptions::default(),
            source_mapper(self.name()),
            move |backend, out, r| backend.remove_package_source(&name, out, &r),
        )
    }

    /// Stream the provider's option definitions for one category.
    #[must_use]
    pub fn dynamic_options(
        &self,
        category: OptionCategory,
        router: &CapabilityRouter,
    ) -> StreamSession<OptionDefinition> {
        let provider = self.name().to_owned();
        self.stream(
            "GetDynamicOptions",
            router,
            CallOptions::default(),
            move |tuple| OptionDefinition::from_tuple(&provider, category, tuple),
            move |backend, out, r| backend.dynamic_options(category, out, &r),
        )
    }

    // -----------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------

    /// Stream packages matching the request.
    #[must_use]
    pub fn find_package(
        &self,
        request: &FindRequest,
        router: &CapabilityRouter,
    ) -> StreamSession<PackageRecord> {
        let request = request.clone();
        self.stream(
            "FindPackage",
            router,
            CallOptions::default(),
            package_mapper(self.name(), PackageStatus::Available),
            move |backend, out, r| backend.find_package(&request, out, &r),
        )
    }

    /// Stream packages describing a local file.
    #[must_use]
    pub fn find_package_by_file(
        &self,
        file: &str,
        router: &CapabilityRouter,
    ) -> StreamSession<PackageRecord> {
        let file = file.to_owned();
        self.stream(
            "FindPackageByFile",
            router,
            CallOptions::default(),
            package_mapper(self.name(), PackageStatus::Available),
            move |backend, out, r| backend.find_package_by_file(&file, out, &r),
        )
    }

    /// Stream packages describing a URI.
    #[must_use]
    pub fn find_package_by_uri(
        &self,
        uri: &str,
        router: &CapabilityRouter,
    ) -> StreamSession<PackageRecord> {
        let uri = uri.to_owned();
        self.stream(
            "FindPackageByUri",
            router,
            CallOptions::default(),
            package_mapper(self.name(), PackageStatus::Available),
            move |backend, out, r| backend.find_package_by_uri(&uri, out, &r),
        )
    }

    /// Stream installed packages, optionally filtered by name.
    #[must_use]
    pub fn installed_packages(
        &self,
        name: &str,
        router: &CapabilityRouter,
    ) -> StreamSession<PackageRecord> {
        let name = name.to_owned();
        self.stream(
            "GetInstalledPackages",
            router,
            CallOptions::default(),
            package_mapper(self.name(), PackageStatus::Installed),
            move |backend, out, r| backend.installed_packages(&name, out, &r),
        )
    }

    /// Install a package previously returned by a find.
    ///
    /// Packages from a source the provider does not trust need the
    /// router's `ShouldContinueWithUntrustedPackageSource` consent; without
    /// it the session comes back empty and cancelled and the provider is
    /// never asked to install.
    #[must_use]
    pub fn install_package(
        &self,
        package: &PackageRecord,
        router: &CapabilityRouter,
    ) -> StreamSession<PackageRecord> {
        if !self.is_alive() {
            return self.unloaded("InstallPackage", router);
        }
        let source = package.source.clone().unwrap_or_default();
        let reference = package.fast_reference.clone();
        let package_name = package.name.clone();
        let package_version = package.version.clone();
        let provider = self.name().to_owned();
        let options = CallOptions {
            cancel_on_exception: false,
            queue_capacity: self.queue_capacity,
        };
        self.stream(
            "InstallPackage",
            router,
            options,
            package_mapper(self.name(), PackageStatus::Installed),
            move |backend, out, r| {
                let trusted = query(&provider, "IsTrustedPackageSource", || {
                    backend.is_trusted_package_source(&source, &r)
                });
                if !trusted {
                    match r.should_continue_with_untrusted_source(&package_name, &source) {
                        Ok(true) => {
                            debug!(provider = %provider, package = %package_name, source = %source, "Untrusted source accepted");
                        },
                        Ok(false) => {
                            r.warning(&format!(
                                "Cancelled: installing '{package_name}' from untrusted source '{source}' was declined"
                            ));
                            return Err(CallError::Declined(format!("untrusted source '{source}'")));
                        },
                        Err(e) => {
                            warn!(provider = %provider, package = %package_name, error = %e, "Untrusted-source confirmation failed");
                            r.warning(&format!(
                                "Cancelled: confirmation for untrusted source '{source}' failed: {e}"
                            ));
                            return Err(CallError::Declined(format!("confirmation failed: {e}")));
                        },
                    }
                }

                if !r.should_process_package_install(&package_name, &package_version, &source) {
                    r.warning(&format!(
                        "Cancelled: installing '{package_name}' {package_version} was not confirmed"
                    ));
                    return Err(CallError::Declined("install not confirmed".into()));
                }

                if !backend.install_package(&reference, out, &r)? {
                    r.warning(&format!("Install of '{package_name}' did not complete"));
                }
                Ok(())
            },
        )
    }

    /// Uninstall a package previously returned by an installed listing.
    #[must_use]
    pub fn uninstall_package(
        &self,
        package: &PackageRecord,
        router: &CapabilityRouter,
    ) -> StreamSession<PackageRecord> {
        if !self.is_alive() {
            return self.unloaded("UninstallPackage", router);
        }

        let reference = package.fast_reference.clone();
        let package_name = package.name.clone();
        let package_version = package.version.clone();
        self.stream(
            "UninstallPackage",
            router,
            CallOptions::default(),
            package_mapper(self.name(), PackageStatus::NotInstalled),
            move |backend, out, r| {
                if !r.should_process_package_uninstall(&package_name, &package_version) {
                    r.warning(&format!(
                        "Cancelled: uninstalling '{package_name}' {package_version} was not confirmed"
                    ));
                    return Err(CallError::Declined("uninstall not confirmed".into()));
                }
                if !backend.uninstall_package(&reference, out, &r)? {
                    r.warning(&format!("Uninstall of '{package_name}' did not complete"));
                }
                Ok(())
            },
        )
    }

    // -----------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------

    fn ensure_alive(&self) -> CallResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(CallError::Unloaded)
        }
    }

    fn unloaded<T>(&self, operation: &str, router: &CapabilityRouter) -> StreamSession<T> {
        warn!(provider = %self.name(), operation, "Provider belongs to an unloaded unit");
        router.warning(&format!(
            "{operation}: provider '{}' belongs to an unloaded unit",
            self.name()
        ));
        StreamSession::finished(SessionState::Cancelled)
    }

    fn stream<T, M, C>(
        &self,
        operation: &str,
        router: &CapabilityRouter,
        mut options: CallOptions,
        map: M,
        call: C,
    ) -> StreamSession<T>
    where
        T: Send + 'static,
        M: Fn(&[serde_json::Value]) -> Option<T> + Send + Sync + 'static,
        C: FnOnce(&dyn PackageProvider, YieldFn, CapabilityRouter) -> CallResult<()>
            + Send
            + 'static,
    {
        if !self.is_alive() {
            return self.unloaded(operation, router);
        }
        options.queue_capacity = self.queue_capacity;
        let backend = Arc::clone(&self.inner.backend);
        let label = format!("{}::{operation}", self.name());
        spawn_stream(&label, router, options, map, move |out, r| {
            call(backend.as_ref(), out, r)
        })
    }

    fn query_flag<F>(&self, member: &str, router: &CapabilityRouter, f: F) -> bool
    where
        F: FnOnce(&dyn PackageProvider, &CapabilityRouter) -> CallResult<bool>,
    {
        if !self.is_alive() {
            return false;
        }
        query(self.name(), member, || f(self.inner.backend.as_ref(), router))
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.inner.name.get())
            .field("origin", &self.inner.origin)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

fn package_mapper(
    provider: &str,
    status: PackageStatus,
) -> impl Fn(&[serde_json::Value]) -> Option<PackageRecord> + Send + Sync + 'static {
    let provider = provider.to_owned();
    move |tuple| PackageRecord::from_tuple(&provider, status, tuple)
}

fn source_mapper(
    provider: &str,
) -> impl Fn(&[serde_json::Value]) -> Option<SourceRecord> + Send + Sync + 'static {
    let provider = provider.to_owned();
    move |tuple| SourceRecord::from_tuple(&provider, tuple)
}

/// A boolean query where absent or failing reads as `false`.
fn query(provider: &str, member: &str, f: impl FnOnce() -> CallResult<bool>) -> bool {
    match guarded(member, f) {
        Ok(b) => b,
        Err(CallError::Unsupported(_)) => false,
        Err(e) => {
            debug!(provider, member, error = %e, "Provider query failed");
            false
        },
    }
}

/// Native backends are not behind a bound adapter, so panics are caught here
/// as well.
fn guarded<T>(member: &str, f: impl FnOnce() -> CallResult<T>) -> CallResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(CallError::Panicked {
            member: member.to_owned(),
            message: panic_message(payload.as_ref()),
        })
    })
}
