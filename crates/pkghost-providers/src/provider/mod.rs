//! Package providers.
//!
//! [`PackageProvider`] is the typed face of the package-provider contract.
//! It is implemented by [`BoundProvider`] (a structurally bound candidate
//! from a unit) and may be implemented directly by native Rust providers.
//! Either way the host wraps it in a [`Provider`], which caches metadata,
//! enforces the install trust gate and turns every streaming member into a
//! [`StreamSession`](crate::session::StreamSession).

mod bound;
mod handle;

pub use bound::BoundProvider;
pub use handle::{Provider, ProviderOrigin};

use crate::error::{CallError, CallResult};
use crate::records::OptionCategory;
use crate::router::CapabilityRouter;
use crate::value::YieldFn;

/// Arguments to `FindPackage`. Empty strings mean "unspecified".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindRequest {
    /// Package name; empty or `*` lists everything.
    pub name: String,
    /// Exact version wanted.
    pub required_version: String,
    /// Lowest acceptable version.
    pub minimum_version: String,
    /// Highest acceptable version.
    pub maximum_version: String,
}

impl FindRequest {
    /// Find by name with no version constraint.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Constrain to an exact version.
    #[must_use]
    pub fn with_required_version(mut self, version: impl Into<String>) -> Self {
        self.required_version = version.into();
        self
    }

    /// Constrain to a version range (either bound may be empty).
    #[must_use]
    pub fn with_range(mut self, minimum: impl Into<String>, maximum: impl Into<String>) -> Self {
        self.minimum_version = minimum.into();
        self.maximum_version = maximum.into();
        self
    }
}

/// The package-provider contract.
///
/// Only [`name`](Self::name) is mandatory. Every other member defaults to
/// [`CallError::Unsupported`], which the host reads as "absent": an empty
/// sequence, a no-op or `false`.
///
/// Streaming members push results through `out`, one flat tuple per call,
/// and should stop as soon as `out` returns `false`.
pub trait PackageProvider: Send + Sync {
    /// The provider's name.
    ///
    /// # Errors
    ///
    /// Any failure makes the provider unusable.
    fn name(&self) -> CallResult<String>;

    /// The provider's version.
    ///
    /// # Errors
    ///
    /// `Unsupported` if the provider does not report one.
    fn version(&self) -> CallResult<String> {
        Err(unsupported("GetProviderVersion"))
    }

    /// One-time setup, called before the provider is published.
    ///
    /// # Errors
    ///
    /// A failure keeps the provider from being published.
    fn initialize(&self, _router: &CapabilityRouter) -> CallResult<()> {
        Ok(())
    }

    /// Yield `[featureName, values...]` tuples.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn features(&self, _out: YieldFn, _router: &CapabilityRouter) -> CallResult<()> {
        Err(unsupported("GetFeatures"))
    }

    /// Yield `[name, expectedType, isRequired, permitted...]` tuples.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn dynamic_options(
        &self,
        _category: OptionCategory,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("GetDynamicOptions"))
    }

    /// Register a source; yields the resulting source tuple.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn add_package_source(
        &self,
        _name: &str,
        _location: &str,
        _trusted: bool,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("AddPackageSource"))
    }

    /// Unregister a source; yields the removed source tuple.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn remove_package_source(
        &self,
        _name: &str,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("RemovePackageSource"))
    }

    /// Yield the provider's sources, honouring the router's
    /// `GetPackageSources` filter.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn resolve_package_sources(&self, _out: YieldFn, _router: &CapabilityRouter) -> CallResult<()> {
        Err(unsupported("ResolvePackageSources"))
    }

    /// Whether `location` is something this provider can use as a source.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn is_valid_package_source(
        &self,
        _location: &str,
        _router: &CapabilityRouter,
    ) -> CallResult<bool> {
        Err(unsupported("IsValidPackageSource"))
    }

    /// Whether packages from `location` may be installed without asking.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn is_trusted_package_source(
        &self,
        _location: &str,
        _router: &CapabilityRouter,
    ) -> CallResult<bool> {
        Err(unsupported("IsTrustedPackageSource"))
    }

    /// Yield package tuples matching the request.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn find_package(
        &self,
        _request: &FindRequest,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("FindPackage"))
    }

    /// Yield package tuples describing a local file.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn find_package_by_file(
        &self,
        _file: &str,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("FindPackageByFile"))
    }

    /// Yield package tuples describing a URI.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn find_package_by_uri(
        &self,
        _uri: &str,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("FindPackageByUri"))
    }

    /// Yield installed package tuples, optionally filtered by name.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn installed_packages(
        &self,
        _name: &str,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        Err(unsupported("GetInstalledPackages"))
    }

    /// Install the package behind `fast_reference`, yielding what got
    /// installed. `Ok(false)` means the provider declined.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn install_package(
        &self,
        _fast_reference: &str,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<bool> {
        Err(unsupported("InstallPackage"))
    }

    /// Uninstall the package behind `fast_reference`, yielding what got
    /// removed.
    ///
    /// # Errors
    ///
    /// Provider-defined.
    fn uninstall_package(
        &self,
        _fast_reference: &str,
        _out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<bool> {
        Err(unsupported("UninstallPackage"))
    }
}

fn unsupported(member: &str) -> CallError {
    CallError::Unsupported(member.to_owned())
}
