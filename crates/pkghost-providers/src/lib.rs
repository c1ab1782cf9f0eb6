//! pkghost providers - a host for package-provider plugins.
//!
//! This crate provides:
//! - Unit discovery and loading, one isolation context per unit
//! - Structural binding of foreign objects to the provider contracts
//! - A capability router for callbacks from providers to the host
//! - Streaming provider calls exposed as cancellable, bounded sessions
//! - A case-insensitive directory of every loaded provider
//!
//! # Architecture
//!
//! A unit is a manifest exporting plugin types. Each exported type that
//! structurally satisfies the plugin contract is instantiated and asked to
//! manufacture providers, which in turn must satisfy the provider contract.
//! Bound providers are wrapped in a [`Provider`] handle that caches
//! metadata, applies the install trust gate and turns push-style results
//! into [`StreamSession`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use pkghost_providers::prelude::*;
//!
//! # async fn example() {
//! let host = PackageHost::new(UnitCatalog::new());
//! let router = CapabilityRouter::tracing();
//! host.initialize(&router, &["./units/local.toml".to_owned()]).await;
//!
//! for provider in host.providers() {
//!     let found = provider
//!         .find_package(&FindRequest::named("foo"), &router)
//!         .collect_all()
//!         .await;
//!     println!("{}: {} matches", provider.name(), found.len());
//! }
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod binder;
mod candidate;
mod context;
mod contract;
mod error;
mod host;
mod plugin;
mod provider;
mod records;
mod session;
mod value;

pub mod router;
pub mod unit;

#[cfg(test)]
mod testing;

pub use binder::{BoundAdapter, CapabilityBinder};
pub use candidate::{
    Candidate, DynamicObject, DynamicObjectBuilder, ExportedType, MemberDescriptor, MemberKind,
    TypeShape,
};
pub use context::{ContextId, IsolationContext, Liveness};
pub use contract::{Contract, MemberSpec, PLUGIN_CONTRACT, PROVIDER_CONTRACT, PluginOp, ProviderOp};
pub use error::{CallError, CallResult, HostError, HostResult};
pub use host::{HostOptions, PackageHost, PackageHostBuilder};
pub use plugin::{BoundPlugin, Plugin, ProviderPlugin};
pub use provider::{BoundProvider, FindRequest, PackageProvider, Provider, ProviderOrigin};
pub use records::{
    FEATURE_FILE_EXTENSIONS, FEATURE_MAGIC_SIGNATURES, FEATURE_URI_SCHEMES, Feature, FeatureSet,
    OptionCategory, OptionDefinition, PackageRecord, PackageStatus, SourceRecord,
};
pub use router::{CapabilityHandler, CapabilityRouter, CapabilityRouterBuilder, RouterError};
pub use session::{CallOptions, DEFAULT_QUEUE_CAPACITY, SessionState, StreamSession, spawn_stream};
pub use value::{Callable, Dynamic, Signature, ValueKind, YieldFn};
