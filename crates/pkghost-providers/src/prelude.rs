//! Commonly used types.
//!
//! Use `use pkghost_providers::prelude::*;` to import them.

pub use crate::{
    CallError, CallResult, CapabilityRouter, FeatureSet, FindRequest, HostError, HostResult,
    OptionCategory, PackageHost, PackageProvider, PackageRecord, PackageStatus, Provider,
    SessionState, SourceRecord, StreamSession,
};
pub use crate::unit::{HostEnvironment, ManifestUnitLoader, UnitCatalog, UnitLoader};
