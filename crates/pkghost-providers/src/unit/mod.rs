//! Plugin units: locating, parsing and loading them.
//!
//! A unit is a TOML manifest naming the plugin types it exports. Exports
//! are either types compiled into the host (registered in a
//! [`UnitCatalog`]) or declarative providers served by the built-in
//! static catalog plugin.

mod loader;
mod locator;
mod manifest;
pub mod static_catalog;

pub use loader::{BUILTIN_PREFIX, LoadedUnit, ManifestUnitLoader, UnitCatalog, UnitLoader};
pub use locator::{HostEnvironment, UNIT_EXTENSION, UnitLocator};
pub use manifest::{
    ExportEntry, MAX_MANIFEST_BYTES, PackageEntry, ProviderEntry, SourceEntry, UnitManifest,
    UnitSection, load_manifest,
};
