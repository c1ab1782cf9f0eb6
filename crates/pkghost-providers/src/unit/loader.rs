//! Loading units from their manifests.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::candidate::ExportedType;
use crate::error::HostResult;

use super::manifest::load_manifest;
use super::static_catalog;

/// Prefix of export references resolved through a [`UnitCatalog`].
pub const BUILTIN_PREFIX: &str = "builtin";

/// A unit whose exports are ready to be instantiated.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    /// Unit name from the manifest.
    pub name: String,
    /// Unit version, if declared.
    pub version: Option<String>,
    /// Canonical manifest path.
    pub path: PathBuf,
    /// Exported types.
    pub exports: Vec<ExportedType>,
}

/// Turns a located unit file into a [`LoadedUnit`].
pub trait UnitLoader: Send + Sync {
    /// Load the unit at `path`.
    ///
    /// # Errors
    ///
    /// Any error leaves the unit unloaded; the host reports it and moves on.
    fn load(&self, path: &Path) -> HostResult<LoadedUnit>;
}

/// Types compiled into the host that manifests can export by name.
#[derive(Clone, Default)]
pub struct UnitCatalog {
    types: HashMap<String, ExportedType>,
}

impl UnitCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under `name` (case-insensitive). A later
    /// registration replaces an earlier one.
    pub fn register(&mut self, name: &str, exported: ExportedType) {
        self.types.insert(name.to_ascii_lowercase(), exported);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: &str, exported: ExportedType) -> Self {
        self.register(name, exported);
        self
    }

    /// Look up a registered type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExportedType> {
        self.types.get(&name.to_ascii_lowercase())
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for UnitCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("UnitCatalog").field("types", &names).finish()
    }
}

/// The default loader: TOML manifests resolved against a [`UnitCatalog`].
#[derive(Debug, Clone, Default)]
pub struct ManifestUnitLoader {
    catalog: UnitCatalog,
}

impl ManifestUnitLoader {
    /// Create a loader over a catalog of built-in types.
    #[must_use]
    pub fn new(catalog: UnitCatalog) -> Self {
        Self { catalog }
    }

    fn resolve_export(&self, unit: &Path, type_ref: &str) -> Option<ExportedType> {
        match type_ref.split_once(':') {
            Some((prefix, name)) if prefix.eq_ignore_ascii_case(BUILTIN_PREFIX) => {
                let found = self.catalog.get(name.trim()).cloned();
                if found.is_none() {
                    warn!(unit = %unit.display(), type_ref, "Unknown built-in export type; skipping");
                }
                found
            },
            _ => {
                warn!(unit = %unit.display(), type_ref, "Unsupported export reference; skipping");
                None
            },
        }
    }
}

impl UnitLoader for ManifestUnitLoader {
    fn load(&self, path: &Path) -> HostResult<LoadedUnit> {
        let manifest = load_manifest(path)?;

        let mut exports: Vec<ExportedType> = manifest
            .exports
            .iter()
            .filter_map(|e| self.resolve_export(path, &e.type_ref))
            .collect();
        if !manifest.providers.is_empty() {
            exports.push(static_catalog::export(
                &manifest.unit.name,
                manifest.providers.clone(),
            ));
        }

        debug!(
            unit = %path.display(),
            name = %manifest.unit.name,
            exports = exports.len(),
            "Unit loaded"
        );
        Ok(LoadedUnit {
            name: manifest.unit.name,
            version: manifest.unit.version,
            path: path.to_path_buf(),
            exports,
        })
    }
}
