//! Unit manifest format.
//!
//! ```toml
//! [unit]
//! name = "archive-tools"
//! version = "1.0.0"
//!
//! [[exports]]
//! type = "builtin:zip"
//!
//! [[providers]]
//! name = "Local"
//! schemes = ["file"]
//!
//! [[providers.packages]]
//! name = "foo"
//! version = "1.2.0"
//! source = "local"
//!
//! [[providers.sources]]
//! name = "local"
//! location = "file:///var/pkgs"
//! trusted = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// Largest manifest the loader will read.
pub const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// A parsed unit manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Unit identity.
    pub unit: UnitSection,
    /// Compiled-in types the unit exports.
    #[serde(default)]
    pub exports: Vec<ExportEntry>,
    /// Declarative providers served by the static catalog plugin.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

/// `[unit]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSection {
    /// Unit name.
    pub name: String,
    /// Unit version (semver).
    #[serde(default)]
    pub version: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// `[[exports]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Type reference, e.g. `builtin:zip`.
    #[serde(rename = "type")]
    pub type_ref: String,
}

/// `[[providers]]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Provider name.
    pub name: String,
    /// Provider version.
    #[serde(default)]
    pub version: Option<String>,
    /// URI schemes the provider claims.
    #[serde(default)]
    pub schemes: Vec<String>,
    /// File extensions the provider claims.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Leading bytes (hex) of files the provider recognizes.
    #[serde(default)]
    pub signatures: Vec<String>,
    /// Catalog entries.
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
    /// Package sources.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// `[[providers.packages]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// One-line summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Source the package comes from.
    #[serde(default)]
    pub source: Option<String>,
    /// Whether it starts out installed.
    #[serde(default)]
    pub installed: bool,
}

/// `[[providers.sources]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Source name.
    pub name: String,
    /// Source location.
    pub location: String,
    /// Whether installs from it proceed without asking.
    #[serde(default)]
    pub trusted: bool,
}

/// Read and parse a unit manifest.
///
/// # Errors
///
/// [`HostError::ManifestParse`] if the file is unreadable, too large or
/// malformed.
pub fn load_manifest(path: &Path) -> HostResult<UnitManifest> {
    let parse_error = |message: String| HostError::ManifestParse {
        path: path.to_path_buf(),
        message,
    };

    let len = std::fs::metadata(path)
        .map_err(|e| parse_error(e.to_string()))?
        .len();
    if len > MAX_MANIFEST_BYTES {
        return Err(parse_error(format!(
            "manifest is {len} bytes, limit is {MAX_MANIFEST_BYTES}"
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
    let manifest: UnitManifest = toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;

    if manifest.unit.name.trim().is_empty() {
        return Err(parse_error("unit name must not be empty".into()));
    }
    if let Some(version) = &manifest.unit.version {
        semver::Version::parse(version)
            .map_err(|e| parse_error(format!("invalid unit version '{version}': {e}")))?;
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("unit.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_a_full_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"
[unit]
name = "archive-tools"
version = "1.0.0"

[[exports]]
type = "builtin:zip"

[[providers]]
name = "Local"
schemes = ["file"]
extensions = [".zip"]

[[providers.packages]]
name = "foo"
version = "1.2.0"
source = "local"

[[providers.sources]]
name = "local"
location = "file:///var/pkgs"
trusted = true
"#,
        );
        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.unit.name, "archive-tools");
        assert_eq!(manifest.exports[0].type_ref, "builtin:zip");
        assert_eq!(manifest.providers[0].packages[0].version, "1.2.0");
        assert!(manifest.providers[0].sources[0].trusted);
        assert!(!manifest.providers[0].packages[0].installed);
    }

    #[test]
    fn rejects_bad_version_and_missing_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "[unit]\nname = \"x\"\nversion = \"one\"\n");
        assert!(matches!(load_manifest(&path), Err(HostError::ManifestParse { .. })));

        let path = write(dir.path(), "[unit]\nname = \"  \"\n");
        assert!(matches!(load_manifest(&path), Err(HostError::ManifestParse { .. })));

        let path = write(dir.path(), "not toml at all [");
        assert!(matches!(load_manifest(&path), Err(HostError::ManifestParse { .. })));
    }
}
