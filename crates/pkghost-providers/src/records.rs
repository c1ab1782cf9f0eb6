//! Typed records built from provider result tuples.
//!
//! Providers yield flat tuples of JSON primitives. Each record type knows its
//! tuple layout and refuses tuples that are missing a required field.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Feature naming the URI schemes a provider understands.
pub const FEATURE_URI_SCHEMES: &str = "uri-schemes";
/// Feature naming the file extensions a provider understands.
pub const FEATURE_FILE_EXTENSIONS: &str = "file-extensions";
/// Feature naming leading byte signatures (hex) a provider recognizes.
pub const FEATURE_MAGIC_SIGNATURES: &str = "magic-signatures";

/// Where a package stands relative to the local system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PackageStatus {
    /// Found in a source.
    Available,
    /// Present on this system.
    Installed,
    /// Removed from this system.
    #[serde(rename = "Not Installed")]
    NotInstalled,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Available => "Available",
            Self::Installed => "Installed",
            Self::NotInstalled => "Not Installed",
        })
    }
}

/// One package as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    /// Name of the provider that reported it.
    pub provider: String,
    /// Status the reporting operation implies.
    pub status: PackageStatus,
    /// Provider-specific handle used for install/uninstall.
    pub fast_reference: String,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Version scheme, e.g. `semver`.
    pub version_scheme: Option<String>,
    /// One-line summary.
    pub summary: Option<String>,
    /// Source the package came from.
    pub source: Option<String>,
    /// The search key that matched.
    pub search_key: Option<String>,
}

impl PackageRecord {
    /// Build from `[fastRef, name, version, versionScheme?, summary?,
    /// source?, searchKey?]`.
    #[must_use]
    pub fn from_tuple(provider: &str, status: PackageStatus, tuple: &[Value]) -> Option<Self> {
        Some(Self {
            provider: provider.to_owned(),
            status,
            fast_reference: text_at(tuple, 0)?,
            name: text_at(tuple, 1)?,
            version: text_at(tuple, 2)?,
            version_scheme: text_at(tuple, 3),
            summary: text_at(tuple, 4),
            source: text_at(tuple, 5),
            search_key: text_at(tuple, 6),
        })
    }
}

/// One package source as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    /// Name of the provider that reported it.
    pub provider: String,
    /// Source name.
    pub name: String,
    /// Source location (URI or path).
    pub location: String,
    /// Whether the provider trusts it.
    pub trusted: bool,
    /// Whether it is registered with the provider.
    pub registered: bool,
    /// Whether the provider validated the location.
    pub validated: bool,
}

impl SourceRecord {
    /// Build from `[name, location, trusted?, registered?, validated?]`.
    #[must_use]
    pub fn from_tuple(provider: &str, tuple: &[Value]) -> Option<Self> {
        Some(Self {
            provider: provider.to_owned(),
            name: text_at(tuple, 0)?,
            location: text_at(tuple, 1)?,
            trusted: flag_at(tuple, 2),
            registered: flag_at(tuple, 3),
            validated: flag_at(tuple, 4),
        })
    }
}

/// Which operation a dynamic option applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptionCategory {
    /// Options for find/list operations.
    Metadata,
    /// Options for install.
    Install,
}

impl OptionCategory {
    /// Name passed to providers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "Metadata",
            Self::Install => "Install",
        }
    }
}

impl fmt::Display for OptionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-settable option a provider understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionDefinition {
    /// Name of the provider that declared it.
    pub provider: String,
    /// Category it was requested under.
    pub category: OptionCategory,
    /// Option name.
    pub name: String,
    /// Expected value type, e.g. `string`, `switch`, `path`.
    pub expected_type: String,
    /// Whether callers must supply it.
    pub is_required: bool,
    /// Allowed values; empty means unrestricted.
    pub permitted_values: Vec<String>,
}

impl OptionDefinition {
    /// Build from `[name, expectedType, isRequired, permitted...]`.
    #[must_use]
    pub fn from_tuple(provider: &str, category: OptionCategory, tuple: &[Value]) -> Option<Self> {
        Some(Self {
            provider: provider.to_owned(),
            category,
            name: text_at(tuple, 0)?,
            expected_type: text_at(tuple, 1).unwrap_or_else(|| "string".to_owned()),
            is_required: flag_at(tuple, 2),
            permitted_values: tuple.iter().skip(3).filter_map(text).collect(),
        })
    }
}

/// One `[name, values...]` feature tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Feature name.
    pub name: String,
    /// Feature values (may be empty for a plain flag).
    pub values: Vec<String>,
}

impl Feature {
    /// Build from `[name, values...]`.
    #[must_use]
    pub fn from_tuple(tuple: &[Value]) -> Option<Self> {
        Some(Self {
            name: text_at(tuple, 0)?,
            values: tuple.iter().skip(1).filter_map(text).collect(),
        })
    }
}

/// Features a provider declared, keyed by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSet {
    features: BTreeMap<String, Vec<String>>,
}

impl FeatureSet {
    /// Merge in one feature. Repeated names accumulate values.
    pub fn add(&mut self, feature: Feature) {
        self.features
            .entry(feature.name.to_ascii_lowercase())
            .or_default()
            .extend(feature.values);
    }

    /// Whether the feature was declared at all.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.features.contains_key(&name.to_ascii_lowercase())
    }

    /// Values of one feature.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.features
            .get(&name.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Number of declared features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether nothing was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Iterate over `(name, values)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.features.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        let mut set = Self::default();
        for feature in iter {
            set.add(feature);
        }
        set
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_at(tuple: &[Value], index: usize) -> Option<String> {
    tuple.get(index).and_then(text).filter(|s| !s.is_empty())
}

fn flag_at(tuple: &[Value], index: usize) -> bool {
    match tuple.get(index) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn package_from_full_tuple() {
        let tuple = [
            json!("Zip|foo|1.2.0|local"),
            json!("foo"),
            json!("1.2.0"),
            json!("semver"),
            json!("A foo"),
            json!("local"),
            json!("foo"),
        ];
        let rec = PackageRecord::from_tuple("Zip", PackageStatus::Available, &tuple).unwrap();
        assert_eq!(rec.provider, "Zip");
        assert_eq!(rec.name, "foo");
        assert_eq!(rec.source.as_deref(), Some("local"));
        assert_eq!(rec.status.to_string(), "Available");
    }

    #[test]
    fn package_requires_reference_name_and_version() {
        let short = [json!("ref"), json!("foo")];
        assert!(PackageRecord::from_tuple("Zip", PackageStatus::Available, &short).is_none());
        let empty_name = [json!("ref"), json!(""), json!("1.0")];
        assert!(PackageRecord::from_tuple("Zip", PackageStatus::Available, &empty_name).is_none());
        let numeric_version = [json!("ref"), json!("foo"), json!(2)];
        let rec =
            PackageRecord::from_tuple("Zip", PackageStatus::Installed, &numeric_version).unwrap();
        assert_eq!(rec.version, "2");
        assert_eq!(rec.summary, None);
    }

    #[test]
    fn source_flags_accept_strings() {
        let tuple = [json!("local"), json!("file:///pkgs"), json!("True"), json!(true)];
        let rec = SourceRecord::from_tuple("Zip", &tuple).unwrap();
        assert!(rec.trusted);
        assert!(rec.registered);
        assert!(!rec.validated);
    }

    #[test]
    fn option_definition_collects_permitted_values() {
        let tuple = [
            json!("Scope"),
            json!("string"),
            json!(false),
            json!("CurrentUser"),
            json!("AllUsers"),
        ];
        let def = OptionDefinition::from_tuple("Zip", OptionCategory::Install, &tuple).unwrap();
        assert_eq!(def.permitted_values, ["CurrentUser", "AllUsers"]);
        assert!(!def.is_required);
    }

    #[test]
    fn feature_set_accumulates_case_insensitively() {
        let set: FeatureSet = [
            Feature::from_tuple(&[json!("URI-Schemes"), json!("http")]).unwrap(),
            Feature::from_tuple(&[json!("uri-schemes"), json!("file")]).unwrap(),
            Feature::from_tuple(&[json!("supports-powershell")]).unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.values(FEATURE_URI_SCHEMES), ["http", "file"]);
        assert!(set.has("Supports-PowerShell"));
        assert!(set.values(FEATURE_FILE_EXTENSIONS).is_empty());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn not_installed_serializes_with_a_space() {
        let json = serde_json::to_string(&PackageStatus::NotInstalled).unwrap();
        assert_eq!(json, "\"Not Installed\"");
    }
}
