//! Built-in plugin serving providers declared in a unit manifest.
//!
//! Every `[[providers]]` table becomes one provider backed by an in-memory
//! catalog of packages and sources. Both the plugin and its providers are
//! [`DynamicObject`]s, so they go through exactly the same structural
//! binding as any other unit export.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};
use tracing::debug;

use crate::candidate::{DynamicObject, ExportedType};
use crate::error::{CallError, CallResult};
use crate::records::{FEATURE_FILE_EXTENSIONS, FEATURE_MAGIC_SIGNATURES, FEATURE_URI_SCHEMES};
use crate::router::CapabilityRouter;
use crate::value::{Dynamic, ValueKind, YieldFn};

use super::manifest::{PackageEntry, ProviderEntry, SourceEntry};

/// Type name of the catalog plugin.
pub const PLUGIN_TYPE: &str = "pkghost.StaticCatalogPlugin";
/// Type name of catalog providers.
pub const PROVIDER_TYPE: &str = "pkghost.StaticCatalogProvider";

use ValueKind::{Bool, Callback, List, Object, Router, Str};

/// Export the catalog plugin for a unit's declared providers.
#[must_use]
pub fn export(unit_name: &str, entries: Vec<ProviderEntry>) -> ExportedType {
    let unit_name = unit_name.to_owned();
    ExportedType::from_fn(move || catalog_plugin(&unit_name, entries.clone()))
}

fn catalog_plugin(unit_name: &str, entries: Vec<ProviderEntry>) -> DynamicObject {
    let plugin_name = format!("{unit_name}/catalog");
    let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    DynamicObject::builder(PLUGIN_TYPE)
        .method("GetPluginName", &[], Str, move |_| {
            Ok(Dynamic::from(plugin_name.as_str()))
        })
        .method("GetProviderNames", &[], List, move |_| {
            Ok(Dynamic::from(names.clone()))
        })
        .method("CreateProvider", &[Str], Object, move |args| {
            let wanted = str_arg(&args, 0);
            let entry = entries
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| CallError::failed(format!("no provider named '{wanted}'")))?;
            Ok(Dynamic::Object(Arc::new(catalog_provider(entry.clone()))))
        })
        .build()
}

struct Catalog {
    name: String,
    schemes: Vec<String>,
    extensions: Vec<String>,
    signatures: Vec<String>,
    packages: Vec<PackageEntry>,
    sources: Vec<SourceEntry>,
}

type Shared = Arc<Mutex<Catalog>>;

fn lock(state: &Shared) -> CallResult<MutexGuard<'_, Catalog>> {
    state
        .lock()
        .map_err(|_| CallError::failed("catalog state poisoned"))
}

fn catalog_provider(entry: ProviderEntry) -> DynamicObject {
    let name = entry.name.clone();
    let version = entry.version.clone().unwrap_or_default();
    let state: Shared = Arc::new(Mutex::new(Catalog {
        name: entry.name,
        schemes: entry.schemes,
        extensions: entry.extensions,
        signatures: entry.signatures,
        packages: entry.packages,
        sources: entry.sources,
    }));

    let s = |state: &Shared| Arc::clone(state);
    let (features, options, add, remove, resolve) =
        (s(&state), s(&state), s(&state), s(&state), s(&state));
    let (valid, trusted, find, by_file, by_uri) =
        (s(&state), s(&state), s(&state), s(&state), s(&state));
    let (installed, install, uninstall) = (s(&state), s(&state), s(&state));

    DynamicObject::builder(PROVIDER_TYPE)
        .method("GetPackageProviderName", &[], Str, move |_| {
            Ok(Dynamic::from(name.as_str()))
        })
        .method("GetProviderVersion", &[], Str, move |_| {
            Ok(Dynamic::from(version.as_str()))
        })
        .method("GetFeatures", &[Callback, Router], ValueKind::Unit, move |args| {
            let out = callback_arg(&args, 0)?;
            let catalog = lock(&features)?;
            for (feature, values) in [
                (FEATURE_URI_SCHEMES, &catalog.schemes),
                (FEATURE_FILE_EXTENSIONS, &catalog.extensions),
                (FEATURE_MAGIC_SIGNATURES, &catalog.signatures),
            ] {
                if values.is_empty() {
                    continue;
                }
                let mut tuple = vec![json!(feature)];
                tuple.extend(values.iter().map(|v| json!(v)));
                if !out(tuple) {
                    break;
                }
            }
            Ok(Dynamic::null())
        })
        .method(
            "GetDynamicOptions",
            &[Str, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let out = callback_arg(&args, 1)?;
                let catalog = lock(&options)?;
                match str_arg(&args, 0) {
                    "Metadata" => {
                        let mut tuple = vec![json!("Source"), json!("string"), json!(false)];
                        tuple.extend(catalog.sources.iter().map(|s| json!(s.name)));
                        out(tuple);
                    },
                    "Install" => {
                        out(vec![json!("Force"), json!("switch"), json!(false)]);
                    },
                    other => debug!(category = other, "Unknown option category"),
                }
                Ok(Dynamic::null())
            },
        )
        .method(
            "AddPackageSource",
            &[Str, Str, Bool, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let (source_name, location) = (str_arg(&args, 0), str_arg(&args, 1));
                if source_name.is_empty() || location.is_empty() {
                    return Err(CallError::failed("source name and location are required"));
                }
                let trusted = args.get(2).and_then(Dynamic::as_bool).unwrap_or(false);
                let out = callback_arg(&args, 3)?;
                let entry = SourceEntry {
                    name: source_name.to_owned(),
                    location: location.to_owned(),
                    trusted,
                };
                {
                    let mut catalog = lock(&add)?;
                    catalog
                        .sources
                        .retain(|s| !s.name.eq_ignore_ascii_case(source_name));
                    catalog.sources.push(entry.clone());
                }
                out(source_tuple(&entry));
                Ok(Dynamic::null())
            },
        )
        .method(
            "RemovePackageSource",
            &[Str, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let source_name = str_arg(&args, 0);
                let out = callback_arg(&args, 1)?;
                let removed = {
                    let mut catalog = lock(&remove)?;
                    let pos = catalog
                        .sources
                        .iter()
                        .position(|s| s.name.eq_ignore_ascii_case(source_name))
                        .ok_or_else(|| CallError::failed(format!("unknown source '{source_name}'")))?;
                    catalog.sources.remove(pos)
                };
                out(vec![
                    json!(removed.name),
                    json!(removed.location),
                    json!(removed.trusted),
                    json!(false),
                    json!(true),
                ]);
                Ok(Dynamic::null())
            },
        )
        .method(
            "ResolvePackageSources",
            &[Callback, Router],
            ValueKind::Unit,
            move |args| {
                let out = callback_arg(&args, 0)?;
                let wanted = router_arg(&args, 1).map(CapabilityRouter::package_sources).unwrap_or_default();
                let matching: Vec<SourceEntry> = lock(&resolve)?
                    .sources
                    .iter()
                    .filter(|s| source_selected(&wanted, &s.name))
                    .cloned()
                    .collect();
                for source in &matching {
                    if !out(source_tuple(source)) {
                        break;
                    }
                }
                Ok(Dynamic::null())
            },
        )
        .method("IsValidPackageSource", &[Str, Router], Bool, move |args| {
            let location = str_arg(&args, 0);
            let catalog = lock(&valid)?;
            let known = catalog.sources.iter().any(|s| {
                s.name.eq_ignore_ascii_case(location) || s.location.eq_ignore_ascii_case(location)
            });
            let scheme_ok = location.split_once("://").is_some_and(|(scheme, rest)| {
                !rest.is_empty() && catalog.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
            });
            Ok(Dynamic::from(known || scheme_ok))
        })
        .method("IsTrustedPackageSource", &[Str, Router], Bool, move |args| {
            let location = str_arg(&args, 0);
            let catalog = lock(&trusted)?;
            Ok(Dynamic::from(catalog.sources.iter().any(|s| {
                s.trusted
                    && (s.name.eq_ignore_ascii_case(location)
                        || s.location.eq_ignore_ascii_case(location))
            })))
        })
        .method(
            "FindPackage",
            &[Str, Str, Str, Str, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let query = Query {
                    name: str_arg(&args, 0),
                    required: str_arg(&args, 1),
                    minimum: str_arg(&args, 2),
                    maximum: str_arg(&args, 3),
                };
                let out = callback_arg(&args, 4)?;
                let sources = router_arg(&args, 5).map(CapabilityRouter::package_sources).unwrap_or_default();
                let (provider, hits) = {
                    let catalog = lock(&find)?;
                    let hits: Vec<PackageEntry> = catalog
                        .packages
                        .iter()
                        .filter(|p| query.matches(p))
                        .filter(|p| source_selected(&sources, p.source.as_deref().unwrap_or_default()))
                        .cloned()
                        .collect();
                    (catalog.name.clone(), hits)
                };
                emit(&provider, &hits, query.name, &out);
                Ok(Dynamic::null())
            },
        )
        .method(
            "FindPackageByFile",
            &[Str, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let file = str_arg(&args, 0);
                let out = callback_arg(&args, 1)?;
                let (provider, hits) = match_artifact(&by_file, file_name(file))?;
                emit(&provider, &hits, file, &out);
                Ok(Dynamic::null())
            },
        )
        .method(
            "FindPackageByUri",
            &[Str, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let uri = str_arg(&args, 0);
                let out = callback_arg(&args, 1)?;
                let Some((scheme, rest)) = uri.split_once("://") else {
                    return Ok(Dynamic::null());
                };
                let supported = lock(&by_uri)?
                    .schemes
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(scheme));
                if !supported {
                    return Ok(Dynamic::null());
                }
                let (provider, hits) = match_artifact(&by_uri, file_name(rest))?;
                emit(&provider, &hits, uri, &out);
                Ok(Dynamic::null())
            },
        )
        .method(
            "GetInstalledPackages",
            &[Str, Callback, Router],
            ValueKind::Unit,
            move |args| {
                let filter = Query {
                    name: str_arg(&args, 0),
                    ..Query::default()
                };
                let out = callback_arg(&args, 1)?;
                let (provider, hits) = {
                    let catalog = lock(&installed)?;
                    let hits: Vec<PackageEntry> = catalog
                        .packages
                        .iter()
                        .filter(|p| p.installed && filter.matches(p))
                        .cloned()
                        .collect();
                    (catalog.name.clone(), hits)
                };
                emit(&provider, &hits, filter.name, &out);
                Ok(Dynamic::null())
            },
        )
        .method("InstallPackage", &[Str, Callback, Router], Bool, move |args| {
            set_installed(&install, str_arg(&args, 0), true, &callback_arg(&args, 1)?)
        })
        .method("UninstallPackage", &[Str, Callback, Router], Bool, move |args| {
            set_installed(&uninstall, str_arg(&args, 0), false, &callback_arg(&args, 1)?)
        })
        .build()
}

#[derive(Default)]
struct Query<'a> {
    name: &'a str,
    required: &'a str,
    minimum: &'a str,
    maximum: &'a str,
}

impl Query<'_> {
    fn matches(&self, package: &PackageEntry) -> bool {
        name_matches(self.name, &package.name)
            && (self.required.is_empty()
                || compare_versions(&package.version, self.required) == Ordering::Equal)
            && (self.minimum.is_empty()
                || compare_versions(&package.version, self.minimum) != Ordering::Less)
            && (self.maximum.is_empty()
                || compare_versions(&package.version, self.maximum) != Ordering::Greater)
    }
}

/// Empty or `*` matches everything; a trailing `*` is a prefix match.
fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    let pattern = pattern.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Semver ordering when both sides parse, plain string ordering otherwise.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn source_selected(wanted: &[String], source: &str) -> bool {
    wanted.is_empty() || wanted.iter().any(|w| w.eq_ignore_ascii_case(source))
}

fn file_name(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Match `name-version.ext` or `name.ext` against the catalog.
fn match_artifact(state: &Shared, file: &str) -> CallResult<(String, Vec<PackageEntry>)> {
    let catalog = lock(state)?;
    let lower = file.to_ascii_lowercase();
    let stem = catalog
        .extensions
        .iter()
        .map(|e| e.to_ascii_lowercase())
        .find_map(|ext| {
            let ext = ext.trim_start_matches('.').to_owned();
            lower
                .strip_suffix(&ext)
                .and_then(|s| s.strip_suffix('.'))
                .map(str::to_owned)
        });
    let Some(stem) = stem else {
        return Ok((catalog.name.clone(), Vec::new()));
    };
    let hits = catalog
        .packages
        .iter()
        .filter(|p| {
            let name = p.name.to_ascii_lowercase();
            stem == name || stem == format!("{name}-{}", p.version.to_ascii_lowercase())
        })
        .cloned()
        .collect();
    Ok((catalog.name.clone(), hits))
}

fn set_installed(state: &Shared, reference: &str, installed: bool, out: &YieldFn) -> CallResult<Dynamic> {
    let (provider, package) = {
        let mut catalog = lock(state)?;
        let provider = catalog.name.clone();
        let package = catalog
            .packages
            .iter_mut()
            .find(|p| fast_reference(&provider, p) == reference)
            .ok_or_else(|| CallError::failed(format!("unknown package reference '{reference}'")))?;
        if package.installed == installed {
            return Ok(Dynamic::from(false));
        }
        package.installed = installed;
        (provider, package.clone())
    };
    out(package_tuple(&provider, &package, ""));
    Ok(Dynamic::from(true))
}

fn emit(provider: &str, packages: &[PackageEntry], search_key: &str, out: &YieldFn) {
    for package in packages {
        if !out(package_tuple(provider, package, search_key)) {
            break;
        }
    }
}

fn fast_reference(provider: &str, package: &PackageEntry) -> String {
    format!(
        "{provider}|{}|{}|{}",
        package.name,
        package.version,
        package.source.as_deref().unwrap_or_default()
    )
}

fn package_tuple(provider: &str, package: &PackageEntry, search_key: &str) -> Vec<Value> {
    vec![
        json!(fast_reference(provider, package)),
        json!(package.name),
        json!(package.version),
        json!("semver"),
        json!(package.summary.as_deref().unwrap_or_default()),
        json!(package.source.as_deref().unwrap_or_default()),
        json!(search_key),
    ]
}

fn source_tuple(source: &SourceEntry) -> Vec<Value> {
    vec![
        json!(source.name),
        json!(source.location),
        json!(source.trusted),
        json!(true),
        json!(true),
    ]
}

fn str_arg(args: &[Dynamic], index: usize) -> &str {
    args.get(index).and_then(Dynamic::as_str).unwrap_or_default()
}

fn callback_arg(args: &[Dynamic], index: usize) -> CallResult<YieldFn> {
    args.get(index)
        .and_then(Dynamic::as_callback)
        .cloned()
        .ok_or_else(|| CallError::BadArguments {
            member: PROVIDER_TYPE.to_owned(),
            message: format!("argument {index} is not a callback"),
        })
}

fn router_arg(args: &[Dynamic], index: usize) -> Option<&CapabilityRouter> {
    args.get(index).and_then(Dynamic::as_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::CapabilityBinder;
    use crate::candidate::Candidate;
    use crate::contract::{PLUGIN_CONTRACT, PROVIDER_CONTRACT};
    use crate::provider::{FindRequest, PackageProvider, BoundProvider};
    use std::sync::Mutex as StdMutex;

    fn entry() -> ProviderEntry {
        ProviderEntry {
            name: "Local".into(),
            version: Some("0.1.0".into()),
            schemes: vec!["file".into(), "https".into()],
            extensions: vec![".zip".into()],
            signatures: vec!["504B0304".into()],
            packages: vec![
                PackageEntry {
                    name: "foo".into(),
                    version: "1.2.0".into(),
                    summary: Some("A foo".into()),
                    source: Some("local".into()),
                    installed: false,
                },
                PackageEntry {
                    name: "foo".into(),
                    version: "2.0.0".into(),
                    summary: None,
                    source: Some("remote".into()),
                    installed: true,
                },
                PackageEntry {
                    name: "foobar".into(),
                    version: "0.3.0".into(),
                    summary: None,
                    source: Some("local".into()),
                    installed: false,
                },
            ],
            sources: vec![
                SourceEntry {
                    name: "local".into(),
                    location: "file:///var/pkgs".into(),
                    trusted: true,
                },
                SourceEntry {
                    name: "remote".into(),
                    location: "https://pkgs.example.com".into(),
                    trusted: false,
                },
            ],
        }
    }

    fn provider() -> BoundProvider {
        let binder = CapabilityBinder::new();
        let adapter = binder
            .bind(&PROVIDER_CONTRACT, Arc::new(catalog_provider(entry())))
            .unwrap();
        BoundProvider::new(adapter).unwrap()
    }

    fn collect(
        f: impl FnOnce(YieldFn) -> CallResult<()>,
    ) -> Vec<Vec<Value>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f(Arc::new(move |t| {
            sink.lock().unwrap().push(t);
            true
        }))
        .unwrap();
        let out = seen.lock().unwrap().clone();
        out
    }

    #[test]
    fn plugin_and_provider_bind_structurally() {
        let binder = CapabilityBinder::new();
        let exported = export("unit", vec![entry()]);
        assert!(binder.is_compatible(&PLUGIN_CONTRACT, exported.shape()));
        assert!(binder.is_compatible(
            &PROVIDER_CONTRACT,
            catalog_provider(entry()).shape()
        ));
    }

    #[test]
    fn find_honours_wildcards_and_version_ranges() {
        let p = provider();
        let router = CapabilityRouter::empty();
        let all = collect(|out| p.find_package(&FindRequest::named("foo*"), out, &router));
        assert_eq!(all.len(), 3);

        let exact = collect(|out| p.find_package(&FindRequest::named("FOO"), out, &router));
        assert_eq!(exact.len(), 2);

        let ranged = collect(|out| {
            p.find_package(&FindRequest::named("foo").with_range("1.5.0", ""), out, &router)
        });
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0][2], json!("2.0.0"));

        let pinned = collect(|out| {
            p.find_package(&FindRequest::named("foo").with_required_version("1.2.0"), out, &router)
        });
        assert_eq!(pinned[0][0], json!("Local|foo|1.2.0|local"));
    }

    #[test]
    fn declared_features_include_magic_signatures() {
        let p = provider();
        let router = CapabilityRouter::empty();
        let features = collect(|out| p.features(out, &router));
        assert_eq!(features.len(), 3);
        assert_eq!(features[2], vec![json!(FEATURE_MAGIC_SIGNATURES), json!("504B0304")]);
    }

    #[test]
    fn find_stops_when_told_to() {
        let p = provider();
        let count = Arc::new(StdMutex::new(0_u32));
        let c = Arc::clone(&count);
        p.find_package(
            &FindRequest::named(""),
            Arc::new(move |_| {
                let mut n = c.lock().unwrap();
                *n = n.saturating_add(1);
                false
            }),
            &CapabilityRouter::empty(),
        )
        .unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn trust_and_validity() {
        let p = provider();
        let router = CapabilityRouter::empty();
        assert!(p.is_trusted_package_source("local", &router).unwrap());
        assert!(p.is_trusted_package_source("file:///var/pkgs", &router).unwrap());
        assert!(!p.is_trusted_package_source("remote", &router).unwrap());
        assert!(p.is_valid_package_source("https://elsewhere.example", &router).unwrap());
        assert!(!p.is_valid_package_source("ftp://elsewhere.example", &router).unwrap());
    }

    #[test]
    fn install_flips_the_installed_flag() {
        let p = provider();
        let router = CapabilityRouter::empty();
        let before = collect(|out| p.installed_packages("", out, &router));
        assert_eq!(before.len(), 1);

        let seen = collect(|out| {
            assert!(p.install_package("Local|foo|1.2.0|local", out, &router).unwrap());
            Ok(())
        });
        assert_eq!(seen.len(), 1);
        let after = collect(|out| p.installed_packages("foo", out, &router));
        assert_eq!(after.len(), 2);

        let err = collect(|out| {
            assert!(p.install_package("Local|nope|1|x", out, &router).is_err());
            Ok(())
        });
        assert!(err.is_empty());
    }

    #[test]
    fn sources_can_be_added_and_removed() {
        let p = provider();
        let router = CapabilityRouter::empty();
        collect(|out| p.add_package_source("extra", "file:///extra", true, out, &router));
        let sources = collect(|out| p.resolve_package_sources(out, &router));
        assert_eq!(sources.len(), 3);
        let removed = collect(|out| p.remove_package_source("REMOTE", out, &router));
        assert_eq!(removed[0][0], json!("remote"));
        assert_eq!(collect(|out| p.resolve_package_sources(out, &router)).len(), 2);
    }

    #[test]
    fn source_filter_comes_from_the_router() {
        let p = provider();
        let router = CapabilityRouter::builder()
            .with_list(crate::router::capability::GET_PACKAGE_SOURCES, |_| vec!["remote".into()])
            .build();
        let hits = collect(|out| p.find_package(&FindRequest::named("foo"), out, &router));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0][5], json!("remote"));
    }

    #[test]
    fn find_by_file_and_uri() {
        let p = provider();
        let router = CapabilityRouter::empty();
        let by_file = collect(|out| p.find_package_by_file("/tmp/foo-1.2.0.zip", out, &router));
        assert_eq!(by_file.len(), 1);
        let by_uri = collect(|out| p.find_package_by_uri("https://x.example/dl/foobar.ZIP", out, &router));
        assert_eq!(by_uri.len(), 1);
        let wrong_scheme = collect(|out| p.find_package_by_uri("ftp://x/foobar.zip", out, &router));
        assert!(wrong_scheme.is_empty());
    }
}
