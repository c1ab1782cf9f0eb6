//! Shared harness for the host integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pkghost_providers::router::capability;
use pkghost_providers::unit::{HostEnvironment, LoadedUnit, ManifestUnitLoader, UnitCatalog, UnitLoader};
use pkghost_providers::{CapabilityRouter, HostResult, PackageHost};
use tempfile::TempDir;

/// A directory of unit manifests plus a host rooted in it.
#[allow(dead_code)]
pub struct UnitDir {
    /// Holds the manifests until the test ends.
    pub dir: TempDir,
}

#[allow(dead_code)]
impl UnitDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<name>.toml` declaring one catalog provider per entry.
    pub fn write_catalog_unit(&self, name: &str, providers: &[&str]) {
        let mut body = format!("[unit]\nname = \"{name}\"\nversion = \"1.0.0\"\n");
        for provider in providers {
            body.push_str(&format!(
                r#"
[[providers]]
name = "{provider}"
extensions = [".zip"]

[[providers.packages]]
name = "foo"
version = "1.2.0"
source = "remote"

[[providers.packages]]
name = "bar"
version = "0.3.0"
source = "local"

[[providers.sources]]
name = "local"
location = "file:///var/pkgs"
trusted = true

[[providers.sources]]
name = "remote"
location = "https://pkgs.example.org"
"#
            ));
        }
        self.write(name, &body);
    }

    pub fn write(&self, name: &str, body: &str) {
        std::fs::write(self.path().join(format!("{name}.toml")), body).expect("write unit");
    }

    pub fn environment(&self) -> HostEnvironment {
        HostEnvironment::new(self.path(), self.path())
    }

    pub fn host(&self, catalog: UnitCatalog) -> PackageHost {
        PackageHost::builder()
            .catalog(catalog)
            .environment(self.environment())
            .worker_threads(4)
            .build()
    }
}

/// Loader that counts how often it is asked to load anything.
#[allow(dead_code)]
pub struct CountingLoader {
    pub inner: ManifestUnitLoader,
    pub loads: Arc<AtomicUsize>,
}

impl UnitLoader for CountingLoader {
    fn load(&self, path: &Path) -> HostResult<LoadedUnit> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        self.inner.load(path)
    }
}

/// Records diagnostics and answers prompts from canned settings.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Recorder {
    pub warnings: Arc<Mutex<Vec<String>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
    pub cancelled: Arc<AtomicBool>,
    pub accept_untrusted: bool,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting_untrusted() -> Self {
        Self {
            accept_untrusted: true,
            ..Self::default()
        }
    }

    pub fn router(&self) -> CapabilityRouter {
        let warnings = Arc::clone(&self.warnings);
        let errors = Arc::clone(&self.errors);
        let cancelled = Arc::clone(&self.cancelled);
        let accept = self.accept_untrusted;
        CapabilityRouter::builder()
            .with_text_sink(capability::WARNING, move |m| {
                warnings.lock().unwrap().push(m.to_owned());
            })
            .with_text_sink(capability::ERROR, move |m| {
                errors.lock().unwrap().push(m.to_owned());
            })
            .with_predicate(capability::IS_CANCELLED, move |_| cancelled.load(Ordering::SeqCst))
            .with_predicate(capability::SHOULD_CONTINUE_UNTRUSTED, move |_| accept)
            .build()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}
