//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::candidate::DynamicObject;
use crate::error::{CallError, CallResult};
use crate::provider::{FindRequest, PackageProvider};
use crate::router::{CapabilityRouter, capability};
use crate::value::{Dynamic, ValueKind, YieldFn};

#[derive(Clone, Copy)]
enum UntrustedMode {
    Absent,
    Accept,
    Decline,
    Fail,
}

/// A router that records every text diagnostic it receives.
#[derive(Clone)]
pub(crate) struct RecordingRouter {
    log: Arc<Mutex<Vec<(&'static str, String)>>>,
    untrusted: UntrustedMode,
}

impl RecordingRouter {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            untrusted: UntrustedMode::Absent,
        }
    }

    pub(crate) fn accepting_untrusted(mut self) -> Self {
        self.untrusted = UntrustedMode::Accept;
        self
    }

    pub(crate) fn declining_untrusted(mut self) -> Self {
        self.untrusted = UntrustedMode::Decline;
        self
    }

    pub(crate) fn failing_untrusted(mut self) -> Self {
        self.untrusted = UntrustedMode::Fail;
        self
    }

    pub(crate) fn router(&self) -> CapabilityRouter {
        let mut builder = CapabilityRouter::builder();
        for (name, kind) in [
            (capability::WARNING, "warning"),
            (capability::ERROR, "error"),
            (capability::MESSAGE, "message"),
            (capability::VERBOSE, "verbose"),
            (capability::DEBUG, "debug"),
        ] {
            let log = Arc::clone(&self.log);
            builder = builder.with_text_sink(name, move |m| {
                log.lock().unwrap().push((kind, m.to_owned()));
            });
        }
        match self.untrusted {
            UntrustedMode::Absent => {},
            UntrustedMode::Accept => {
                builder = builder.with_predicate(capability::SHOULD_CONTINUE_UNTRUSTED, |_| true);
            },
            UntrustedMode::Decline => {
                builder = builder.with_predicate(capability::SHOULD_CONTINUE_UNTRUSTED, |_| false);
            },
            UntrustedMode::Fail => {
                builder = builder.with(capability::SHOULD_CONTINUE_UNTRUSTED, |_| {
                    Err(CallError::failed("prompt unavailable"))
                });
            },
        }
        builder.build()
    }

    fn of_kind(&self, kind: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.of_kind("warning")
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.of_kind("error")
    }
}

/// A native provider with canned data and call counters.
pub(crate) struct StubProvider {
    name: String,
    packages: Vec<String>,
    trusted: Vec<String>,
    features: Vec<(String, Vec<String>)>,
    name_calls: Arc<AtomicUsize>,
    install_calls: Arc<AtomicUsize>,
}

impl StubProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            packages: Vec::new(),
            trusted: Vec::new(),
            features: Vec::new(),
            name_calls: Arc::new(AtomicUsize::new(0)),
            install_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_packages(mut self, names: &[&str]) -> Self {
        self.packages = names.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub(crate) fn trusting(mut self, source: &str) -> Self {
        self.trusted.push(source.to_owned());
        self
    }

    pub(crate) fn with_feature(mut self, name: &str, values: &[&str]) -> Self {
        self.features.push((
            name.to_owned(),
            values.iter().map(|s| (*s).to_owned()).collect(),
        ));
        self
    }

    pub(crate) fn name_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.name_calls)
    }

    pub(crate) fn install_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.install_calls)
    }
}

impl PackageProvider for StubProvider {
    fn name(&self) -> CallResult<String> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.name.clone())
    }

    fn features(&self, out: YieldFn, _router: &CapabilityRouter) -> CallResult<()> {
        if self.features.is_empty() {
            return Err(CallError::Unsupported("GetFeatures".into()));
        }
        for (name, values) in &self.features {
            let mut tuple = vec![json!(name)];
            tuple.extend(values.iter().map(|v| json!(v)));
            if !out(tuple) {
                break;
            }
        }
        Ok(())
    }

    fn is_trusted_package_source(&self, location: &str, _router: &CapabilityRouter) -> CallResult<bool> {
        Ok(self.trusted.iter().any(|t| t == location))
    }

    fn find_package(
        &self,
        request: &FindRequest,
        out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<()> {
        for name in &self.packages {
            if !request.name.is_empty() && !request.name.eq_ignore_ascii_case(name) {
                continue;
            }
            let reference = format!("{}|{name}|1.0|local", self.name);
            let tuple = vec![
                json!(reference),
                json!(name),
                json!("1.0"),
                json!("semver"),
                json!(""),
                json!("local"),
                json!(request.name),
            ];
            if !out(tuple) {
                break;
            }
        }
        Ok(())
    }

    fn install_package(
        &self,
        fast_reference: &str,
        out: YieldFn,
        _router: &CapabilityRouter,
    ) -> CallResult<bool> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        let name = fast_reference.split('|').nth(1).unwrap_or("unknown");
        out(vec![json!(fast_reference), json!(name), json!("1.0")]);
        Ok(true)
    }
}

/// A scripted provider object exposing only its name.
pub(crate) fn scripted_provider(type_name: &str, provider_name: &str) -> DynamicObject {
    let name = provider_name.to_owned();
    DynamicObject::builder(type_name)
        .method("GetPackageProviderName", &[], ValueKind::Str, move |_| {
            Ok(Dynamic::from(name.as_str()))
        })
        .build()
}

/// A scripted plugin that manufactures one [`scripted_provider`] per name.
pub(crate) fn scripted_plugin(type_name: &str, plugin_name: &str, providers: &[&str]) -> DynamicObject {
    let plugin_name = plugin_name.to_owned();
    let names: Vec<String> = providers.iter().map(|s| (*s).to_owned()).collect();
    DynamicObject::builder(type_name)
        .method("GetPluginName", &[], ValueKind::Str, move |_| {
            Ok(Dynamic::from(plugin_name.as_str()))
        })
        .method("GetProviderNames", &[], ValueKind::List, move |_| {
            Ok(Dynamic::from(names.clone()))
        })
        .method("CreateProvider", &[ValueKind::Str], ValueKind::Object, |args| {
            let name = args
                .first()
                .and_then(Dynamic::as_str)
                .ok_or_else(|| CallError::failed("missing provider name"))?;
            let obj = scripted_provider(&format!("test.{name}Provider"), name);
            Ok(Dynamic::Object(Arc::new(obj)))
        })
        .build()
}
