//! [`PackageProvider`] over a structurally bound candidate.

use crate::binder::BoundAdapter;
use crate::contract::{PROVIDER_CONTRACT, ProviderOp};
use crate::error::{CallError, CallResult};
use crate::records::OptionCategory;
use crate::router::CapabilityRouter;
use crate::value::{Dynamic, ValueKind, YieldFn};

use super::{FindRequest, PackageProvider};

/// A candidate certified against the package-provider contract.
#[derive(Debug, Clone)]
pub struct BoundProvider {
    adapter: BoundAdapter,
}

impl BoundProvider {
    /// Wrap an adapter. Returns `None` if it was bound to another contract.
    #[must_use]
    pub fn new(adapter: BoundAdapter) -> Option<Self> {
        (adapter.contract() == &PROVIDER_CONTRACT).then_some(Self { adapter })
    }

    /// The candidate's type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.adapter.type_name()
    }

    fn query(&self, op: ProviderOp, args: Vec<Dynamic>) -> CallResult<Dynamic> {
        self.adapter.call(op.index(), args)
    }

    fn text(&self, op: ProviderOp) -> CallResult<String> {
        let out = self.query(op, Vec::new())?;
        out.as_str()
            .map(str::to_owned)
            .ok_or_else(|| bad_return(op, ValueKind::Str))
    }

    fn flag(&self, op: ProviderOp, args: Vec<Dynamic>) -> CallResult<bool> {
        self.query(op, args)?
            .as_bool()
            .ok_or_else(|| bad_return(op, ValueKind::Bool))
    }

    /// Streaming members return nothing useful; only failures matter.
    fn stream(&self, op: ProviderOp, args: Vec<Dynamic>) -> CallResult<()> {
        self.query(op, args).map(|_| ())
    }
}

fn bad_return(op: ProviderOp, expected: ValueKind) -> CallError {
    CallError::BadReturn {
        member: PROVIDER_CONTRACT.members[op.index()].name.to_owned(),
        expected,
    }
}

fn tail(out: YieldFn, router: &CapabilityRouter) -> [Dynamic; 2] {
    [Dynamic::Callback(out), Dynamic::Router(router.clone())]
}

impl PackageProvider for BoundProvider {
    fn name(&self) -> CallResult<String> {
        self.text(ProviderOp::GetName)
    }

    fn version(&self) -> CallResult<String> {
        self.text(ProviderOp::GetVersion)
    }

    fn initialize(&self, router: &CapabilityRouter) -> CallResult<()> {
        self.adapter.call_action(
            ProviderOp::Initialize.index(),
            vec![Dynamic::Router(router.clone())],
        )
    }

    fn features(&self, out: YieldFn, router: &CapabilityRouter) -> CallResult<()> {
        self.stream(ProviderOp::GetFeatures, tail(out, router).into())
    }

    fn dynamic_options(
        &self,
        category: OptionCategory,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![Dynamic::from(category.as_str())];
        args.extend(tail(out, router));
        self.stream(ProviderOp::GetDynamicOptions, args)
    }

    fn add_package_source(
        &self,
        name: &str,
        location: &str,
        trusted: bool,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![
            Dynamic::from(name),
            Dynamic::from(location),
            Dynamic::from(trusted),
        ];
        args.extend(tail(out, router));
        self.stream(ProviderOp::AddPackageSource, args)
    }

    fn remove_package_source(
        &self,
        name: &str,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![Dynamic::from(name)];
        args.extend(tail(out, router));
        self.stream(ProviderOp::RemovePackageSource, args)
    }

    fn resolve_package_sources(&self, out: YieldFn, router: &CapabilityRouter) -> CallResult<()> {
        self.stream(ProviderOp::ResolvePackageSources, tail(out, router).into())
    }

    fn is_valid_package_source(&self, location: &str, router: &CapabilityRouter) -> CallResult<bool> {
        self.flag(
            ProviderOp::IsValidPackageSource,
            vec![Dynamic::from(location), Dynamic::Router(router.clone())],
        )
    }

    fn is_trusted_package_source(
        &self,
        location: &str,
        router: &CapabilityRouter,
    ) -> CallResult<bool> {
        self.flag(
            ProviderOp::IsTrustedPackageSource,
            vec![Dynamic::from(location), Dynamic::Router(router.clone())],
        )
    }

    fn find_package(
        &self,
        request: &FindRequest,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![
            Dynamic::from(request.name.as_str()),
            Dynamic::from(request.required_version.as_str()),
            Dynamic::from(request.minimum_version.as_str()),
            Dynamic::from(request.maximum_version.as_str()),
        ];
        args.extend(tail(out, router));
        self.stream(ProviderOp::FindPackage, args)
    }

    fn find_package_by_file(
        &self,
        file: &str,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![Dynamic::from(file)];
        args.extend(tail(out, router));
        self.stream(ProviderOp::FindPackageByFile, args)
    }

    fn find_package_by_uri(
        &self,
        uri: &str,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![Dynamic::from(uri)];
        args.extend(tail(out, router));
        self.stream(ProviderOp::FindPackageByUri, args)
    }

    fn installed_packages(
        &self,
        name: &str,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<()> {
        let mut args = vec![Dynamic::from(name)];
        args.extend(tail(out, router));
        self.stream(ProviderOp::GetInstalledPackages, args)
    }

    fn install_package(
        &self,
        fast_reference: &str,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<bool> {
        let mut args = vec![Dynamic::from(fast_reference)];
        args.extend(tail(out, router));
        self.flag(ProviderOp::InstallPackage, args)
    }

    fn uninstall_package(
        &self,
        fast_reference: &str,
        out: YieldFn,
        router: &CapabilityRouter,
    ) -> CallResult<bool> {
        let mut args = vec![Dynamic::from(fast_reference)];
        args.extend(tail(out, router));
        self.flag(ProviderOp::UninstallPackage, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::CapabilityBinder;
    use crate::candidate::DynamicObject;
    use crate::contract::PLUGIN_CONTRACT;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn bind(obj: DynamicObject) -> BoundProvider {
        let binder = CapabilityBinder::new();
        let adapter = binder.bind(&PROVIDER_CONTRACT, Arc::new(obj)).unwrap();
        BoundProvider::new(adapter).unwrap()
    }

    fn collector() -> (YieldFn, Arc<Mutex<Vec<Vec<serde_json::Value>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let f: YieldFn = Arc::new(move |t| {
            sink.lock().unwrap().push(t);
            true
        });
        (f, seen)
    }

    #[test]
    fn find_passes_arguments_in_contract_order() {
        let provider = bind(
            DynamicObject::builder("t.Finder")
                .method("GetPackageProviderName", &[], ValueKind::Str, |_| {
                    Ok(Dynamic::from("Finder"))
                })
                .method(
                    "findpackage",
                    &[
                        ValueKind::Str,
                        ValueKind::Str,
                        ValueKind::Str,
                        ValueKind::Str,
                        ValueKind::Callback,
                        ValueKind::Router,
                    ],
                    ValueKind::Unit,
                    |args| {
                        let name = args[0].as_str().unwrap_or_default().to_owned();
                        let min = args[2].as_str().unwrap_or_default().to_owned();
                        let out = args[4].as_callback().unwrap();
                        out(vec![json!(name), json!(min)]);
                        Ok(Dynamic::null())
                    },
                )
                .build(),
        );
        let (out, seen) = collector();
        let request = FindRequest::named("foo").with_range("1.0", "");
        provider
            .find_package(&request, out, &CapabilityRouter::empty())
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![json!("foo"), json!("1.0")]]);
    }

    #[test]
    fn absent_members_report_unsupported() {
        let provider = bind(
            DynamicObject::builder("t.Bare")
                .method("GetPackageProviderName", &[], ValueKind::Str, |_| {
                    Ok(Dynamic::from("Bare"))
                })
                .build(),
        );
        let router = CapabilityRouter::empty();
        let (out, _) = collector();
        assert!(provider.version().unwrap_err().is_unsupported());
        assert!(provider.installed_packages("", out, &router).unwrap_err().is_unsupported());
        assert!(provider.initialize(&router).is_ok());
    }

    #[test]
    fn wrong_return_value_is_reported() {
        let provider = bind(
            DynamicObject::builder("t.Liar")
                .method("GetPackageProviderName", &[], ValueKind::Any, |_| {
                    Ok(Dynamic::from(7_i64))
                })
                .build(),
        );
        assert!(matches!(
            provider.name(),
            Err(CallError::BadReturn {
                expected: ValueKind::Str,
                ..
            })
        ));
    }

    #[test]
    fn plugin_adapters_are_refused() {
        let binder = CapabilityBinder::new();
        let obj = DynamicObject::builder("t.Plugin")
            .method("GetPluginName", &[], ValueKind::Str, |_| Ok(Dynamic::from("p")))
            .method("GetProviderNames", &[], ValueKind::List, |_| {
                Ok(Dynamic::from(Vec::<String>::new()))
            })
            .method("CreateProvider", &[ValueKind::Str], ValueKind::Object, |_| {
                Err(CallError::failed("none"))
            })
            .build();
        let adapter = binder.bind(&PLUGIN_CONTRACT, Arc::new(obj)).unwrap();
        assert!(BoundProvider::new(adapter).is_none());
    }
}
