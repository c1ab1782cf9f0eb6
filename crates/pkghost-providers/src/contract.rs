//! Contract descriptors.
//!
//! A contract is a named table of member signatures, some required and some
//! optional. The two contracts the host knows about are
//! [`PROVIDER_CONTRACT`] and [`PLUGIN_CONTRACT`]; [`ProviderOp`] and
//! [`PluginOp`] index into their member tables.

use crate::value::{Signature, ValueKind};

use ValueKind::{Bool, Callback, List, Object, Router, Str, Unit};

/// One member a contract declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSpec {
    /// Member name (matched case-insensitively).
    pub name: &'static str,
    /// Parameter kinds.
    pub params: &'static [ValueKind],
    /// Return kind. `Unit` accepts any return.
    pub returns: ValueKind,
    /// Whether a candidate must provide this member to bind.
    pub required: bool,
}

impl MemberSpec {
    /// Whether a candidate member with signature `sig` satisfies this spec.
    ///
    /// Every argument the host passes must be accepted by the candidate's
    /// parameter, and the candidate's return must be usable as the declared
    /// return. An untyped (`Any`) return is accepted here and checked per
    /// call instead.
    #[must_use]
    pub fn accepts(&self, sig: &Signature) -> bool {
        if sig.params.len() != self.params.len() {
            return false;
        }
        let params_ok = self
            .params
            .iter()
            .zip(&sig.params)
            .all(|(ours, theirs)| ours.is_assignable_to(*theirs));
        params_ok
            && (self.returns == Unit
                || sig.returns == ValueKind::Any
                || sig.returns.is_assignable_to(self.returns))
    }

    /// Action members return nothing; calling an absent one is a no-op.
    #[must_use]
    pub fn is_action(&self) -> bool {
        self.returns == Unit
    }
}

/// A named set of member signatures.
#[derive(Debug, PartialEq, Eq)]
pub struct Contract {
    /// Contract name, also the memoization key.
    pub name: &'static str,
    /// Members in slot order.
    pub members: &'static [MemberSpec],
}

impl Contract {
    /// Find a member slot by (case-insensitive) name.
    #[must_use]
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Required members.
    pub fn required(&self) -> impl Iterator<Item = &MemberSpec> {
        self.members.iter().filter(|m| m.required)
    }
}

const fn required(
    name: &'static str,
    params: &'static [ValueKind],
    returns: ValueKind,
) -> MemberSpec {
    MemberSpec {
        name,
        params,
        returns,
        required: true,
    }
}

const fn optional(
    name: &'static str,
    params: &'static [ValueKind],
    returns: ValueKind,
) -> MemberSpec {
    MemberSpec {
        name,
        params,
        returns,
        required: false,
    }
}

/// Slots of [`PROVIDER_CONTRACT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ProviderOp {
    /// `GetPackageProviderName() -> Str`
    GetName,
    /// `GetProviderVersion() -> Str`
    GetVersion,
    /// `InitializeProvider(Router)`
    Initialize,
    /// `GetFeatures(Callback, Router)`
    GetFeatures,
    /// `GetDynamicOptions(category, Callback, Router)`
    GetDynamicOptions,
    /// `AddPackageSource(name, location, trusted, Callback, Router)`
    AddPackageSource,
    /// `RemovePackageSource(name, Callback, Router)`
    RemovePackageSource,
    /// `ResolvePackageSources(Callback, Router)`
    ResolvePackageSources,
    /// `IsValidPackageSource(location, Router) -> Bool`
    IsValidPackageSource,
    /// `IsTrustedPackageSource(location, Router) -> Bool`
    IsTrustedPackageSource,
    /// `FindPackage(name, required, minimum, maximum, Callback, Router)`
    FindPackage,
    /// `FindPackageByFile(file, Callback, Router)`
    FindPackageByFile,
    /// `FindPackageByUri(uri, Callback, Router)`
    FindPackageByUri,
    /// `GetInstalledPackages(name, Callback, Router)`
    GetInstalledPackages,
    /// `InstallPackage(fastReference, Callback, Router) -> Bool`
    InstallPackage,
    /// `UninstallPackage(fastReference, Callback, Router) -> Bool`
    UninstallPackage,
}

impl ProviderOp {
    /// Slot index in [`PROVIDER_CONTRACT`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The package-provider contract.
pub static PROVIDER_CONTRACT: Contract = Contract {
    name: "PackageProvider",
    members: &[
        required("GetPackageProviderName", &[], Str),
        optional("GetProviderVersion", &[], Str),
        optional("InitializeProvider", &[Router], Unit),
        optional("GetFeatures", &[Callback, Router], Unit),
        optional("GetDynamicOptions", &[Str, Callback, Router], Unit),
        optional(
            "AddPackageSource",
            &[Str, Str, Bool, Callback, Router],
            Unit,
        ),
        optional("RemovePackageSource", &[Str, Callback, Router], Unit),
        optional("ResolvePackageSources", &[Callback, Router], Unit),
        optional("IsValidPackageSource", &[Str, Router], Bool),
        optional("IsTrustedPackageSource", &[Str, Router], Bool),
        optional(
            "FindPackage",
            &[Str, Str, Str, Str, Callback, Router],
            Unit,
        ),
        optional("FindPackageByFile", &[Str, Callback, Router], Unit),
        optional("FindPackageByUri", &[Str, Callback, Router], Unit),
        optional("GetInstalledPackages", &[Str, Callback, Router], Unit),
        optional("InstallPackage", &[Str, Callback, Router], Bool),
        optional("UninstallPackage", &[Str, Callback, Router], Bool),
    ],
};

/// Slots of [`PLUGIN_CONTRACT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PluginOp {
    /// `GetPluginName() -> Str`
    GetName,
    /// `GetProviderNames() -> List`
    GetProviderNames,
    /// `CreateProvider(name) -> Object`
    CreateProvider,
    /// `InitializePlugin(Router)`
    Initialize,
    /// `Dispose()`
    Dispose,
}

impl PluginOp {
    /// Slot index in [`PLUGIN_CONTRACT`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The plugin contract: a factory of providers.
pub static PLUGIN_CONTRACT: Contract = Contract {
    name: "ProviderPlugin",
    members: &[
        required("GetPluginName", &[], Str),
        required("GetProviderNames", &[], List),
        required("CreateProvider", &[Str], Object),
        optional("InitializePlugin", &[Router], Unit),
        optional("Dispose", &[], Unit),
    ],
};
