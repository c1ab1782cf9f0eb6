//! Capability router.
//!
//! A single cloneable value that carries every host-supplied callback a
//! provider may need (logging, progress, confirmation prompts, option and
//! configuration lookup, cancellation) across the provider boundary,
//! indexed by capability name.
//!
//! Lookup is case-insensitive. A capability with no registered handler
//! yields a harmless default (`null`, which the typed wrappers read as
//! `false`, an empty list, `None`, or a no-op). Probing for an optional
//! capability never fails the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::error::{CallError, CallResult};
use crate::value::Dynamic;

/// Well-known capability names.
pub mod capability {
    /// `Debug(message)`
    pub const DEBUG: &str = "Debug";
    /// `Verbose(message)`
    pub const VERBOSE: &str = "Verbose";
    /// `Warning(message)`
    pub const WARNING: &str = "Warning";
    /// `Error(message)`
    pub const ERROR: &str = "Error";
    /// `Message(message)`: plain user-facing output.
    pub const MESSAGE: &str = "Message";
    /// `StartProgress(parentId, activity) -> Int`
    pub const START_PROGRESS: &str = "StartProgress";
    /// `ProgressUpdate(id, percent, message)`
    pub const PROGRESS_UPDATE: &str = "ProgressUpdate";
    /// `CompleteProgress(id, success)`
    pub const COMPLETE_PROGRESS: &str = "CompleteProgress";
    /// `ExceptionThrown(operation, message)`
    pub const EXCEPTION_THROWN: &str = "ExceptionThrown";
    /// `ShouldContinueWithUntrustedPackageSource(package, source) -> Bool`
    pub const SHOULD_CONTINUE_UNTRUSTED: &str = "ShouldContinueWithUntrustedPackageSource";
    /// `ShouldProcessPackageInstall(name, version, source) -> Bool`
    pub const SHOULD_PROCESS_INSTALL: &str = "ShouldProcessPackageInstall";
    /// `ShouldProcessPackageUninstall(name, version) -> Bool`
    pub const SHOULD_PROCESS_UNINSTALL: &str = "ShouldProcessPackageUninstall";
    /// `AskPermission(permission) -> Bool`
    pub const ASK_PERMISSION: &str = "AskPermission";
    /// `GetOptionKeys() -> List`
    pub const GET_OPTION_KEYS: &str = "GetOptionKeys";
    /// `GetOptionValues(key) -> List`
    pub const GET_OPTION_VALUES: &str = "GetOptionValues";
    /// `GetConfiguration(key) -> Str`
    pub const GET_CONFIGURATION: &str = "GetConfiguration";
    /// `GetPackageSources() -> List`
    pub const GET_PACKAGE_SOURCES: &str = "GetPackageSources";
    /// `IsCancelled() -> Bool`
    pub const IS_CANCELLED: &str = "IsCancelled";
    /// `GetRouter() -> Router`: the router itself, for re-entrant nesting.
    pub const GET_ROUTER: &str = "GetRouter";
}

/// A type-erased capability handler.
pub type CapabilityHandler = Arc<dyn Fn(&[Dynamic]) -> CallResult<Dynamic> + Send + Sync>;

/// Errors from [`CapabilityRouter::try_dispatch`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// No handler is registered under this name.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// The handler ran and failed.
    #[error("capability {capability} failed: {source}")]
    Failed {
        /// Capability name as requested.
        capability: String,
        /// The handler's error.
        #[source]
        source: CallError,
    },
}

struct RouterInner {
    handlers: HashMap<String, CapabilityHandler>,
    parent: Option<CapabilityRouter>,
}

/// Name-indexed bundle of host capabilities.
#[derive(Clone)]
pub struct CapabilityRouter {
    inner: Arc<RouterInner>,
}

impl CapabilityRouter {
    /// Start building a router.
    #[must_use]
    pub fn builder() -> CapabilityRouterBuilder {
        CapabilityRouterBuilder {
            handlers: HashMap::new(),
            parent: None,
        }
    }

    /// A router with no capabilities: every lookup yields the default.
    #[must_use]
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// A router whose text and progress capabilities write to `tracing`.
    ///
    /// Confirmation and lookup capabilities are left unset, so prompts are
    /// declined and lookups come back empty. Hosts layer their own on top.
    #[must_use]
    pub fn tracing() -> Self {
        Self::builder()
            .with_text_sink(capability::DEBUG, |m| debug!(target: "pkghost::provider", "{m}"))
            .with_text_sink(capability::VERBOSE, |m| {
                debug!(target: "pkghost::provider", verbose = true, "{m}");
            })
            .with_text_sink(capability::MESSAGE, |m| info!(target: "pkghost::provider", "{m}"))
            .with_text_sink(capability::WARNING, |m| warn!(target: "pkghost::provider", "{m}"))
            .with_text_sink(capability::ERROR, |m| error!(target: "pkghost::provider", "{m}"))
            .with(capability::PROGRESS_UPDATE, |args| {
                trace!(
                    target: "pkghost::provider",
                    id = args.first().and_then(Dynamic::as_i64),
                    percent = args.get(1).and_then(Dynamic::as_i64),
                    message = args.get(2).and_then(Dynamic::as_str),
                    "progress"
                );
                Ok(Dynamic::null())
            })
            .build()
    }

    /// Start building a child router that overrides some of this router's
    /// handlers and falls back to it for everything else.
    #[must_use]
    pub fn layered(&self) -> CapabilityRouterBuilder {
        CapabilityRouterBuilder {
            handlers: HashMap::new(),
            parent: Some(self.clone()),
        }
    }

    /// Whether a handler is registered for `name` (here or in a parent).
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.handler(&name.to_ascii_lowercase()).is_some()
    }

    /// Dispatch, reporting absent capabilities and handler failures.
    ///
    /// `GetRouter` is always answered: with its handler if one is set,
    /// otherwise with this router.
    ///
    /// # Errors
    ///
    /// [`RouterError::UnknownCapability`] if nothing handles `name`,
    /// [`RouterError::Failed`] if the handler fails.
    pub fn try_dispatch(&self, name: &str, args: &[Dynamic]) -> Result<Dynamic, RouterError> {
        let key = name.to_ascii_lowercase();
        match self.handler(&key) {
            Some(handler) => handler(args).map_err(|source| RouterError::Failed {
                capability: name.to_owned(),
                source,
            }),
            None if key.eq_ignore_ascii_case(capability::GET_ROUTER) => {
                Ok(Dynamic::Router(self.clone()))
            },
            None => Err(RouterError::UnknownCapability(name.to_owned())),
        }
    }

    /// Dispatch, substituting the default `null` for any failure.
    #[must_use]
    pub fn dispatch(&self, name: &str, args: &[Dynamic]) -> Dynamic {
        match self.try_dispatch(name, args) {
            Ok(v) => v,
            Err(RouterError::UnknownCapability(_)) => {
                trace!(capability = name, "Capability not provided; using default");
                Dynamic::null()
            },
            Err(e) => {
                debug!(capability = name, error = %e, "Capability handler failed; using default");
                Dynamic::null()
            },
        }
    }

    fn handler(&self, key: &str) -> Option<&CapabilityHandler> {
        self.inner
            .handlers
            .get(key)
            .or_else(|| self.inner.parent.as_ref().and_then(|p| p.handler(key)))
    }

    // -----------------------------------------------------------------
    // Typed wrappers
    // -----------------------------------------------------------------

    /// Fire a capability whose answer is ignored. Returns whether a handler
    /// took it.
    fn notify(&self, name: &str, args: &[Dynamic]) -> bool {
        match self.try_dispatch(name, args) {
            Ok(_) => true,
            Err(RouterError::UnknownCapability(_)) => {
                trace!(capability = name, "Notification not provided");
                false
            },
            Err(e) => {
                debug!(capability = name, error = %e, "Notification handler failed");
                false
            },
        }
    }

    /// Debug-level text.
    pub fn debug(&self, message: &str) {
        self.notify(capability::DEBUG, &[Dynamic::from(message)]);
    }

    /// Verbose text.
    pub fn verbose(&self, message: &str) {
        self.notify(capability::VERBOSE, &[Dynamic::from(message)]);
    }

    /// Plain user-facing text.
    pub fn message(&self, message: &str) {
        self.notify(capability::MESSAGE, &[Dynamic::from(message)]);
    }

    /// Warning text.
    pub fn warning(&self, message: &str) {
        self.notify(capability::WARNING, &[Dynamic::from(message)]);
    }

    /// Error text.
    pub fn error(&self, message: &str) {
        self.notify(capability::ERROR, &[Dynamic::from(message)]);
    }

    /// Begin a progress activity; returns its id (0 when unsupported).
    #[must_use]
    pub fn start_progress(&self, parent: i64, activity: &str) -> i64 {
        self.dispatch(
            capability::START_PROGRESS,
            &[Dynamic::from(parent), Dynamic::from(activity)],
        )
        .as_i64()
        .unwrap_or(0)
    }

    /// Report progress on an activity.
    pub fn progress_update(&self, id: i64, percent: i64, message: &str) {
        self.notify(
            capability::PROGRESS_UPDATE,
            &[
                Dynamic::from(id),
                Dynamic::from(percent),
                Dynamic::from(message),
            ],
        );
    }

    /// Finish a progress activity.
    pub fn complete_progress(&self, id: i64, success: bool) {
        self.notify(
            capability::COMPLETE_PROGRESS,
            &[Dynamic::from(id), Dynamic::from(success)],
        );
    }

    /// Report an error raised by an operation.
    pub fn exception_thrown(&self, operation: &str, message: &str) {
        self.notify(
            capability::EXCEPTION_THROWN,
            &[Dynamic::from(operation), Dynamic::from(message)],
        );
    }

    /// Ask whether to install `package` from the untrusted `source`.
    ///
    /// An absent capability reads as "no".
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Failed`] if the prompt itself failed, so the
    /// caller can tell a refusal from a broken prompt.
    pub fn should_continue_with_untrusted_source(
        &self,
        package: &str,
        source: &str,
    ) -> Result<bool, RouterError> {
        match self.try_dispatch(
            capability::SHOULD_CONTINUE_UNTRUSTED,
            &[Dynamic::from(package), Dynamic::from(source)],
        ) {
            Ok(v) => Ok(v.as_bool().unwrap_or(false)),
            Err(RouterError::UnknownCapability(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Ask whether to go ahead with an install. Absent capability: yes.
    #[must_use]
    pub fn should_process_package_install(&self, name: &str, version: &str, source: &str) -> bool {
        self.consent(
            capability::SHOULD_PROCESS_INSTALL,
            &[
                Dynamic::from(name),
                Dynamic::from(version),
                Dynamic::from(source),
            ],
        )
    }

    /// Ask whether to go ahead with an uninstall. Absent capability: yes.
    #[must_use]
    pub fn should_process_package_uninstall(&self, name: &str, version: &str) -> bool {
        self.consent(
            capability::SHOULD_PROCESS_UNINSTALL,
            &[Dynamic::from(name), Dynamic::from(version)],
        )
    }

    /// Ask for a named permission. Absent capability: no.
    #[must_use]
    pub fn ask_permission(&self, permission: &str) -> bool {
        self.dispatch(capability::ASK_PERMISSION, &[Dynamic::from(permission)])
            .as_bool()
            .unwrap_or(false)
    }

    /// Keys of the caller-supplied dynamic options.
    #[must_use]
    pub fn option_keys(&self) -> Vec<String> {
        self.list(capability::GET_OPTION_KEYS, &[])
    }

    /// Values of one caller-supplied dynamic option.
    #[must_use]
    pub fn option_values(&self, key: &str) -> Vec<String> {
        self.list(capability::GET_OPTION_VALUES, &[Dynamic::from(key)])
    }

    /// A host configuration string.
    #[must_use]
    pub fn configuration(&self, key: &str) -> Option<String> {
        self.dispatch(capability::GET_CONFIGURATION, &[Dynamic::from(key)])
            .as_str()
            .map(str::to_owned)
    }

    /// Source names the caller asked for.
    #[must_use]
    pub fn package_sources(&self) -> Vec<String> {
        self.list(capability::GET_PACKAGE_SOURCES, &[])
    }

    /// Whether the caller has asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.dispatch(capability::IS_CANCELLED, &[])
            .as_bool()
            .unwrap_or(false)
    }

    /// The router to use for nested calls.
    #[must_use]
    pub fn nested(&self) -> Self {
        match self.dispatch(capability::GET_ROUTER, &[]) {
            Dynamic::Router(r) => r,
            _ => self.clone(),
        }
    }

    fn list(&self, name: &str, args: &[Dynamic]) -> Vec<String> {
        self.dispatch(name, args).to_string_list().unwrap_or_default()
    }

    fn consent(&self, name: &str, args: &[Dynamic]) -> bool {
        match self.try_dispatch(name, args) {
            Ok(v) => v.as_bool().unwrap_or(false),
            Err(RouterError::UnknownCapability(_)) => true,
            Err(e) => {
                debug!(capability = name, error = %e, "Consent prompt failed; treating as declined");
                false
            },
        }
    }
}

impl Default for CapabilityRouter {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for CapabilityRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.inner.handlers.keys().collect();
        names.sort();
        f.debug_struct("CapabilityRouter")
            .field("capabilities", &names)
            .field("layered", &self.inner.parent.is_some())
            .finish()
    }
}

/// Builder for [`CapabilityRouter`].
pub struct CapabilityRouterBuilder {
    handlers: HashMap<String, CapabilityHandler>,
    parent: Option<CapabilityRouter>,
}

impl CapabilityRouterBuilder {
    /// Register a raw handler. A later registration under the same name
    /// replaces the earlier one.
    #[must_use]
    pub fn with<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&[Dynamic]) -> CallResult<Dynamic> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_ascii_lowercase(), Arc::new(handler));
        self
    }

    /// Register a handler that receives the first argument as text.
    #[must_use]
    pub fn with_text_sink<F>(self, name: &str, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.with(name, move |args| {
            let text = match args.first() {
                Some(Dynamic::Value(Value::String(s))) => s.as_str(),
                _ => "",
            };
            sink(text);
            Ok(Dynamic::null())
        })
    }

    /// Register a yes/no handler.
    #[must_use]
    pub fn with_predicate<F>(self, name: &str, predicate: F) -> Self
    where
        F: Fn(&[Dynamic]) -> bool + Send + Sync + 'static,
    {
        self.with(name, move |args| Ok(Dynamic::from(predicate(args))))
    }

    /// Register a handler returning a list of strings.
    #[must_use]
    pub fn with_list<F>(self, name: &str, list: F) -> Self
    where
        F: Fn(&[Dynamic]) -> Vec<String> + Send + Sync + 'static,
    {
        self.with(name, move |args| Ok(Dynamic::from(list(args))))
    }

    /// Finish the router.
    #[must_use]
    pub fn build(self) -> CapabilityRouter {
        CapabilityRouter {
            inner: Arc::new(RouterInner {
                handlers: self.handlers,
                parent: self.parent,
            }),
        }
    }
}
