//! Console-backed capability router.
//!
//! Diagnostics go to stderr, prompts go through `dialoguer`, and progress
//! activities become `indicatif` bars. Cancellation is a flag set by Ctrl-C.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pkghost_providers::router::capability;
use pkghost_providers::{CallError, CallResult, CapabilityRouter, Dynamic};

use crate::theme::Theme;

/// What the console answers on the user's behalf.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConsoleOptions {
    /// Answer every confirmation with yes.
    pub(crate) assume_yes: bool,
    /// Show verbose provider output.
    pub(crate) verbose: bool,
    /// Source names to restrict providers to.
    pub(crate) sources: Vec<String>,
    /// `key=value` dynamic options, grouped by key.
    pub(crate) options: Vec<(String, String)>,
    /// Values returned for `GetConfiguration`.
    pub(crate) configuration: HashMap<String, String>,
}

/// The interactive collaborator behind every provider call.
pub(crate) struct Console {
    options: Arc<ConsoleOptions>,
    cancelled: Arc<AtomicBool>,
    progress: Arc<ProgressBoard>,
}

impl Console {
    pub(crate) fn new(options: ConsoleOptions) -> Self {
        Self {
            options: Arc::new(options),
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(ProgressBoard::default()),
        }
    }

    /// Flag read by `IsCancelled`.
    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Build the router handed to the host and every provider call.
    pub(crate) fn router(&self) -> CapabilityRouter {
        let verbose = self.options.verbose;
        let opts = Arc::clone(&self.options);
        let keys_opts = Arc::clone(&self.options);
        let values_opts = Arc::clone(&self.options);
        let config_opts = Arc::clone(&self.options);
        let cancelled = Arc::clone(&self.cancelled);
        let start = Arc::clone(&self.progress);
        let update = Arc::clone(&self.progress);
        let complete = Arc::clone(&self.progress);
        let yes = self.options.assume_yes;

        CapabilityRouter::builder()
            .with_text_sink(capability::WARNING, |m| eprintln!("{}", Theme::warning(m)))
            .with_text_sink(capability::ERROR, |m| eprintln!("{}", Theme::error(m)))
            .with_text_sink(capability::MESSAGE, |m| println!("{m}"))
            .with_text_sink(capability::VERBOSE, move |m| {
                if verbose {
                    eprintln!("{}", Theme::dimmed(m));
                }
            })
            .with_text_sink(capability::DEBUG, |m| tracing::debug!(target: "provider", "{m}"))
            .with(capability::EXCEPTION_THROWN, |args| {
                eprintln!(
                    "{}",
                    Theme::error(&format!("{}: {}", str_arg(args, 0), str_arg(args, 1)))
                );
                Ok(Dynamic::null())
            })
            .with(capability::START_PROGRESS, move |args| {
                Ok(Dynamic::from(start.start(str_arg(args, 1))))
            })
            .with(capability::PROGRESS_UPDATE, move |args| {
                update.update(int_arg(args, 0), int_arg(args, 1), str_arg(args, 2));
                Ok(Dynamic::null())
            })
            .with(capability::COMPLETE_PROGRESS, move |args| {
                let success = args.get(1).and_then(Dynamic::as_bool).unwrap_or(false);
                complete.complete(int_arg(args, 0), success);
                Ok(Dynamic::null())
            })
            .with(capability::SHOULD_CONTINUE_UNTRUSTED, move |args| {
                let prompt = format!(
                    "Package '{}' comes from untrusted source '{}'. Install anyway?",
                    str_arg(args, 0),
                    str_arg(args, 1)
                );
                confirm(yes, &prompt, false).map(Dynamic::from)
            })
            .with(capability::SHOULD_PROCESS_INSTALL, move |args| {
                let prompt = format!("Install {} {}?", str_arg(args, 0), str_arg(args, 1));
                confirm(yes, &prompt, true).map(Dynamic::from)
            })
            .with(capability::SHOULD_PROCESS_UNINSTALL, move |args| {
                let prompt = format!("Uninstall {} {}?", str_arg(args, 0), str_arg(args, 1));
                confirm(yes, &prompt, true).map(Dynamic::from)
            })
            .with(capability::ASK_PERMISSION, move |args| {
                let prompt = format!("Allow {}?", str_arg(args, 0));
                confirm(yes, &prompt, false).map(Dynamic::from)
            })
            .with_list(capability::GET_PACKAGE_SOURCES, move |_| opts.sources.clone())
            .with_list(capability::GET_OPTION_KEYS, move |_| option_keys(&keys_opts.options))
            .with_list(capability::GET_OPTION_VALUES, move |args| {
                let key = str_arg(args, 0);
                values_opts
                    .options
                    .iter()
                    .filter(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .with(capability::GET_CONFIGURATION, move |args| {
                Ok(config_opts
                    .configuration
                    .get(str_arg(args, 0))
                    .map_or_else(Dynamic::null, |v| Dynamic::from(v.as_str())))
            })
            .with_predicate(capability::IS_CANCELLED, move |_| cancelled.load(Ordering::SeqCst))
            .build()
    }
}

fn confirm(assume_yes: bool, prompt: &str, default: bool) -> CallResult<bool> {
    if assume_yes {
        return Ok(true);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default)
        .interact()
        .map_err(|e| CallError::failed(format!("prompt failed: {e}")))
}

/// Distinct option keys in first-seen order, compared case-insensitively.
fn option_keys(options: &[(String, String)]) -> Vec<String> {
    let mut seen = HashSet::new();
    options
        .iter()
        .filter(|(k, _)| seen.insert(k.to_ascii_lowercase()))
        .map(|(k, _)| k.clone())
        .collect()
}

fn str_arg(args: &[Dynamic], index: usize) -> &str {
    args.get(index).and_then(Dynamic::as_str).unwrap_or_default()
}

fn int_arg(args: &[Dynamic], index: usize) -> i64 {
    args.get(index).and_then(Dynamic::as_i64).unwrap_or(0)
}

/// Live progress bars keyed by activity id.
#[derive(Default)]
struct ProgressBoard {
    multi: MultiProgress,
    bars: Mutex<HashMap<i64, ProgressBar>>,
    next_id: AtomicI64,
}

impl ProgressBoard {
    fn start(&self, activity: &str) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} [{bar:30}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(style);
        bar.set_prefix(activity.to_owned());
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(id, bar);
        }
        id
    }

    fn update(&self, id: i64, percent: i64, message: &str) {
        if let Ok(bars) = self.bars.lock()
            && let Some(bar) = bars.get(&id)
        {
            bar.set_position(u64::try_from(percent.clamp(0, 100)).unwrap_or(0));
            bar.set_message(message.to_owned());
        }
    }

    fn complete(&self, id: i64, success: bool) {
        let bar = self.bars.lock().ok().and_then(|mut bars| bars.remove(&id));
        if let Some(bar) = bar {
            if success {
                bar.finish_with_message("done");
            } else {
                bar.abandon_with_message("failed");
            }
        }
    }
}
