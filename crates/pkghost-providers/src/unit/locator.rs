//! Resolving unit locators to manifest files.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{HostError, HostResult};

/// Extension of unit manifest files.
pub const UNIT_EXTENSION: &str = "toml";

/// Where the host looks for bare unit names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Directory bare names are resolved against first.
    pub current_dir: PathBuf,
    /// The host's own directory, tried second.
    pub host_dir: PathBuf,
}

impl HostEnvironment {
    /// Create an environment from explicit directories.
    #[must_use]
    pub fn new(current_dir: impl Into<PathBuf>, host_dir: impl Into<PathBuf>) -> Self {
        Self {
            current_dir: current_dir.into(),
            host_dir: host_dir.into(),
        }
    }

    /// Detect from the process: the working directory and the directory of
    /// the running executable.
    ///
    /// # Errors
    ///
    /// [`HostError::Precondition`] if either cannot be determined.
    pub fn detect() -> HostResult<Self> {
        let current_dir = std::env::current_dir()
            .map_err(|e| HostError::Precondition(format!("cannot read working directory: {e}")))?;
        let exe = std::env::current_exe()
            .map_err(|e| HostError::Precondition(format!("cannot locate host executable: {e}")))?;
        let host_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| HostError::Precondition("host executable has no parent directory".into()))?;
        Ok(Self {
            current_dir,
            host_dir,
        })
    }
}

/// A unit reference as written by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitLocator {
    /// A filesystem path, with or without the `.toml` extension.
    Path(PathBuf),
    /// A bare name resolved against the host environment.
    Name(String),
}

impl UnitLocator {
    /// Classify a locator string.
    ///
    /// Absolute paths, anything containing a path separator and anything
    /// starting with `.` are paths; everything else is a bare name.
    ///
    /// # Errors
    ///
    /// [`HostError::StrongNameUnsupported`] for a bare name carrying a
    /// versioned identity (`zip, Version=1.0`), and
    /// [`HostError::UnitNotFound`] for an empty locator.
    pub fn parse(raw: &str) -> HostResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(HostError::UnitNotFound {
                locator: String::new(),
                searched: Vec::new(),
            });
        }
        let path = Path::new(raw);
        if path.is_absolute() || raw.contains(['/', '\\']) || raw.starts_with('.') {
            return Ok(Self::Path(path.to_path_buf()));
        }
        if raw.contains([',', '=']) {
            return Err(HostError::StrongNameUnsupported(raw.to_owned()));
        }
        Ok(Self::Name(raw.to_owned()))
    }

    /// Find the manifest this locator refers to.
    ///
    /// The returned path is canonical, so the same unit reached through two
    /// spellings compares equal.
    ///
    /// # Errors
    ///
    /// [`HostError::UnitNotFound`] listing every searched path, or
    /// [`HostError::Io`] if canonicalization fails.
    pub fn resolve(&self, env: &HostEnvironment) -> HostResult<PathBuf> {
        let searched = self.search_paths(env);
        for candidate in &searched {
            trace!(path = %candidate.display(), "Probing unit location");
            if candidate.is_file() {
                return Ok(candidate.canonicalize()?);
            }
        }
        Err(HostError::UnitNotFound {
            locator: self.to_string(),
            searched,
        })
    }

    fn search_paths(&self, env: &HostEnvironment) -> Vec<PathBuf> {
        match self {
            Self::Path(path) => {
                let base = if path.is_absolute() {
                    path.clone()
                } else {
                    env.current_dir.join(path)
                };
                with_extension_variant(&base)
            },
            Self::Name(name) => [&env.current_dir, &env.host_dir]
                .into_iter()
                .flat_map(|dir| with_extension_variant(&dir.join(name)))
                .collect(),
        }
    }
}

impl fmt::Display for UnitLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Name(n) => f.write_str(n),
        }
    }
}

fn with_extension_variant(path: &Path) -> Vec<PathBuf> {
    let has_ext = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(UNIT_EXTENSION));
    if has_ext {
        vec![path.to_path_buf()]
    } else {
        let mut with_ext = path.as_os_str().to_owned();
        with_ext.push(".");
        with_ext.push(UNIT_EXTENSION);
        vec![path.to_path_buf(), PathBuf::from(with_ext)]
    }
}
