//! Scoped guards over the process-wide environment and working directory
//!
//! Both are global state shared by every thread. Callers that create
//! guards from several threads must serialize them: guards restore in
//! drop order, and two guards unwinding out of order leave the
//! environment in whatever state the last one recorded.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{Result, SubprocessError};
use crate::types::EnvMap;

/// Copy of the current environment
///
/// Variables whose name or value is not valid UTF-8 are skipped.
pub fn current_env_copy() -> EnvMap {
    env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Settable view over one environment variable of this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    name: String,
}

/// View over the variable `name`
pub fn var(name: impl Into<String>) -> EnvVar {
    EnvVar { name: name.into() }
}

impl EnvVar {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value, `None` when unset or not valid UTF-8
    pub fn get(&self) -> Option<String> {
        env::var(&self.name).ok()
    }

    pub fn is_set(&self) -> bool {
        env::var_os(&self.name).is_some()
    }

    /// Set the variable to the display form of `value`
    pub fn set(&self, value: impl fmt::Display) -> &Self {
        env::set_var(&self.name, value.to_string());
        self
    }

    /// Set the variable to `1` or `0`
    pub fn set_flag(&self, value: bool) -> &Self {
        self.set(if value { "1" } else { "0" })
    }

    /// Set or unset depending on `value`
    pub fn set_opt(&self, value: Option<&str>) -> &Self {
        match value {
            Some(value) => self.set(value),
            None => self.unset(),
        }
    }

    pub fn unset(&self) -> &Self {
        env::remove_var(&self.name);
        self
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get().unwrap_or_default())
    }
}

/// Restores the working directory on drop
#[derive(Debug)]
pub struct CwdGuard {
    cwd: PathBuf,
}

impl CwdGuard {
    pub fn new() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| SubprocessError::os("getcwd", e))?;
        Ok(Self { cwd })
    }

    /// Directory that will be restored
    pub fn saved(&self) -> &PathBuf {
        &self.cwd
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.cwd) {
            warn!(cwd = %self.cwd.display(), error = %e, "Failed to restore working directory");
        }
    }
}

/// Snapshot of the environment and working directory, restored on drop
#[derive(Debug)]
pub struct EnvGuard {
    vars: BTreeMap<OsString, OsString>,
    _cwd: CwdGuard,
}

impl EnvGuard {
    pub fn new() -> Result<Self> {
        Ok(Self {
            vars: env::vars_os().collect(),
            _cwd: CwdGuard::new()?,
        })
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, _) in env::vars_os() {
            if !self.vars.contains_key(&name) {
                env::remove_var(&name);
            }
        }
        for (name, value) in &self.vars {
            if env::var_os(name).as_ref() != Some(value) {
                env::set_var(name, value);
            }
        }
    }
}

/// Run `f` with `overlay` applied on top of the current environment
///
/// The previous environment and working directory are restored afterwards,
/// including when `f` panics.
pub fn with_env_overlay<R>(overlay: &EnvMap, f: impl FnOnce() -> R) -> Result<R> {
    let _guard = EnvGuard::new()?;
    for (name, value) in overlay {
        env::set_var(name, value);
    }
    Ok(f())
}
