//! Environment isolation around interpreter boot.
//!
//! CPython reads `PYTHONHOME` and `PYTHONPATH` exactly once, while booting. A
//! host simulator may have them pointing at an unrelated installation, so when
//! either is set both are hidden for the boot and put back afterwards for any
//! other component of the process that relies on them. When neither is set, a
//! bundled runtime home/path pair may be injected instead.

use std::{env, ffi::OsString};

use crate::config::RuntimeHome;

pub const PYTHONHOME: &str = "PYTHONHOME";
pub const PYTHONPATH: &str = "PYTHONPATH";

/// What the guard did to the process environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum EnvAction {
    /// Nothing set, nothing injected.
    Untouched,
    /// Nothing set; the configured runtime home/path were injected and stay set.
    Injected,
    /// Host values were hidden for the boot and are restored when the guard drops.
    Restored,
}

#[derive(Debug)]
struct SavedVars {
    home: Option<OsString>,
    path: Option<OsString>,
}

/// Scoped isolation of the Python search variables.
///
/// Restoration happens in `Drop`, so it runs on every exit path of the boot,
/// including a panic.
#[derive(Debug)]
#[must_use = "the environment is restored when the guard is dropped"]
pub struct EnvIsolation {
    saved: Option<SavedVars>,
    action: EnvAction,
}

impl EnvIsolation {
    /// Prepares the environment for booting the interpreter.
    ///
    /// # Safety
    ///
    /// Mutates the process environment. No other thread may read or write the
    /// environment until the returned guard is dropped.
    pub unsafe fn engage(runtime: Option<&RuntimeHome>) -> Self {
        let home = env::var_os(PYTHONHOME);
        let path = env::var_os(PYTHONPATH);

        if home.is_none() && path.is_none() {
            let Some(runtime) = runtime else {
                return Self {
                    saved: None,
                    action: EnvAction::Untouched,
                };
            };
            // SAFETY: the caller holds the environment exclusively.
            unsafe {
                env::set_var(PYTHONHOME, &runtime.home);
                env::set_var(PYTHONPATH, &runtime.path);
            }
            tracing::debug!(home = ?runtime.home, "injected bundled runtime");
            return Self {
                saved: None,
                action: EnvAction::Injected,
            };
        }

        tracing::warn!(?home, ?path, "hiding host Python search variables during interpreter boot");
        // SAFETY: the caller holds the environment exclusively.
        unsafe {
            env::remove_var(PYTHONHOME);
            env::remove_var(PYTHONPATH);
        }
        Self {
            saved: Some(SavedVars { home, path }),
            action: EnvAction::Restored,
        }
    }

    #[must_use]
    pub fn action(&self) -> EnvAction {
        self.action
    }
}

impl Drop for EnvIsolation {
    fn drop(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        for (name, value) in [(PYTHONHOME, saved.home), (PYTHONPATH, saved.path)] {
            // SAFETY: `engage`'s caller still holds the environment exclusively.
            unsafe {
                match value {
                    Some(value) => env::set_var(name, value),
                    None => env::remove_var(name),
                }
            }
        }
        tracing::debug!("restored host Python search variables");
    }
}
