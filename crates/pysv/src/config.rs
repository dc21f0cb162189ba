//! Bridge configuration.
//!
//! The configuration surface is small: directories that must be visible on
//! `sys.path`, and an optional bundled runtime home/path pair used only when the
//! host process has no Python search variables of its own. Defaults are baked in
//! at compile time from `PYSV_SYS_PATH`, `PYSV_PYTHON_HOME` and `PYSV_PYTHON_PATH`.

use std::{env, ffi::OsString, path::PathBuf};

/// A runtime home and module search path to hand the interpreter at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHome {
    /// Value for `PYTHONHOME`.
    pub home: OsString,
    /// Value for `PYTHONPATH`.
    pub path: OsString,
}

/// Settings applied when the interpreter boots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Directories appended to `sys.path` if not already present.
    pub sys_paths: Vec<PathBuf>,
    /// Bundled runtime injected when the host sets neither search variable.
    pub runtime: Option<RuntimeHome>,
}

impl BridgeConfig {
    /// The configuration compiled into this build.
    #[must_use]
    pub fn from_build_env() -> Self {
        Self::from_parts(
            option_env!("PYSV_SYS_PATH"),
            option_env!("PYSV_PYTHON_HOME"),
            option_env!("PYSV_PYTHON_PATH"),
        )
    }

    fn from_parts(sys_path: Option<&str>, python_home: Option<&str>, python_path: Option<&str>) -> Self {
        let sys_paths = sys_path
            .map(|paths| env::split_paths(paths).filter(|path| !path.as_os_str().is_empty()).collect())
            .unwrap_or_default();
        let runtime = python_home.filter(|home| !home.is_empty()).map(|home| RuntimeHome {
            home: home.into(),
            path: python_path.unwrap_or_default().into(),
        });
        Self { sys_paths, runtime }
    }

    #[must_use]
    pub fn with_sys_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, home: impl Into<OsString>, path: impl Into<OsString>) -> Self {
        self.runtime = Some(RuntimeHome {
            home: home.into(),
            path: path.into(),
        });
        self
    }
}
