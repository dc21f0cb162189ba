//! Interpreter lifecycle: one embedded interpreter per process.
//!
//! ```text
//! Uninitialized ──ensure_running──▶ Running ──finalize──▶ Finalized
//! ```
//!
//! The interpreter boots lazily on the first foreign call and is torn down
//! once, by an explicit finalize. Finalized is terminal: any later bridge
//! operation fails with [`BridgeError::Finalized`].
//!
//! Teardown releases the import cache, the class definition cache and the
//! object registry, in that order, while the interpreter is still alive, and
//! only then finalizes the interpreter itself.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicU8, Ordering},
};

use parking_lot::{Mutex, const_mutex};
use pyo3::{ffi, prelude::*};

use crate::{
    class_defs,
    config::BridgeConfig,
    env::{EnvAction, EnvIsolation},
    error::{BridgeError, BridgeResult},
    imports, logging, registry,
};

const UNINITIALIZED: u8 = 0;
const RUNNING: u8 = 1;
const FINALIZED: u8 = 2;

/// Where the process-wide interpreter is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Finalized,
}

/// How the interpreter came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    /// The bridge booted the interpreter and will finalize it on teardown.
    /// False when the host had already initialized Python.
    pub owns_interpreter: bool,
    /// What the environment guard did around the boot.
    pub env: EnvAction,
}

/// One step of teardown, in the order teardown runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TeardownStage {
    Imports,
    ClassDefs,
    Objects,
    Interpreter,
}

/// What teardown released, step by step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<(TeardownStage, usize)>,
}

impl TeardownReport {
    #[must_use]
    pub fn stages(&self) -> Vec<TeardownStage> {
        self.steps.iter().map(|(stage, _)| *stage).collect()
    }

    /// Number of references released at `stage`, if that stage ran.
    #[must_use]
    pub fn released(&self, stage: TeardownStage) -> Option<usize> {
        self.steps.iter().find(|(s, _)| *s == stage).map(|(_, count)| *count)
    }

    fn record(&mut self, stage: TeardownStage, released: usize) {
        self.steps.push((stage, released));
    }
}

struct Lifecycle {
    config: Option<BridgeConfig>,
    boot: Option<BootRecord>,
    boots: usize,
}

static STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);
static LIFECYCLE: Mutex<Lifecycle> = const_mutex(Lifecycle {
    config: None,
    boot: None,
    boots: 0,
});

#[must_use]
pub fn state() -> LifecycleState {
    match STATE.load(Ordering::Acquire) {
        UNINITIALIZED => LifecycleState::Uninitialized,
        RUNNING => LifecycleState::Running,
        _ => LifecycleState::Finalized,
    }
}

/// Installs the configuration used at boot. Only valid before the first call.
pub fn configure(config: BridgeConfig) -> BridgeResult<()> {
    let mut lifecycle = LIFECYCLE.lock();
    match state() {
        LifecycleState::Uninitialized if lifecycle.boot.is_none() => {
            lifecycle.config = Some(config);
            Ok(())
        }
        LifecycleState::Finalized => Err(BridgeError::Finalized),
        _ => Err(BridgeError::AlreadyRunning),
    }
}

/// How the interpreter booted, once it has.
#[must_use]
pub fn boot_record() -> Option<BootRecord> {
    LIFECYCLE.lock().boot
}

/// How many times the bridge has brought an interpreter up: 0 before the first
/// call and 1 after it, however many threads raced that call.
#[must_use]
pub fn boot_count() -> usize {
    LIFECYCLE.lock().boots
}

/// Boots the interpreter if this is the first call; a no-op while running.
///
/// The boot, including the environment guard's clear/restore sequence, runs
/// under the lifecycle lock, so concurrent first calls cannot race on the
/// process environment.
pub fn ensure_running() -> BridgeResult<()> {
    match state() {
        LifecycleState::Running => return Ok(()),
        LifecycleState::Finalized => return Err(BridgeError::Finalized),
        LifecycleState::Uninitialized => {}
    }

    let mut lifecycle = LIFECYCLE.lock();
    match state() {
        LifecycleState::Running => return Ok(()),
        LifecycleState::Finalized => return Err(BridgeError::Finalized),
        LifecycleState::Uninitialized => {}
    }

    logging::init_tracing();
    let config = lifecycle.config.take().unwrap_or_else(BridgeConfig::from_build_env);
    if lifecycle.boot.is_none() {
        lifecycle.boot = Some(boot(&config));
        lifecycle.boots += 1;
    }
    Python::attach(|py| extend_sys_path(py, &config.sys_paths)).map_err(BridgeError::Evaluation)?;

    STATE.store(RUNNING, Ordering::Release);
    tracing::debug!(boot = ?lifecycle.boot, "interpreter running");
    Ok(())
}

/// Releases every cached reference, then finalizes the interpreter.
///
/// Finalizing an interpreter that never booted just marks the bridge finalized.
/// A second finalize is an error.
pub fn finalize() -> BridgeResult<TeardownReport> {
    let lifecycle = LIFECYCLE.lock();
    if state() == LifecycleState::Finalized {
        return Err(BridgeError::Finalized);
    }
    STATE.store(FINALIZED, Ordering::Release);

    let mut report = TeardownReport::default();
    let Some(boot) = lifecycle.boot else {
        return Ok(report);
    };

    Python::attach(|py| {
        report.record(TeardownStage::Imports, imports::clear(py));
        report.record(TeardownStage::ClassDefs, class_defs::clear(py));
        report.record(TeardownStage::Objects, registry::clear(py));
    });

    if boot.owns_interpreter {
        // SAFETY: the bridge booted this interpreter and holds no references into
        // it any more; the state flag already rejects every later call.
        let status = unsafe {
            ffi::PyGILState_Ensure();
            ffi::Py_FinalizeEx()
        };
        if status < 0 {
            tracing::warn!("interpreter finalization could not flush buffered data");
        }
        report.record(TeardownStage::Interpreter, 1);
    }
    tracing::debug!(?report, "interpreter torn down");
    Ok(report)
}

fn boot(config: &BridgeConfig) -> BootRecord {
    // SAFETY: safe to query at any time, including before initialization.
    if unsafe { ffi::Py_IsInitialized() } != 0 {
        tracing::debug!("host already initialized Python; leaving its environment alone");
        return BootRecord {
            owns_interpreter: false,
            env: EnvAction::Untouched,
        };
    }

    // SAFETY: boot runs under the lifecycle lock, the only place the bridge
    // touches the environment.
    let isolation = unsafe { EnvIsolation::engage(config.runtime.as_ref()) };
    Python::initialize();
    let env = isolation.action();
    drop(isolation);

    tracing::debug!(%env, "booted interpreter");
    BootRecord {
        owns_interpreter: true,
        env,
    }
}

/// Appends each configured directory missing from `sys.path`.
fn extend_sys_path(py: Python<'_>, paths: &[PathBuf]) -> PyResult<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let sys_path = py.import("sys")?.getattr("path")?;
    for path in paths {
        let entry = path.to_string_lossy();
        if !sys_path.contains(entry.as_ref())? {
            sys_path.call_method1("append", (entry.as_ref(),))?;
        }
    }
    Ok(())
}
