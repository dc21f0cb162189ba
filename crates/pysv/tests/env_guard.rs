//! The environment guard is exercised directly; no interpreter is booted here.

use std::{env, ffi::OsString, panic};

use parking_lot::{Mutex, const_mutex};
use pysv::{
    RuntimeHome,
    env::{EnvAction, EnvIsolation, PYTHONHOME, PYTHONPATH},
};

/// Tests in this file mutate the process environment and must not overlap.
static ENV_LOCK: Mutex<()> = const_mutex(());

/// Runs `f` with both variables set as given, restoring the ambient values afterwards.
fn with_vars(home: Option<&str>, path: Option<&str>, f: impl FnOnce()) {
    let _lock = ENV_LOCK.lock();
    let ambient = (env::var_os(PYTHONHOME), env::var_os(PYTHONPATH));
    set(PYTHONHOME, home.map(OsString::from));
    set(PYTHONPATH, path.map(OsString::from));
    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(f));
    set(PYTHONHOME, ambient.0);
    set(PYTHONPATH, ambient.1);
    if let Err(payload) = outcome {
        panic::resume_unwind(payload);
    }
}

fn set(name: &str, value: Option<OsString>) {
    // SAFETY: callers hold ENV_LOCK and these tests spawn no other threads.
    unsafe {
        match value {
            Some(value) => env::set_var(name, value),
            None => env::remove_var(name),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn runtime() -> RuntimeHome {
    RuntimeHome {
        home: "/opt/pysv/runtime".into(),
        path: "/opt/pysv/runtime/lib".into(),
    }
}

#[test]
fn nothing_set_and_nothing_bundled_is_untouched() {
    with_vars(None, None, || {
        // SAFETY: ENV_LOCK is held.
        let guard = unsafe { EnvIsolation::engage(None) };
        assert_eq!(guard.action(), EnvAction::Untouched);
        drop(guard);
        assert_eq!(var(PYTHONHOME), None);
        assert_eq!(var(PYTHONPATH), None);
    });
}

/// An injected runtime stays in the environment after the guard drops.
#[test]
fn bundled_runtime_is_injected_when_nothing_is_set() {
    with_vars(None, None, || {
        let runtime = runtime();
        // SAFETY: ENV_LOCK is held.
        let guard = unsafe { EnvIsolation::engage(Some(&runtime)) };
        assert_eq!(guard.action(), EnvAction::Injected);
        assert_eq!(var(PYTHONHOME).as_deref(), Some("/opt/pysv/runtime"));
        drop(guard);
        assert_eq!(var(PYTHONHOME).as_deref(), Some("/opt/pysv/runtime"));
        assert_eq!(var(PYTHONPATH).as_deref(), Some("/opt/pysv/runtime/lib"));
    });
}

#[test]
fn host_values_are_hidden_then_restored() {
    with_vars(Some("/tools/sim/python"), Some("/tools/sim/lib"), || {
        // SAFETY: ENV_LOCK is held.
        let guard = unsafe { EnvIsolation::engage(Some(&runtime())) };
        assert_eq!(guard.action(), EnvAction::Restored);
        assert_eq!(var(PYTHONHOME), None);
        assert_eq!(var(PYTHONPATH), None);
        drop(guard);
        assert_eq!(var(PYTHONHOME).as_deref(), Some("/tools/sim/python"));
        assert_eq!(var(PYTHONPATH).as_deref(), Some("/tools/sim/lib"));
    });
}

/// Restoring puts back exactly what was there: an unset variable stays unset.
#[test]
fn only_originally_set_values_come_back() {
    with_vars(None, Some("/tools/sim/lib"), || {
        // SAFETY: ENV_LOCK is held.
        let guard = unsafe { EnvIsolation::engage(None) };
        assert_eq!(guard.action(), EnvAction::Restored);
        assert_eq!(var(PYTHONPATH), None);
        drop(guard);
        assert_eq!(var(PYTHONHOME), None);
        assert_eq!(var(PYTHONPATH).as_deref(), Some("/tools/sim/lib"));
    });
}

#[test]
fn restoration_survives_a_panicking_boot() {
    with_vars(Some("/tools/sim/python"), None, || {
        let outcome = panic::catch_unwind(|| {
            // SAFETY: ENV_LOCK is held.
            let _guard = unsafe { EnvIsolation::engage(None) };
            panic!("boot failed");
        });
        assert!(outcome.is_err());
        assert_eq!(var(PYTHONHOME).as_deref(), Some("/tools/sim/python"));
        assert_eq!(var(PYTHONPATH), None);
    });
}
