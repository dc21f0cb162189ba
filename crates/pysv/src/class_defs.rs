//! Class definition cache.
//!
//! A class defined by one call's evaluated source only exists in that call's
//! scope. Constructor calls register the class object here, and every later
//! call gets all registered classes injected into its globals before anything
//! is evaluated, so instances can be built and used across calls.

use std::sync::LazyLock;

use ahash::AHashMap;
use parking_lot::Mutex;
use pyo3::prelude::*;

use crate::{error::BridgeResult, scope::Scope};

static CLASS_DEFS: LazyLock<Mutex<AHashMap<String, Py<PyAny>>>> = LazyLock::new(|| Mutex::new(AHashMap::new()));

/// Stores `class_object` under `class_name`, replacing any earlier definition.
pub fn register(class_name: &str, class_object: &Bound<'_, PyAny>) {
    let previous = CLASS_DEFS
        .lock()
        .insert(class_name.to_owned(), class_object.clone().unbind());
    if previous.is_none() {
        tracing::debug!(class = class_name, "registered class definition");
    }
    drop(previous);
}

/// Clones every registered definition out of the cache.
#[must_use]
pub fn snapshot(py: Python<'_>) -> Vec<(String, Py<PyAny>)> {
    CLASS_DEFS
        .lock()
        .iter()
        .map(|(name, class)| (name.clone(), class.clone_ref(py)))
        .collect()
}

/// Binds every registered class into the scope's globals.
pub fn inject(scope: &Scope<'_>) -> BridgeResult<()> {
    let py = scope.py();
    for (name, class) in snapshot(py) {
        scope.bind_global(&name, class.bind(py))?;
    }
    Ok(())
}

#[must_use]
pub fn lookup<'py>(py: Python<'py>, class_name: &str) -> Option<Bound<'py, PyAny>> {
    let class = CLASS_DEFS.lock().get(class_name).map(|class| class.clone_ref(py));
    class.map(|class| class.into_bound(py))
}

#[must_use]
pub fn registered() -> usize {
    CLASS_DEFS.lock().len()
}

/// Drops every registered definition. Used by interpreter teardown.
pub(crate) fn clear(py: Python<'_>) -> usize {
    let classes: Vec<_> = CLASS_DEFS.lock().drain().map(|(_, class)| class).collect();
    let released = classes.len();
    for class in classes {
        drop(class.into_bound(py));
    }
    released
}
