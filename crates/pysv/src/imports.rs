//! Module import cache.
//!
//! Evaluated code runs in a fresh scope on every call, so its imports would
//! otherwise be re-resolved every time. The cache resolves a dotted path once,
//! by importing only the top-level package and walking the rest as attributes,
//! then binds the same module object into every later scope that asks for it.

use std::sync::LazyLock;

use ahash::AHashMap;
use parking_lot::Mutex;
use pyo3::{exceptions::PyModuleNotFoundError, prelude::*};

use crate::{
    error::{BridgeError, BridgeResult},
    scope::Scope,
};

static IMPORTS: LazyLock<Mutex<AHashMap<String, Py<PyAny>>>> = LazyLock::new(|| Mutex::new(AHashMap::new()));

/// Resolves `dotted_path`, consulting the cache first.
///
/// A failed resolution leaves the cache untouched.
pub fn resolve<'py>(py: Python<'py>, dotted_path: &str) -> BridgeResult<Bound<'py, PyAny>> {
    let cached = IMPORTS.lock().get(dotted_path).map(|module| module.clone_ref(py));
    if let Some(module) = cached {
        return Ok(module.into_bound(py));
    }

    tracing::debug!(path = dotted_path, "resolving import");
    let resolved = resolve_uncached(py, dotted_path).map_err(|source| BridgeError::Resolution {
        path: dotted_path.to_owned(),
        source,
    })?;
    // a racing resolver may have inserted first; keep its object so identity holds
    let module = IMPORTS
        .lock()
        .entry(dotted_path.to_owned())
        .or_insert_with(|| resolved.clone().unbind())
        .clone_ref(py);
    Ok(module.into_bound(py))
}

/// Binds the module at `dotted_path` under `bound_name` in the scope's globals.
///
/// Globals rather than locals, so functions and classes defined by the
/// evaluated code can see the import.
pub fn import_into(scope: &Scope<'_>, dotted_path: &str, bound_name: &str) -> BridgeResult<()> {
    let module = resolve(scope.py(), dotted_path)?;
    scope.bind_global(bound_name, &module)
}

/// Whether `dotted_path` has been resolved and cached.
#[must_use]
pub fn is_cached(dotted_path: &str) -> bool {
    IMPORTS.lock().contains_key(dotted_path)
}

#[must_use]
pub fn cached_paths() -> usize {
    IMPORTS.lock().len()
}

/// Drops every cached module reference. Used by interpreter teardown.
pub(crate) fn clear(py: Python<'_>) -> usize {
    let modules: Vec<_> = IMPORTS.lock().drain().map(|(_, module)| module).collect();
    let released = modules.len();
    for module in modules {
        drop(module.into_bound(py));
    }
    released
}

fn resolve_uncached<'py>(py: Python<'py>, dotted_path: &str) -> PyResult<Bound<'py, PyAny>> {
    let mut segments = path_segments(dotted_path);
    let top = segments
        .next()
        .ok_or_else(|| PyModuleNotFoundError::new_err(format!("empty module path {dotted_path:?}")))?;
    let mut target = py.import(top)?.into_any();
    for segment in segments {
        target = target.getattr(segment)?;
    }
    Ok(target)
}

fn path_segments(dotted_path: &str) -> impl Iterator<Item = &str> {
    dotted_path.split('.').filter(|segment| !segment.is_empty())
}
