//! Foreign object registry: opaque native handles for live Python objects.
//!
//! Native code never holds a Python object directly. A constructor-style call
//! captures the evaluated object here and hands back a [`Handle`]; later calls
//! dispatch methods through the handle, and a `destroy` call releases it.
//!
//! Handles come from a monotonically increasing counter and are never reused,
//! so a stale handle can never alias a newer object. Each entry owns exactly
//! one strong reference: `+1` at [`capture`], exactly `-1` at release.
//!
//! The registry lock is only held for map bookkeeping. Method calls and the
//! final decref of a released object (which can run `__del__`) happen after the
//! lock is dropped, so Python code never runs while the lock is held.

use std::{ffi::c_void, fmt, num::NonZeroUsize, sync::LazyLock};

use ahash::AHashMap;
use parking_lot::Mutex;
use pyo3::{prelude::*, types::PyTuple};

use crate::error::{BridgeError, BridgeResult};

/// Method name that performs registry bookkeeping instead of forwarding to Python.
pub const DESTROY_METHOD: &str = "destroy";

/// Opaque, pointer-sized identifier standing in for a registered Python object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(NonZeroUsize);

impl Handle {
    /// Builds a handle from its integer form; `0` is the null handle.
    #[must_use]
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    /// Reinterprets a native `void*` as a handle; null yields `None`.
    #[must_use]
    pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
        Self::from_raw(ptr.addr())
    }

    #[must_use]
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// The handle as the `void*` handed to native callers. Never dereferenced.
    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        std::ptr::without_provenance_mut(self.0.get())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Handle table mapping issued handles to the strong reference each one owns.
#[derive(Debug)]
pub struct ObjectRegistry {
    /// Next handle to issue; `None` once the counter is used up.
    next: Option<NonZeroUsize>,
    objects: AHashMap<Handle, Py<PyAny>>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Some(NonZeroUsize::MIN),
            objects: AHashMap::new(),
        }
    }

    /// Stores a new strong reference to `object` under a freshly issued handle.
    ///
    /// Returns `None`, storing nothing, once every handle value has been issued.
    pub fn insert(&mut self, object: &Bound<'_, PyAny>) -> Option<Handle> {
        let handle = self.issue()?;
        self.objects.insert(handle, object.clone().unbind());
        Some(handle)
    }

    fn issue(&mut self) -> Option<Handle> {
        let next = self.next?;
        self.next = next.checked_add(1);
        Some(Handle(next))
    }

    /// Returns a new strong reference to the object behind `handle`.
    #[must_use]
    pub fn get(&self, py: Python<'_>, handle: Handle) -> Option<Py<PyAny>> {
        self.objects.get(&handle).map(|object| object.clone_ref(py))
    }

    /// Removes the entry and returns the reference it owned.
    ///
    /// The caller decides when to drop it; dropping may run Python finalizers.
    pub fn remove(&mut self, handle: Handle) -> Option<Py<PyAny>> {
        self.objects.remove(&handle)
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.contains_key(&handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Empties the table, returning every owned reference. The counter keeps going.
    pub fn drain(&mut self) -> Vec<Py<PyAny>> {
        self.objects.drain().map(|(_, object)| object).collect()
    }
}

static REGISTRY: LazyLock<Mutex<ObjectRegistry>> = LazyLock::new(|| Mutex::new(ObjectRegistry::new()));

/// Registers the object produced by a constructor-style evaluation.
///
/// The registry takes one extra strong reference so the object survives the
/// evaluation scope being discarded.
pub fn capture(object: &Bound<'_, PyAny>) -> BridgeResult<Handle> {
    let handle = REGISTRY.lock().insert(object).ok_or(BridgeError::HandlesExhausted)?;
    tracing::debug!(%handle, type_name = %type_name(object), "captured object");
    Ok(handle)
}

/// Returns the live object behind `handle`.
pub fn lookup<'py>(py: Python<'py>, handle: Handle) -> BridgeResult<Bound<'py, PyAny>> {
    let object = REGISTRY.lock().get(py, handle);
    object
        .map(|object| object.into_bound(py))
        .ok_or(BridgeError::UnknownHandle { handle })
}

/// Drops the registry's reference to `handle` and erases the entry.
///
/// A second release of the same handle is a lookup error.
pub fn release(py: Python<'_>, handle: Handle) -> BridgeResult<()> {
    let removed = REGISTRY.lock().remove(handle);
    let object = removed.ok_or(BridgeError::UnknownHandle { handle })?;
    tracing::debug!(%handle, "released object");
    // decref with the lock released and the thread attached
    drop(object.into_bound(py));
    Ok(())
}

/// Calls `method` on the object behind `handle`.
///
/// `destroy` never reaches Python: it releases the handle and yields no result.
/// Any other name is looked up as an attribute and called with `args`.
pub fn dispatch<'py>(
    py: Python<'py>,
    handle: Handle,
    method: &str,
    args: Bound<'py, PyTuple>,
) -> BridgeResult<Option<Bound<'py, PyAny>>> {
    if method == DESTROY_METHOD {
        release(py, handle)?;
        return Ok(None);
    }
    let object = lookup(py, handle)?;
    let result = object
        .getattr(method)
        .and_then(|bound_method| bound_method.call1(args))
        .map_err(BridgeError::Evaluation)?;
    Ok(Some(result))
}

/// Whether `handle` currently names a live object.
#[must_use]
pub fn contains(handle: Handle) -> bool {
    REGISTRY.lock().contains(handle)
}

/// Number of live handles.
#[must_use]
pub fn live_handles() -> usize {
    REGISTRY.lock().len()
}

/// Releases every registered object. Used by interpreter teardown.
pub(crate) fn clear(py: Python<'_>) -> usize {
    let objects = REGISTRY.lock().drain();
    let released = objects.len();
    for object in objects {
        drop(object.into_bound(py));
    }
    released
}

fn type_name(object: &Bound<'_, PyAny>) -> String {
    object
        .get_type()
        .name()
        .map_or_else(|_| "<unknown>".to_owned(), |name| name.to_string())
}
