//! Per-call evaluation scope.
//!
//! Every foreign call evaluates against a brand-new pair of global and local
//! dicts. Nothing persists between calls except what the caches re-inject and
//! what the object registry captures, so a scope can simply be dropped when the
//! call returns.

use std::ffi::CStr;

use pyo3::{exceptions::PyKeyError, prelude::*, types::PyDict};

use crate::error::{BridgeError, BridgeResult};

/// Local name a call's evaluated code assigns its result to.
pub const RESULT_NAME: &str = "__result";

/// Prefix for argument bindings so they cannot collide with names in evaluated code.
pub const ARG_PREFIX: &str = "__";

/// Name an argument is bound under in the local scope.
#[must_use]
pub fn arg_name(name: &str) -> String {
    format!("{ARG_PREFIX}{name}")
}

/// Global and local bindings for one call.
#[derive(Debug)]
pub struct Scope<'py> {
    globals: Bound<'py, PyDict>,
    locals: Bound<'py, PyDict>,
}

impl<'py> Scope<'py> {
    /// An empty scope; the caller injects whatever the call needs.
    #[must_use]
    pub fn empty(py: Python<'py>) -> Self {
        Self {
            globals: PyDict::new(py),
            locals: PyDict::new(py),
        }
    }

    #[must_use]
    pub fn py(&self) -> Python<'py> {
        self.globals.py()
    }

    #[must_use]
    pub fn globals(&self) -> &Bound<'py, PyDict> {
        &self.globals
    }

    #[must_use]
    pub fn locals(&self) -> &Bound<'py, PyDict> {
        &self.locals
    }

    pub fn bind_global(&self, name: &str, object: &Bound<'py, PyAny>) -> BridgeResult<()> {
        self.globals.set_item(name, object).map_err(BridgeError::Evaluation)
    }

    pub fn bind_local(&self, name: &str, object: &Bound<'py, PyAny>) -> BridgeResult<()> {
        self.locals.set_item(name, object).map_err(BridgeError::Evaluation)
    }

    /// Looks `name` up in the locals, then the globals.
    pub fn lookup(&self, name: &str) -> BridgeResult<Option<Bound<'py, PyAny>>> {
        if let Some(object) = self.locals.get_item(name)? {
            return Ok(Some(object));
        }
        Ok(self.globals.get_item(name)?)
    }

    /// Executes `source` against this scope.
    pub fn run(&self, source: &CStr) -> BridgeResult<()> {
        self.py()
            .run(source, Some(&self.globals), Some(&self.locals))
            .map_err(BridgeError::Evaluation)
    }

    /// Reads the reserved result binding.
    ///
    /// Code that never assigned it fails like any other evaluation error.
    pub fn result(&self) -> BridgeResult<Bound<'py, PyAny>> {
        self.locals
            .get_item(RESULT_NAME)?
            .ok_or_else(|| BridgeError::Evaluation(PyKeyError::new_err(RESULT_NAME)))
    }

    pub fn set_result(&self, object: &Bound<'py, PyAny>) -> BridgeResult<()> {
        self.bind_local(RESULT_NAME, object)
    }
}
