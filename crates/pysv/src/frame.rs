//! Per-call marshaling.
//!
//! A [`CallFrame`] is what one native entry point works with: a fresh scope
//! with every cached class already injected, plus operations to bind imports
//! and arguments, evaluate source or dispatch a method on a registered object,
//! and decode the result.
//!
//! A generated free-function entry point looks like:
//!
//! ```no_run
//! # use pysv::{NativeType, ResultShape};
//! let sum = pysv::call(|frame| {
//!     frame.bind("a", &10_i32.into())?;
//!     frame.bind("b", &3_i32.into())?;
//!     frame.eval(c"def add(a, b):\n    return a + b\n__result = add(__a, __b)\n")?;
//!     frame.decode(&ResultShape::Scalar(NativeType::Int))
//! })?;
//! # Ok::<(), pysv::BridgeError>(())
//! ```

use std::ffi::CStr;

use pyo3::{exceptions::PyNameError, prelude::*, types::PyTuple};

use crate::{
    buffer::{self, OpenArray},
    class_defs,
    error::{BridgeError, BridgeResult},
    imports,
    marshal::{self, Decoded, NativeValue, ResultShape},
    registry::{self, DESTROY_METHOD, Handle},
    scope::{Scope, arg_name},
};

/// The scope and marshaling operations for one foreign call.
#[derive(Debug)]
pub struct CallFrame<'py> {
    scope: Scope<'py>,
}

impl<'py> CallFrame<'py> {
    /// A fresh, empty scope with every registered class injected into its globals.
    pub fn new(py: Python<'py>) -> BridgeResult<Self> {
        let scope = Scope::empty(py);
        class_defs::inject(&scope)?;
        Ok(Self { scope })
    }

    #[must_use]
    pub fn py(&self) -> Python<'py> {
        self.scope.py()
    }

    #[must_use]
    pub fn scope(&self) -> &Scope<'py> {
        &self.scope
    }

    /// Makes the module at `dotted_path` visible as `bound_name`.
    pub fn import(&self, dotted_path: &str, bound_name: &str) -> BridgeResult<()> {
        imports::import_into(&self.scope, dotted_path, bound_name)
    }

    /// Binds an argument as `__<name>` in the local scope.
    ///
    /// A handle argument binds the registered object. An unknown handle is
    /// logged and binds `None`.
    pub fn bind(&self, name: &str, value: &NativeValue) -> BridgeResult<()> {
        let object = match value.to_python(self.py()) {
            Ok(object) => object,
            Err(err) if err.is_recoverable() => {
                tracing::error!(%err, argument = name, "unable to find object for argument");
                self.py().None().into_bound(self.py())
            }
            Err(err) => return Err(err),
        };
        self.scope.bind_local(&arg_name(name), &object)
    }

    /// Binds a zero-copy `memoryview` of `array` as `__<name>`.
    ///
    /// # Safety
    ///
    /// `array` must outlive every use Python makes of the view, including any
    /// reference the evaluated code stashes beyond this call.
    pub unsafe fn bind_array<A: OpenArray + ?Sized>(&self, name: &str, array: &A) -> BridgeResult<()> {
        // SAFETY: forwarded from the caller.
        let view = unsafe { buffer::to_memoryview(self.py(), array) }?;
        self.scope.bind_local(&arg_name(name), &view)
    }

    /// Evaluates `source` in this frame's scope.
    pub fn eval(&self, source: &CStr) -> BridgeResult<()> {
        self.scope.run(source)
    }

    /// Evaluates a constructor call and captures its `__result` as a handle.
    ///
    /// If the source defined `class_name` (or it was injected from an earlier
    /// call), that class object is registered so later calls can see it.
    pub fn construct(&self, source: &CStr, class_name: &str) -> BridgeResult<Handle> {
        self.eval(source)?;
        let instance = self.scope.result()?;
        match self.scope.lookup(class_name)? {
            Some(class) => class_defs::register(class_name, &class),
            None => tracing::debug!(class = class_name, "constructor did not bind its class"),
        }
        registry::capture(&instance)
    }

    /// Calls `method` on the object behind `handle` and stores its result as `__result`.
    ///
    /// `arg_names` name arguments previously bound with [`bind`](Self::bind).
    /// An unknown handle is logged and leaves `None` as the result.
    pub fn dispatch(&self, handle: Handle, method: &str, arg_names: &[&str]) -> BridgeResult<()> {
        let py = self.py();
        let mut args = Vec::with_capacity(arg_names.len());
        for name in arg_names {
            let bound = arg_name(name);
            let arg = self
                .scope
                .lookup(&bound)?
                .ok_or_else(|| BridgeError::Evaluation(PyNameError::new_err(format!("argument {bound} is not bound"))))?;
            args.push(arg);
        }
        let args = PyTuple::new(py, args)?;

        let result = match registry::dispatch(py, handle, method, args) {
            Ok(result) => result,
            Err(err) if err.is_recoverable() => {
                tracing::error!(%err, method, "unable to call method");
                None
            }
            Err(err) => return Err(err),
        };
        let result = result.unwrap_or_else(|| py.None().into_bound(py));
        self.scope.set_result(&result)
    }

    /// Destroys `handle`, reporting an unknown handle as an error rather than logging it.
    ///
    /// Generated entry points pass the result through [`or_abort`](crate::ffi::or_abort),
    /// which logs that error and returns, so a second destroy never crashes.
    pub fn dispatch_destroy(&self, handle: Handle) -> BridgeResult<()> {
        registry::dispatch(self.py(), handle, DESTROY_METHOD, PyTuple::empty(self.py())).map(drop)
    }

    /// Decodes `__result` into the declared shape.
    pub fn decode(&self, shape: &ResultShape) -> BridgeResult<Decoded> {
        if *shape == ResultShape::Discard {
            return Ok(Decoded::Nothing);
        }
        marshal::decode(shape, &self.scope.result()?)
    }
}
