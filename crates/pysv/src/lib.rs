//! Bridge from statically typed native call sites to an embedded Python interpreter.
//!
//! Native code (typically entry points generated for a hardware simulator's
//! foreign-call interface) issues narrow, typed calls: evaluate this function,
//! construct this class, call this method on that handle. The bridge keeps one
//! interpreter alive for the process, gives every call a fresh scope with the
//! cached imports and class definitions re-injected, translates arguments and
//! results across the type boundary, and keeps Python objects alive behind
//! opaque handles between calls.
//!
//! ```no_run
//! use pysv::{NativeType, NativeValue, ResultShape};
//!
//! let handle = pysv::call(|frame| {
//!     frame.construct(c"class Counter:\n    def __init__(self):\n        self.n = 0\n    def bump(self, by):\n        self.n += by\n        return self.n\n__result = Counter()\n", "Counter")
//! })?;
//! let count = pysv::call(|frame| {
//!     frame.bind("by", &NativeValue::Int(2))?;
//!     frame.dispatch(handle, "bump", &["by"])?;
//!     frame.decode(&ResultShape::Scalar(NativeType::Int))
//! })?;
//! pysv::call(|frame| frame.dispatch_destroy(handle))?;
//! pysv::finalize()?;
//! # Ok::<(), pysv::BridgeError>(())
//! ```

pub mod buffer;
pub mod class_defs;
mod config;
pub mod env;
mod error;
pub mod ffi;
mod frame;
pub mod imports;
pub mod lifecycle;
mod logging;
mod marshal;
mod object;
pub mod registry;
mod scope;

use pyo3::Python;

pub use crate::{
    buffer::{NdArray, OpenArray},
    config::{BridgeConfig, RuntimeHome},
    error::{BridgeError, BridgeResult},
    frame::CallFrame,
    lifecycle::{LifecycleState, TeardownReport, TeardownStage, configure, finalize},
    logging::init_tracing,
    marshal::{Decoded, NativeType, NativeValue, ResultShape, decode, decode_multi},
    object::ForeignObject,
    registry::Handle,
    scope::{ARG_PREFIX, RESULT_NAME, Scope, arg_name},
};

/// Runs one foreign call.
///
/// Boots the interpreter on first use, attaches to it, builds a fresh
/// [`CallFrame`] and hands it to `f`. Fails with [`BridgeError::Finalized`]
/// once the interpreter has been torn down.
pub fn call<R, F>(f: F) -> BridgeResult<R>
where
    F: for<'py> FnOnce(&CallFrame<'py>) -> BridgeResult<R>,
{
    lifecycle::ensure_running()?;
    Python::attach(|py| {
        let frame = CallFrame::new(py)?;
        f(&frame)
    })
}
