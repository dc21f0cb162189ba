//! Owning façade over a registered object.
//!
//! Rust hosts get the same ergonomics the generated native wrapper class gives
//! C++ callers: construction captures a handle, methods forward through it, and
//! dropping the façade destroys the handle.

use std::{ffi::CStr, mem};

use crate::{
    error::BridgeResult,
    lifecycle::{self, LifecycleState},
    marshal::{Decoded, NativeValue, ResultShape},
    registry::Handle,
};

/// Owns exactly one handle and destroys it on drop.
#[derive(Debug)]
pub struct ForeignObject {
    handle: Handle,
}

impl ForeignObject {
    /// Evaluates `source`, which must assign an instance of `class_name` to
    /// `__result`, and takes ownership of the captured handle.
    pub fn construct(source: &CStr, class_name: &str) -> BridgeResult<Self> {
        let handle = crate::call(|frame| frame.construct(source, class_name))?;
        Ok(Self::from_handle(handle))
    }

    /// Takes ownership of an already captured handle.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Calls `method` with positional `args` and decodes the result into `shape`.
    pub fn call(&self, method: &str, args: &[NativeValue], shape: &ResultShape) -> BridgeResult<Decoded> {
        let names: Vec<String> = (0..args.len()).map(|i| format!("arg{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        crate::call(|frame| {
            for (name, value) in names.iter().zip(args) {
                frame.bind(name, value)?;
            }
            frame.dispatch(self.handle, method, &names)?;
            frame.decode(shape)
        })
    }

    /// Destroys the handle now, surfacing a lookup error instead of logging it.
    pub fn close(self) -> BridgeResult<()> {
        destroy(self.into_handle())
    }

    /// Gives up ownership without destroying the handle.
    #[must_use]
    pub fn into_handle(self) -> Handle {
        let handle = self.handle;
        mem::forget(self);
        handle
    }
}

impl Drop for ForeignObject {
    fn drop(&mut self) {
        // teardown already released every registered object
        if lifecycle::state() != LifecycleState::Running {
            return;
        }
        if let Err(err) = destroy(self.handle) {
            tracing::error!(%err, handle = %self.handle, "failed to destroy object");
        }
    }
}

fn destroy(handle: Handle) -> BridgeResult<()> {
    crate::call(|frame| frame.dispatch_destroy(handle))
}
