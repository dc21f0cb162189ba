//! C-linkage surface and helpers for generated entry points.
//!
//! Generated entry points take native arguments by value and out-parameters by
//! pointer. Nothing may unwind across them: a fatal bridge error is reported
//! and aborts the process, the same outcome as an uncaught exception in native
//! code. A lookup error (a stale or doubly destroyed handle) is logged and the
//! entry point returns its "no result" sentinel instead.

use std::{
    ffi::{CString, c_char, c_void},
    ptr,
};

use parking_lot::{Mutex, const_mutex};
use pyo3::Python;

use crate::{
    error::{BridgeError, BridgeResult},
    lifecycle::{self, LifecycleState},
    marshal::NativeValue,
};

/// Strings handed out by the most recent string result.
static STRING_RESULTS: Mutex<Vec<CString>> = const_mutex(Vec::new());

/// Process teardown: releases every cached reference, then the interpreter.
#[unsafe(no_mangle)]
pub extern "C" fn pysv_finalize() {
    match lifecycle::finalize() {
        Ok(report) => tracing::debug!(stages = ?report.stages(), "finalized"),
        Err(err) => tracing::error!(%err, "finalize called twice"),
    }
}

/// Unwraps a call result for an entry point whose "no result" value is `T::default()`.
///
/// See [`or_abort_with`].
pub fn or_abort<T: Default>(result: BridgeResult<T>) -> T {
    or_abort_with(result, T::default())
}

/// Unwraps a call result, returning `sentinel` on a lookup error and aborting
/// the process on any other error.
pub fn or_abort_with<T>(result: BridgeResult<T>, sentinel: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) if err.is_recoverable() => {
            tracing::error!(%err, "lookup failed; returning no result");
            sentinel
        }
        Err(err) => fatal(&err),
    }
}

fn fatal(err: &BridgeError) -> ! {
    tracing::error!(%err, "fatal bridge error");
    eprintln!("pysv: {err}");
    if let Some(py_err) = err.py_err()
        && lifecycle::state() == LifecycleState::Running
    {
        Python::attach(|py| py_err.print(py));
    }
    std::process::abort()
}

/// Keeps `value` alive as a C string and returns a pointer to it.
///
/// The pointer stays valid until the next string result replaces it.
pub fn stash_string(value: &str) -> *const c_char {
    stash(vec![to_c_string(value)])
        .first()
        .copied()
        .unwrap_or(ptr::null())
}

/// Writes decoded out-parameter values through their native pointers.
///
/// Strings are written as pointers into the string stash; handles as `void*`;
/// bits as `0`/`1` bytes. Null pointers are skipped. Counts must match, and a
/// mismatch writes nothing.
///
/// # Safety
///
/// Each non-null pointer in `outs` must be valid for a write of the native type
/// of the value at the same position.
pub unsafe fn write_out_params(values: &[NativeValue], outs: &[*mut c_void]) -> BridgeResult<()> {
    if values.len() != outs.len() {
        return Err(BridgeError::InvalidArity {
            expected: outs.len(),
            actual: values.len(),
        });
    }
    let strings = stash(
        values
            .iter()
            .filter_map(|value| match value {
                NativeValue::String(s) => Some(to_c_string(s)),
                _ => None,
            })
            .collect(),
    );
    let mut strings = strings.into_iter();

    for (value, &out) in values.iter().zip(outs) {
        if out.is_null() {
            continue;
        }
        // SAFETY: the caller guarantees `out` points at the matching native type.
        unsafe {
            match value {
                NativeValue::Bit(v) => out.cast::<u8>().write(u8::from(*v)),
                NativeValue::Byte(v) => out.cast::<i8>().write(*v),
                NativeValue::ShortInt(v) => out.cast::<i16>().write(*v),
                NativeValue::Int(v) => out.cast::<i32>().write(*v),
                NativeValue::LongInt(v) => out.cast::<i64>().write(*v),
                NativeValue::UByte(v) => out.cast::<u8>().write(*v),
                NativeValue::UShortInt(v) => out.cast::<u16>().write(*v),
                NativeValue::UInt(v) => out.cast::<u32>().write(*v),
                NativeValue::ULongInt(v) => out.cast::<u64>().write(*v),
                NativeValue::Handle(handle) => out.cast::<*mut c_void>().write(handle.as_ptr()),
                NativeValue::String(_) => out.cast::<*const c_char>().write(strings.next().unwrap_or(ptr::null())),
            }
        }
    }
    Ok(())
}

fn stash(strings: Vec<CString>) -> Vec<*const c_char> {
    let pointers = strings.iter().map(|s| s.as_ptr()).collect();
    // replacing the stash drops the previous result's strings
    *STRING_RESULTS.lock() = strings;
    pointers
}

/// C strings end at the first NUL, so anything after one is dropped.
fn to_c_string(value: &str) -> CString {
    let bytes = value.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    CString::new(&bytes[..end]).unwrap_or_default()
}
