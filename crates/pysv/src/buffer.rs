//! Zero-copy views of native arrays.
//!
//! A native multi-dimensional array reaches Python as a `memoryview` over the
//! native memory itself: same base address, `int32` elements, row-major
//! strides. Python reads and writes go straight to the native storage.

use std::{
    cell::Cell,
    ffi::{c_int, c_void},
};

use pyo3::{ffi, prelude::*};

use crate::error::{BridgeError, BridgeResult};

/// Byte width of one array element (a 32-bit integer).
pub const ELEMENT_SIZE: usize = size_of::<i32>();

/// `struct` format code for a native `int32`.
const ELEMENT_FORMAT: &std::ffi::CStr = c"i";

/// A native array that can be described by a base address and per-dimension extents.
///
/// # Safety
///
/// When `base_ptr` is non-null it must address `extent(0) * ... * extent(n - 1)`
/// contiguous, row-major `i32` elements, valid for reads and writes for as long
/// as any view built over it is alive.
pub unsafe trait OpenArray {
    /// Base address of the linear backing, or null if there is none.
    fn base_ptr(&self) -> *mut c_void;

    fn dimensions(&self) -> usize;

    /// Number of elements along `dimension` (zero-based, outermost first).
    fn extent(&self, dimension: usize) -> usize;
}

/// Byte strides for a row-major array: the last dimension is contiguous and
/// each earlier stride spans one full row of the next dimension.
#[must_use]
pub fn row_major_strides(extents: &[isize], element_size: isize) -> Vec<isize> {
    let mut strides = vec![element_size; extents.len()];
    for i in (0..extents.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * extents[i + 1];
    }
    strides
}

/// Exposes `array` to Python as a writable `memoryview` without copying.
///
/// # Safety
///
/// The array must not be destroyed or resized while the returned view, or
/// anything Python derived from it, is still in use.
pub unsafe fn to_memoryview<'py, A: OpenArray + ?Sized>(py: Python<'py>, array: &A) -> BridgeResult<Bound<'py, PyAny>> {
    let base = array.base_ptr();
    if base.is_null() {
        return Err(BridgeError::UnsupportedRepresentation("no base address".to_owned()));
    }
    let ndim = array.dimensions();
    let mut shape = (0..ndim)
        .map(|dimension| isize::try_from(array.extent(dimension)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| BridgeError::UnsupportedRepresentation("extent exceeds isize".to_owned()))?;
    let element_size = ELEMENT_SIZE.cast_signed();
    let mut strides = row_major_strides(&shape, element_size);

    let mut view = ffi::Py_buffer::new();
    view.buf = base;
    view.len = shape.iter().product::<isize>() * element_size;
    view.itemsize = element_size;
    view.readonly = 0;
    view.ndim = c_int::try_from(ndim)
        .map_err(|_| BridgeError::UnsupportedRepresentation(format!("{ndim} dimensions")))?;
    view.format = ELEMENT_FORMAT.as_ptr().cast_mut();
    view.shape = shape.as_mut_ptr();
    view.strides = strides.as_mut_ptr();

    // SAFETY: `view` describes memory the caller vouches for. The memoryview copies
    // shape and strides into its own storage, and the format string is static.
    let raw = unsafe { ffi::PyMemoryView_FromBuffer(&raw const view) };
    // SAFETY: `raw` is a new reference or null with an exception set.
    unsafe { Bound::from_owned_ptr_or_err(py, raw) }.map_err(BridgeError::Evaluation)
}

/// An owned row-major `i32` array, shareable with Python through [`to_memoryview`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    data: Vec<Cell<i32>>,
    extents: Vec<usize>,
}

impl NdArray {
    /// A zero-filled array with the given extents.
    #[must_use]
    pub fn zeros(extents: &[usize]) -> Self {
        let len = extents.iter().product();
        Self {
            data: vec![Cell::new(0); len],
            extents: extents.to_vec(),
        }
    }

    /// Wraps `data` laid out row-major; `None` if the length does not match the extents.
    #[must_use]
    pub fn from_vec(extents: &[usize], data: Vec<i32>) -> Option<Self> {
        if data.len() != extents.iter().product::<usize>() {
            return None;
        }
        Some(Self {
            data: data.into_iter().map(Cell::new).collect(),
            extents: extents.to_vec(),
        })
    }

    #[must_use]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<i32> {
        self.offset(index).map(|offset| self.data[offset].get())
    }

    /// Writes one element; returns `false` if the index is out of bounds.
    pub fn set(&self, index: &[usize], value: i32) -> bool {
        self.offset(index).map(|offset| self.data[offset].set(value)).is_some()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<i32> {
        self.data.iter().map(Cell::get).collect()
    }

    fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.extents.len() {
            return None;
        }
        index.iter().zip(&self.extents).try_fold(0, |offset, (&i, &extent)| {
            (i < extent).then_some(offset * extent + i)
        })
    }
}

// SAFETY: `Cell<i32>` has the layout of `i32`, the vector holds exactly the
// product of the extents, and cells permit writes through a shared borrow. An
// empty vector yields a dangling, aligned pointer that is never dereferenced.
unsafe impl OpenArray for NdArray {
    fn base_ptr(&self) -> *mut c_void {
        self.data.as_ptr().cast::<c_void>().cast_mut()
    }

    fn dimensions(&self) -> usize {
        self.extents.len()
    }

    fn extent(&self, dimension: usize) -> usize {
        self.extents[dimension]
    }
}

#[cfg(feature = "svdpi")]
pub use svdpi::SvOpenArray;

#[cfg(feature = "svdpi")]
mod svdpi {
    use std::ffi::{c_int, c_void};

    use super::OpenArray;

    unsafe extern "C" {
        fn svGetArrayPtr(handle: *const c_void) -> *mut c_void;
        fn svDimensions(handle: *const c_void) -> c_int;
        fn svSize(handle: *const c_void, dimension: c_int) -> c_int;
    }

    /// An open array handed over by the simulator (`svOpenArrayHandle`).
    #[derive(Debug)]
    pub struct SvOpenArray {
        handle: *const c_void,
    }

    impl SvOpenArray {
        /// # Safety
        ///
        /// `handle` must be a live `svOpenArrayHandle` for the current DPI call.
        #[must_use]
        pub unsafe fn from_raw(handle: *const c_void) -> Self {
            Self { handle }
        }
    }

    // SAFETY: the simulator returns either null or the array's contiguous storage;
    // the handle is only valid for the duration of the DPI call that produced it.
    unsafe impl OpenArray for SvOpenArray {
        fn base_ptr(&self) -> *mut c_void {
            // SAFETY: `handle` is a live open array handle per `from_raw`.
            unsafe { svGetArrayPtr(self.handle) }
        }

        fn dimensions(&self) -> usize {
            // SAFETY: as above.
            usize::try_from(unsafe { svDimensions(self.handle) }).unwrap_or(0)
        }

        fn extent(&self, dimension: usize) -> usize {
            // unpacked dimensions are numbered from 1; 0 is the packed part
            let Ok(dimension) = c_int::try_from(dimension + 1) else {
                return 0;
            };
            // SAFETY: as above.
            usize::try_from(unsafe { svSize(self.handle, dimension) }).unwrap_or(0)
        }
    }
}
