//! Native type vocabulary and result decoding.
//!
//! Native call sites speak in the simulator interface's scalar types. This
//! module converts those values into Python objects for a call's scope, and
//! decodes Python results back according to the shape the call site declared.

use pyo3::{IntoPyObjectExt, exceptions::PyTypeError, prelude::*};

use crate::{
    error::{BridgeError, BridgeResult},
    registry::{self, Handle},
};

/// Scalar types a native call site can declare, spelled the way the simulator
/// interface spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr)]
pub enum NativeType {
    #[strum(serialize = "bit")]
    Bit,
    #[strum(serialize = "byte")]
    Byte,
    #[strum(serialize = "shortint")]
    ShortInt,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "longint")]
    LongInt,
    #[strum(serialize = "byte unsigned")]
    UByte,
    #[strum(serialize = "shortint unsigned")]
    UShortInt,
    #[strum(serialize = "int unsigned")]
    UInt,
    #[strum(serialize = "longint unsigned")]
    ULongInt,
    /// Opaque handle to a registered Python object.
    #[strum(serialize = "chandle")]
    Handle,
    #[strum(serialize = "string")]
    String,
    /// Only valid as a result type.
    #[strum(serialize = "void")]
    Void,
}

/// One native value crossing into or out of Python.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeValue {
    Bit(bool),
    Byte(i8),
    ShortInt(i16),
    Int(i32),
    LongInt(i64),
    UByte(u8),
    UShortInt(u16),
    UInt(u32),
    ULongInt(u64),
    Handle(Handle),
    String(String),
}

impl NativeValue {
    #[must_use]
    pub fn native_type(&self) -> NativeType {
        match self {
            Self::Bit(_) => NativeType::Bit,
            Self::Byte(_) => NativeType::Byte,
            Self::ShortInt(_) => NativeType::ShortInt,
            Self::Int(_) => NativeType::Int,
            Self::LongInt(_) => NativeType::LongInt,
            Self::UByte(_) => NativeType::UByte,
            Self::UShortInt(_) => NativeType::UShortInt,
            Self::UInt(_) => NativeType::UInt,
            Self::ULongInt(_) => NativeType::ULongInt,
            Self::Handle(_) => NativeType::Handle,
            Self::String(_) => NativeType::String,
        }
    }

    /// Converts the value into a Python object.
    ///
    /// A handle converts to the registered object itself, so an unknown handle
    /// is a lookup error.
    pub fn to_python<'py>(&self, py: Python<'py>) -> BridgeResult<Bound<'py, PyAny>> {
        let object = match self {
            Self::Bit(v) => v.into_bound_py_any(py),
            Self::Byte(v) => v.into_bound_py_any(py),
            Self::ShortInt(v) => v.into_bound_py_any(py),
            Self::Int(v) => v.into_bound_py_any(py),
            Self::LongInt(v) => v.into_bound_py_any(py),
            Self::UByte(v) => v.into_bound_py_any(py),
            Self::UShortInt(v) => v.into_bound_py_any(py),
            Self::UInt(v) => v.into_bound_py_any(py),
            Self::ULongInt(v) => v.into_bound_py_any(py),
            Self::String(v) => v.into_bound_py_any(py),
            Self::Handle(handle) => return registry::lookup(py, *handle),
        };
        object.map_err(BridgeError::Evaluation)
    }

    /// Converts a Python object into a value of the declared type.
    ///
    /// `Void` yields `None`. `Handle` captures the object into the registry and
    /// yields its new handle. `Bit` accepts a bool, or an int truncated to its
    /// least significant bit.
    pub fn from_python(ty: NativeType, object: &Bound<'_, PyAny>) -> BridgeResult<Option<Self>> {
        let expected: &'static str = ty.into();
        let mismatch = |source: PyErr| BridgeError::TypeMismatch {
            expected: expected.to_owned(),
            source,
        };
        let value = match ty {
            NativeType::Void => return Ok(None),
            NativeType::Handle => Self::Handle(registry::capture(object)?),
            NativeType::Bit => Self::Bit(
                object
                    .extract::<bool>()
                    .or_else(|_| object.extract::<u64>().map(|bits| bits & 1 == 1))
                    .map_err(mismatch)?,
            ),
            NativeType::Byte => Self::Byte(object.extract().map_err(mismatch)?),
            NativeType::ShortInt => Self::ShortInt(object.extract().map_err(mismatch)?),
            NativeType::Int => Self::Int(object.extract().map_err(mismatch)?),
            NativeType::LongInt => Self::LongInt(object.extract().map_err(mismatch)?),
            NativeType::UByte => Self::UByte(object.extract().map_err(mismatch)?),
            NativeType::UShortInt => Self::UShortInt(object.extract().map_err(mismatch)?),
            NativeType::UInt => Self::UInt(object.extract().map_err(mismatch)?),
            NativeType::ULongInt => Self::ULongInt(object.extract().map_err(mismatch)?),
            NativeType::String => Self::String(object.extract().map_err(mismatch)?),
        };
        Ok(Some(value))
    }
}

macro_rules! native_value_from {
    ($($rust:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$rust> for NativeValue {
                fn from(value: $rust) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

native_value_from! {
    bool => Bit,
    i8 => Byte,
    i16 => ShortInt,
    i32 => Int,
    i64 => LongInt,
    u8 => UByte,
    u16 => UShortInt,
    u32 => UInt,
    u64 => ULongInt,
    Handle => Handle,
    String => String,
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// What a native call site expects back from Python.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultShape {
    /// No declared result; whatever Python produced is discarded.
    Discard,
    /// A single scalar returned directly.
    Scalar(NativeType),
    /// One value per out-parameter, in declaration order.
    Multi(Vec<NativeType>),
    /// A constructor: the result is captured and returned as a handle.
    Constructor,
}

/// A result decoded according to its [`ResultShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Nothing,
    Value(NativeValue),
    Values(Vec<NativeValue>),
}

impl Decoded {
    /// The single value, if this is a scalar result.
    #[must_use]
    pub fn into_value(self) -> Option<NativeValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The out-parameter values, if this is a multi-value result.
    #[must_use]
    pub fn into_values(self) -> Option<Vec<NativeValue>> {
        match self {
            Self::Values(values) => Some(values),
            _ => None,
        }
    }
}

/// Decodes `result` into the declared `shape`.
pub fn decode(shape: &ResultShape, result: &Bound<'_, PyAny>) -> BridgeResult<Decoded> {
    match shape {
        ResultShape::Discard => Ok(Decoded::Nothing),
        ResultShape::Scalar(ty) => Ok(NativeValue::from_python(*ty, result)?.map_or(Decoded::Nothing, Decoded::Value)),
        ResultShape::Multi(types) => decode_multi(types, result).map(Decoded::Values),
        ResultShape::Constructor => Ok(Decoded::Value(NativeValue::Handle(registry::capture(result)?))),
    }
}

/// Decodes a sequence result into one value per out-parameter.
///
/// The length must match exactly and no out-parameter may be `void`. Every
/// element is converted before anything is returned, so a failure leaves the
/// caller's out-parameters untouched.
pub fn decode_multi(types: &[NativeType], result: &Bound<'_, PyAny>) -> BridgeResult<Vec<NativeValue>> {
    if types.contains(&NativeType::Void) {
        return Err(BridgeError::TypeMismatch {
            expected: "non-void out-parameters".to_owned(),
            source: PyTypeError::new_err("an out-parameter cannot be declared void"),
        });
    }
    let items: Vec<Bound<'_, PyAny>> = result.extract().map_err(|source| BridgeError::TypeMismatch {
        expected: format!("sequence of {}", types.len()),
        source,
    })?;
    check_arity(types.len(), items.len())?;
    let mut staged = Vec::with_capacity(types.len());
    for (ty, item) in types.iter().zip(&items) {
        staged.push(match ty {
            NativeType::Handle => None,
            _ => NativeValue::from_python(*ty, item)?,
        });
    }
    // handles are captured last so a failed conversion leaves the registry untouched
    let mut values = Vec::with_capacity(staged.len());
    for (item, value) in items.iter().zip(staged) {
        values.push(match value {
            Some(value) => value,
            None => NativeValue::Handle(registry::capture(item)?),
        });
    }
    Ok(values)
}

fn check_arity(expected: usize, actual: usize) -> BridgeResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BridgeError::InvalidArity { expected, actual })
    }
}
