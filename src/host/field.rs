//! Field conversions used by `#[derive(HostObject)]`.

use super::value::{HostFunction, HostObject, HostValue};
use crate::error::{BridgeError, Result};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Read a Rust value as a host value.
pub trait ToHostValue {
    fn to_host_value(&self) -> HostValue;
}

/// Build a Rust value from a host value.
pub trait FromHostValue: Sized {
    fn from_host_value(value: HostValue) -> Result<Self>;
}

/// A field that scripts may assign to.
///
/// Implemented for `Cell` and `RefCell`, since host objects are shared.
pub trait HostField {
    fn write(&self, value: HostValue) -> Result<()>;
}

impl<T: Copy + FromHostValue> HostField for Cell<T> {
    fn write(&self, value: HostValue) -> Result<()> {
        self.set(T::from_host_value(value)?);
        Ok(())
    }
}

impl<T: FromHostValue> HostField for RefCell<T> {
    fn write(&self, value: HostValue) -> Result<()> {
        let value = T::from_host_value(value)?;
        let mut slot = self
            .try_borrow_mut()
            .map_err(|_| BridgeError::InvalidState("field is borrowed".into()))?;
        *slot = value;
        Ok(())
    }
}

impl<T: Copy + ToHostValue> ToHostValue for Cell<T> {
    fn to_host_value(&self) -> HostValue {
        self.get().to_host_value()
    }
}

impl<T: ToHostValue> ToHostValue for RefCell<T> {
    fn to_host_value(&self) -> HostValue {
        match self.try_borrow() {
            Ok(value) => value.to_host_value(),
            Err(_) => HostValue::Undefined,
        }
    }
}

impl ToHostValue for HostValue {
    fn to_host_value(&self) -> HostValue {
        self.clone()
    }
}

impl FromHostValue for HostValue {
    fn from_host_value(value: HostValue) -> Result<Self> {
        Ok(value)
    }
}

impl ToHostValue for bool {
    fn to_host_value(&self) -> HostValue {
        HostValue::Bool(*self)
    }
}

impl FromHostValue for bool {
    fn from_host_value(value: HostValue) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl ToHostValue for String {
    fn to_host_value(&self) -> HostValue {
        HostValue::String(self.clone())
    }
}

impl ToHostValue for &'static str {
    fn to_host_value(&self) -> HostValue {
        HostValue::String(self.to_string())
    }
}

impl FromHostValue for String {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

macro_rules! number_field {
    ($($ty:ty),*) => {
        $(
            impl ToHostValue for $ty {
                fn to_host_value(&self) -> HostValue {
                    HostValue::Number(*self as f64)
                }
            }

            impl FromHostValue for $ty {
                fn from_host_value(value: HostValue) -> Result<Self> {
                    let n = value.as_number().ok_or_else(|| mismatch("number", &value))?;

                    if n.is_finite() && n >= <$ty>::MIN as f64 && n <= <$ty>::MAX as f64 {
                        Ok(n as $ty)
                    } else {
                        Err(BridgeError::type_error(format!(
                            "{} is out of range for {}",
                            n,
                            stringify!($ty)
                        )))
                    }
                }
            }
        )*
    };
}

number_field!(i32, i64, u32, u64, usize);

impl ToHostValue for f64 {
    fn to_host_value(&self) -> HostValue {
        HostValue::Number(*self)
    }
}

impl FromHostValue for f64 {
    fn from_host_value(value: HostValue) -> Result<Self> {
        value.as_number().ok_or_else(|| mismatch("number", &value))
    }
}

impl ToHostValue for f32 {
    fn to_host_value(&self) -> HostValue {
        HostValue::Number(*self as f64)
    }
}

impl FromHostValue for f32 {
    fn from_host_value(value: HostValue) -> Result<Self> {
        f64::from_host_value(value).map(|n| n as f32)
    }
}

impl<T: ToHostValue> ToHostValue for Option<T> {
    fn to_host_value(&self) -> HostValue {
        match self {
            Some(value) => value.to_host_value(),
            None => HostValue::Null,
        }
    }
}

impl<T: FromHostValue> FromHostValue for Option<T> {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Null | HostValue::Undefined => Ok(None),
            other => T::from_host_value(other).map(Some),
        }
    }
}

impl<T: ToHostValue> ToHostValue for Vec<T> {
    fn to_host_value(&self) -> HostValue {
        HostValue::Array(self.iter().map(ToHostValue::to_host_value).collect())
    }
}

impl ToHostValue for HostFunction {
    fn to_host_value(&self) -> HostValue {
        HostValue::Function(self.clone())
    }
}

impl ToHostValue for Rc<dyn HostObject> {
    fn to_host_value(&self) -> HostValue {
        HostValue::Object(self.clone())
    }
}

fn mismatch(expected: &str, got: &HostValue) -> BridgeError {
    BridgeError::type_error(format!("expected {}, got {}", expected, got.type_name()))
}
