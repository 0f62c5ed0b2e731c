//! Values exchanged between handlers through the request store, also the payload of
//! [`RequestContext::write`](crate::RequestContext::write).

use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A dynamically typed value.
///
/// Primitive variants cover what handlers usually pass around, anything else goes into
/// [`Value::Any`] and is read back with [`Value::downcast_ref`].
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    Any(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wraps an arbitrary value.
    pub fn any<T: Any + Send + Sync>(value: T) -> Self {
        Value::Any(Arc::new(value))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as `i64` when it is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Returns the value as `u64` when it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            Value::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Returns a reference to the wrapped value if it is a [`Value::Any`] of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Any(any) => any.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Any(_) => "any",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::UInt(u) => f.debug_tuple("UInt").field(u).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Value::Any(_) => f.write_str("Any(..)"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Value {
            #[inline]
            fn from(value: $ty) -> Self {
                Value::$variant(value.into())
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int, i64);
impl_from_for_value!(Int, i32);
impl_from_for_value!(UInt, u64);
impl_from_for_value!(UInt, u32);
impl_from_for_value!(Float, f64);
impl_from_for_value!(Str, String);
impl_from_for_value!(Str, &str);
impl_from_for_value!(Bytes, Bytes);
impl_from_for_value!(Bytes, Vec<u8>);
impl_from_for_value!(Bytes, &'static [u8]);

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}
