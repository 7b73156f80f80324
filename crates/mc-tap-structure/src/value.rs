//! Field values of a decoded message.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::shape::Shape;
use crate::structure::Structure;

/// Accessor family of a field. Typed access counts slots per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Uuid,
    List,
    Composite,
    Optional,
    Opaque,
}

/// Any field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Bytes),
    Uuid(u128),
    List(Vec<Value>),
    Composite(Structure),
    Optional(Option<Box<Value>>),
    Opaque(OpaqueValue),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Byte(_) => ValueKind::Byte,
            Value::Short(_) => ValueKind::Short,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::List(_) => ValueKind::List,
            Value::Composite(_) => ValueKind::Composite,
            Value::Optional(_) => ValueKind::Optional,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Value::Composite(s) => Some(s),
            _ => None,
        }
    }
}

// ─── Opaque handles ──────────────────────────────────────────────────────────

/// A transport-owned handle carried through a structure without a wire form
/// or a deep copy (live buffers, native resources).
#[derive(Clone)]
pub struct OpaqueValue {
    type_name: &'static str,
    handle: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            handle: Arc::new(value),
        }
    }

    /// Placeholder used to default-initialize opaque fields.
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.handle), Arc::as_ptr(&other.handle))
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

// ─── Typed access ────────────────────────────────────────────────────────────

/// Rust types readable and writable through a structure accessor.
pub trait FieldValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: &Value) -> Option<Self>;

    fn into_value(self) -> Value;

    /// Value returned by `read_safely` when the field is absent.
    fn fallback() -> Self;
}

macro_rules! impl_field_value {
    ($ty:ty, $kind:ident, $fallback:expr) => {
        impl FieldValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$kind(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$kind(self)
            }

            fn fallback() -> Self {
                $fallback
            }
        }
    };
}

impl_field_value!(bool, Bool, false);
impl_field_value!(i8, Byte, 0);
impl_field_value!(i16, Short, 0);
impl_field_value!(i32, Int, 0);
impl_field_value!(i64, Long, 0);
impl_field_value!(f32, Float, 0.0);
impl_field_value!(f64, Double, 0.0);
impl_field_value!(String, String, String::new());
impl_field_value!(Bytes, Bytes, Bytes::new());
impl_field_value!(u128, Uuid, 0);
impl_field_value!(Vec<Value>, List, Vec::new());

impl FieldValue for Structure {
    const KIND: ValueKind = ValueKind::Composite;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Composite(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Composite(self)
    }

    fn fallback() -> Self {
        Structure::new(Shape::empty())
    }
}

impl FieldValue for Option<Value> {
    const KIND: ValueKind = ValueKind::Optional;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Optional(v) => Some(v.as_deref().cloned()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Optional(self.map(Box::new))
    }

    fn fallback() -> Self {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(Value::Int(1).kind(), ValueKind::Int);
        assert_eq!(Value::Optional(None).kind(), ValueKind::Optional);
        assert_eq!(Value::Opaque(OpaqueValue::empty()).kind(), ValueKind::Opaque);
    }

    #[test]
    fn typed_conversion_checks_kind() {
        assert_eq!(i32::from_value(&Value::Int(7)), Some(7));
        assert_eq!(i32::from_value(&Value::Long(7)), None);
        assert_eq!(
            <Option<Value>>::from_value(&Value::Optional(Some(Box::new(Value::Bool(true))))),
            Some(Some(Value::Bool(true)))
        );
    }

    #[test]
    fn opaque_equality_is_identity() {
        let a = OpaqueValue::new(5u32);
        let b = a.clone();
        let c = OpaqueValue::new(5u32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast_ref::<u32>(), Some(&5));
        assert!(a.type_name().contains("u32"));
    }
}
