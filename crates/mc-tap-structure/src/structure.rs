//! Decoded message bodies and typed field access.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StructureError;
use crate::shape::Shape;
use crate::value::{FieldValue, Value, ValueKind};

/// A decoded message body: one value per field of its shape.
#[derive(Debug, Clone)]
pub struct Structure {
    shape: Arc<Shape>,
    values: Vec<Value>,
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.shape.id() == other.shape.id() && self.values == other.values
    }
}

impl Structure {
    /// A structure with every field at its default.
    pub fn new(shape: Arc<Shape>) -> Self {
        let values = shape
            .fields()
            .iter()
            .map(|f| f.kind.default_value())
            .collect();
        Self { shape, values }
    }

    /// Build from explicit values, checking count and kinds.
    pub fn from_values(shape: Arc<Shape>, values: Vec<Value>) -> Result<Self, StructureError> {
        if values.len() != shape.fields().len() {
            return Err(StructureError::ValueCount {
                shape: shape.name().to_string(),
                expected: shape.fields().len(),
                found: values.len(),
            });
        }
        for (field, value) in shape.fields().iter().zip(&values) {
            if !field.kind.admits(value) {
                return Err(StructureError::KindMismatch {
                    shape: shape.name().to_string(),
                    field: field.name.clone(),
                    expected: field.kind.value_kind(),
                    found: value.kind(),
                });
            }
        }
        Ok(Self { shape, values })
    }

    /// Values already known to fit the shape.
    pub(crate) fn from_parts(shape: Arc<Shape>, values: Vec<Value>) -> Self {
        Self { shape, values }
    }

    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at a storage index.
    pub fn value(&self, storage_index: usize) -> Option<&Value> {
        self.values.get(storage_index)
    }

    /// Value of the field named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.shape
            .fields()
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn storage_index(&self, kind: ValueKind, index: usize) -> Result<usize, StructureError> {
        self.shape
            .slot(kind, index)
            .ok_or_else(|| StructureError::FieldIndexOutOfBounds {
                shape: self.shape.name().to_string(),
                kind,
                index,
                count: self.shape.slot_count(kind),
            })
    }

    /// Number of fields readable as `T`.
    pub fn count<T: FieldValue>(&self) -> usize {
        self.shape.slot_count(T::KIND)
    }

    /// Read the `index`-th field of `T`'s kind.
    pub fn read<T: FieldValue>(&self, index: usize) -> Result<T, StructureError> {
        let slot = self.storage_index(T::KIND, index)?;
        let value = &self.values[slot];
        T::from_value(value).ok_or_else(|| StructureError::KindMismatch {
            shape: self.shape.name().to_string(),
            field: self.shape.fields()[slot].name.clone(),
            expected: T::KIND,
            found: value.kind(),
        })
    }

    /// Like [`read`](Self::read), but an absent field yields `T::fallback()`.
    ///
    /// Layouts differ between protocol versions; callers reading fields that
    /// newer or older versions omit use this instead of branching on version.
    pub fn read_safely<T: FieldValue>(&self, index: usize) -> T {
        self.read(index).unwrap_or_else(|_| T::fallback())
    }

    /// Overwrite the `index`-th field of `T`'s kind in place.
    pub fn write<T: FieldValue>(&mut self, index: usize, value: T) -> Result<(), StructureError> {
        let slot = self.storage_index(T::KIND, index)?;
        self.set_value(slot, value.into_value())
    }

    /// Overwrite the value at a storage index, checking it against the field kind.
    pub fn set_value(&mut self, storage_index: usize, value: Value) -> Result<(), StructureError> {
        let Some(field) = self.shape.field(storage_index) else {
            return Err(StructureError::FieldIndexOutOfBounds {
                shape: self.shape.name().to_string(),
                kind: value.kind(),
                index: storage_index,
                count: self.values.len(),
            });
        };
        if !field.kind.admits(&value) {
            return Err(StructureError::KindMismatch {
                shape: self.shape.name().to_string(),
                field: field.name.clone(),
                expected: field.kind.value_kind(),
                found: value.kind(),
            });
        }
        self.values[storage_index] = value;
        Ok(())
    }

    /// Typed accessor over every field of `T`'s kind.
    pub fn modifier<T: FieldValue>(&mut self) -> StructureModifier<'_, T> {
        StructureModifier {
            target: self,
            _marker: PhantomData,
        }
    }

    pub fn booleans(&mut self) -> StructureModifier<'_, bool> {
        self.modifier()
    }

    pub fn integers(&mut self) -> StructureModifier<'_, i32> {
        self.modifier()
    }

    pub fn longs(&mut self) -> StructureModifier<'_, i64> {
        self.modifier()
    }

    pub fn strings(&mut self) -> StructureModifier<'_, String> {
        self.modifier()
    }

    pub fn byte_arrays(&mut self) -> StructureModifier<'_, bytes::Bytes> {
        self.modifier()
    }

    pub fn uuids(&mut self) -> StructureModifier<'_, u128> {
        self.modifier()
    }

    pub fn lists(&mut self) -> StructureModifier<'_, Vec<Value>> {
        self.modifier()
    }

    pub fn composites(&mut self) -> StructureModifier<'_, Structure> {
        self.modifier()
    }

    pub fn optionals(&mut self) -> StructureModifier<'_, Option<Value>> {
        self.modifier()
    }
}

/// Typed view over the fields of one kind of a [`Structure`].
pub struct StructureModifier<'a, T> {
    target: &'a mut Structure,
    _marker: PhantomData<T>,
}

impl<T: FieldValue> StructureModifier<'_, T> {
    pub fn size(&self) -> usize {
        self.target.count::<T>()
    }

    pub fn read(&self, index: usize) -> Result<T, StructureError> {
        self.target.read(index)
    }

    pub fn read_safely(&self, index: usize) -> T {
        self.target.read_safely(index)
    }

    pub fn write(&mut self, index: usize, value: T) -> Result<&mut Self, StructureError> {
        self.target.write(index, value)?;
        Ok(self)
    }

    /// Read, transform and write back one field.
    pub fn modify(&mut self, index: usize, f: impl FnOnce(T) -> T) -> Result<(), StructureError> {
        let current = self.read(index)?;
        self.target.write(index, f(current))
    }

    /// All fields of this kind, in declaration order.
    pub fn values(&self) -> Vec<T> {
        (0..self.size()).filter_map(|i| self.read(i).ok()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::FieldKind;

    fn hello_shape() -> Arc<Shape> {
        Shape::builder("hello")
            .field("name", FieldKind::String { max_chars: 16 })
            .field("profile_id", FieldKind::Uuid)
            .field("signature", FieldKind::optional(FieldKind::ByteArray))
            .build()
    }

    #[test]
    fn typed_read_and_write_by_kind_index() {
        let mut s = Structure::new(hello_shape());
        s.strings().write(0, "Alex".to_string()).unwrap();
        s.uuids().write(0, 42).unwrap();

        assert_eq!(s.read::<String>(0).unwrap(), "Alex");
        assert_eq!(s.read::<u128>(0).unwrap(), 42);
        assert_eq!(s.get("name").and_then(Value::as_str), Some("Alex"));
    }

    #[test]
    fn read_out_of_range_is_an_error() {
        let s = Structure::new(hello_shape());
        let err = s.read::<String>(1).unwrap_err();
        assert!(matches!(
            err,
            StructureError::FieldIndexOutOfBounds {
                kind: ValueKind::String,
                index: 1,
                count: 1,
                ..
            }
        ));
        assert!(s.read::<i32>(0).is_err());
    }

    #[test]
    fn read_safely_defaults_absent_fields() {
        let s = Structure::new(hello_shape());
        assert_eq!(s.read_safely::<i32>(0), 0);
        assert_eq!(s.read_safely::<String>(5), "");
        assert_eq!(s.read_safely::<Option<Value>>(0), None);
        assert_eq!(s.read_safely::<Structure>(0).shape().id(), Shape::empty().id());
    }

    #[test]
    fn write_never_extends_the_shape() {
        let mut s = Structure::new(hello_shape());
        assert!(s.write(1, "extra".to_string()).is_err());
        assert_eq!(s.values().len(), 3);
    }

    #[test]
    fn write_checks_nested_kinds() {
        let mut s = Structure::new(hello_shape());
        let bad = Some(Value::Int(3));
        assert!(matches!(
            s.optionals().write(0, bad),
            Err(StructureError::KindMismatch { .. })
        ));
        let good = Some(Value::Bytes(bytes::Bytes::from_static(b"sig")));
        s.optionals().write(0, good.clone()).unwrap();
        assert_eq!(s.read::<Option<Value>>(0).unwrap(), good);
    }

    #[test]
    fn modify_transforms_in_place() {
        let shape = Shape::builder("keep_alive")
            .field("id", FieldKind::Long)
            .build();
        let mut s = Structure::from_values(shape, vec![Value::Long(10)]).unwrap();
        s.longs().modify(0, |v| v * 2).unwrap();
        assert_eq!(s.longs().values(), vec![20]);
    }

    #[test]
    fn from_values_validates() {
        let shape = Shape::builder("keep_alive")
            .field("id", FieldKind::Long)
            .build();
        assert!(matches!(
            Structure::from_values(shape.clone(), vec![]),
            Err(StructureError::ValueCount { .. })
        ));
        assert!(matches!(
            Structure::from_values(shape, vec![Value::Int(1)]),
            Err(StructureError::KindMismatch { .. })
        ));
    }
}
