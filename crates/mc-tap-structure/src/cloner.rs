//! Deep copies of decoded structures.
//!
//! Async listeners receive a private copy of the payload so that later
//! mutations by the pipeline cannot race them. `Structure::clone` shares
//! byte buffers; the cloner copies them out.

use bytes::Bytes;

use crate::error::CloneError;
use crate::shape::Shape;
use crate::structure::Structure;
use crate::value::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectCloner;

impl ObjectCloner {
    pub fn new() -> Self {
        Self
    }

    /// Copy every value of `source` so that no buffer is shared with it.
    ///
    /// Fails on opaque handles, which have no meaningful deep copy.
    pub fn clone_structure(&self, source: &Structure) -> Result<Structure, CloneError> {
        let shape = source.shape();
        let values = shape
            .fields()
            .iter()
            .zip(source.values())
            .map(|(field, value)| self.clone_value(shape, &field.name, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Structure::from_parts(shape.clone(), values))
    }

    fn clone_value(&self, shape: &Shape, field: &str, value: &Value) -> Result<Value, CloneError> {
        let copy = match value {
            Value::Bytes(b) => Value::Bytes(Bytes::copy_from_slice(b)),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.clone_value(shape, field, item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Optional(inner) => match inner {
                Some(v) => Value::Optional(Some(Box::new(self.clone_value(shape, field, v)?))),
                None => Value::Optional(None),
            },
            Value::Composite(s) => Value::Composite(self.clone_structure(s)?),
            Value::Opaque(handle) => {
                return Err(CloneError::Unsupported {
                    shape: shape.name().to_string(),
                    field: field.to_string(),
                    type_name: handle.type_name(),
                })
            }
            other => other.clone(),
        };
        Ok(copy)
    }
}
