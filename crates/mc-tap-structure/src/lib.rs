//! Decoded payload model for intercepted messages.
//!
//! A message body decodes into a [`Structure`]: a [`Shape`] (the ordered
//! field descriptors of one message layout) plus one [`Value`] per field.
//! Each shape computes its kind-to-slot table once when it is built, so
//! typed access by "the i-th int field" never rescans the layout.
//!
//! - [`wire`] converts between bytes and structures using the shape.
//! - [`ObjectCloner`] produces detached deep copies for async observers.
//! - [`SchemaTable`] binds message types to shapes.

pub mod catalog;
pub mod cloner;
pub mod error;
pub mod schema;
pub mod shape;
pub mod structure;
pub mod value;
pub mod wire;

pub use cloner::ObjectCloner;
pub use error::{CloneError, StructureError};
pub use schema::SchemaTable;
pub use shape::{FieldDescriptor, FieldKind, Shape, ShapeBuilder, ShapeId};
pub use structure::{Structure, StructureModifier};
pub use value::{FieldValue, OpaqueValue, Value, ValueKind};
