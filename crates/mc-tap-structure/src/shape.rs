//! Message shapes: ordered field descriptors plus the cached slot table.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::structure::Structure;
use crate::value::{OpaqueValue, Value, ValueKind};

static NEXT_SHAPE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique shape identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u32);

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage and wire layout of one field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Bool,
    Byte,
    /// Unsigned byte on the wire, surfaced as an int.
    UnsignedByte,
    Short,
    /// Unsigned short on the wire, surfaced as an int.
    UnsignedShort,
    Int,
    VarInt,
    Long,
    VarLong,
    Float,
    Double,
    String { max_chars: usize },
    ByteArray,
    Uuid,
    /// Everything left in the body. Only valid as the last field.
    Remaining,
    List(Box<FieldKind>),
    Optional(Box<FieldKind>),
    Composite(Arc<Shape>),
    Opaque,
}

impl FieldKind {
    pub fn string() -> Self {
        FieldKind::String {
            max_chars: mc_tap_proto::codec::MAX_STRING_CHARS,
        }
    }

    pub fn list_of(element: FieldKind) -> Self {
        FieldKind::List(Box::new(element))
    }

    pub fn optional(inner: FieldKind) -> Self {
        FieldKind::Optional(Box::new(inner))
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            FieldKind::Bool => ValueKind::Bool,
            FieldKind::Byte => ValueKind::Byte,
            FieldKind::Short => ValueKind::Short,
            FieldKind::UnsignedByte
            | FieldKind::UnsignedShort
            | FieldKind::Int
            | FieldKind::VarInt => ValueKind::Int,
            FieldKind::Long | FieldKind::VarLong => ValueKind::Long,
            FieldKind::Float => ValueKind::Float,
            FieldKind::Double => ValueKind::Double,
            FieldKind::String { .. } => ValueKind::String,
            FieldKind::ByteArray | FieldKind::Remaining => ValueKind::Bytes,
            FieldKind::Uuid => ValueKind::Uuid,
            FieldKind::List(_) => ValueKind::List,
            FieldKind::Optional(_) => ValueKind::Optional,
            FieldKind::Composite(_) => ValueKind::Composite,
            FieldKind::Opaque => ValueKind::Opaque,
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Byte => Value::Byte(0),
            FieldKind::Short => Value::Short(0),
            FieldKind::UnsignedByte
            | FieldKind::UnsignedShort
            | FieldKind::Int
            | FieldKind::VarInt => Value::Int(0),
            FieldKind::Long | FieldKind::VarLong => Value::Long(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Double => Value::Double(0.0),
            FieldKind::String { .. } => Value::String(String::new()),
            FieldKind::ByteArray | FieldKind::Remaining => Value::Bytes(Bytes::new()),
            FieldKind::Uuid => Value::Uuid(0),
            FieldKind::List(_) => Value::List(Vec::new()),
            FieldKind::Optional(_) => Value::Optional(None),
            FieldKind::Composite(shape) => Value::Composite(Structure::new(shape.clone())),
            FieldKind::Opaque => Value::Opaque(OpaqueValue::empty()),
        }
    }

    /// Whether `value` may be stored in a field of this kind.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::List(element), Value::List(items)) => {
                items.iter().all(|item| element.admits(item))
            }
            (FieldKind::Optional(inner), Value::Optional(v)) => {
                v.as_deref().is_none_or(|v| inner.admits(v))
            }
            (FieldKind::Composite(shape), Value::Composite(s)) => s.shape().id() == shape.id(),
            _ => self.value_kind() == value.kind(),
        }
    }
}

/// A named field of a shape.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

/// Immutable layout of one message body.
pub struct Shape {
    id: ShapeId,
    name: String,
    fields: Vec<FieldDescriptor>,
    slots: HashMap<ValueKind, Vec<usize>>,
}

impl Shape {
    pub fn builder(name: impl Into<String>) -> ShapeBuilder {
        ShapeBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// The shape with no fields.
    pub fn empty() -> Arc<Shape> {
        static EMPTY: OnceLock<Arc<Shape>> = OnceLock::new();
        EMPTY.get_or_init(|| Shape::builder("empty").build()).clone()
    }

    /// Single `body` field holding the raw payload; used for messages with
    /// no known layout.
    pub fn opaque_body() -> Arc<Shape> {
        static OPAQUE: OnceLock<Arc<Shape>> = OnceLock::new();
        OPAQUE
            .get_or_init(|| {
                Shape::builder("opaque")
                    .field("body", FieldKind::Remaining)
                    .build()
            })
            .clone()
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, storage_index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(storage_index)
    }

    /// Storage index of the `index`-th field of `kind`.
    pub fn slot(&self, kind: ValueKind, index: usize) -> Option<usize> {
        self.slots.get(&kind).and_then(|s| s.get(index)).copied()
    }

    /// Number of fields of `kind`.
    pub fn slot_count(&self, kind: ValueKind) -> usize {
        self.slots.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.id)
    }
}

/// Collects field descriptors, then freezes them into a [`Shape`].
pub struct ShapeBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl ShapeBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            kind,
        });
        self
    }

    /// Freeze the layout. The kind-to-slot table is computed here, once.
    pub fn build(self) -> Arc<Shape> {
        let mut slots: HashMap<ValueKind, Vec<usize>> = HashMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            slots.entry(field.kind.value_kind()).or_default().push(i);
        }
        Arc::new(Shape {
            id: ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)),
            name: self.name,
            fields: self.fields,
            slots,
        })
    }
}
