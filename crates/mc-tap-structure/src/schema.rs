//! Message type to shape bindings.

use std::collections::HashMap;
use std::sync::Arc;

use mc_tap_proto::MessageType;

use crate::shape::Shape;

/// Which [`Shape`] decodes the body of each message type.
///
/// Types without a binding decode as [`Shape::opaque_body`], so their raw
/// bytes still reach listeners unchanged.
#[derive(Debug, Default, Clone)]
pub struct SchemaTable {
    shapes: HashMap<MessageType, Arc<Shape>>,
}

impl SchemaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `ty` to `shape`, replacing any earlier binding.
    pub fn bind(&mut self, ty: MessageType, shape: Arc<Shape>) -> Option<Arc<Shape>> {
        self.shapes.insert(ty, shape)
    }

    /// Builder-style [`bind`](Self::bind).
    pub fn with(mut self, ty: MessageType, shape: Arc<Shape>) -> Self {
        self.bind(ty, shape);
        self
    }

    pub fn shape_for(&self, ty: &MessageType) -> Option<&Arc<Shape>> {
        self.shapes.get(ty)
    }

    pub fn shape_or_opaque(&self, ty: &MessageType) -> Arc<Shape> {
        self.shapes
            .get(ty)
            .cloned()
            .unwrap_or_else(Shape::opaque_body)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::FieldKind;
    use mc_tap_proto::{Direction, Phase};

    #[test]
    fn unbound_types_fall_back_to_opaque_body() {
        let keep_alive = MessageType::new(Phase::Play, Direction::ToServer, "KEEP_ALIVE");
        let shape = Shape::builder("keep_alive")
            .field("id", FieldKind::Long)
            .build();
        let table = SchemaTable::new().with(keep_alive.clone(), shape.clone());

        assert_eq!(table.shape_or_opaque(&keep_alive).id(), shape.id());
        let other = MessageType::unknown(Phase::Play, Direction::ToServer, 0x7F);
        assert_eq!(table.shape_or_opaque(&other).id(), Shape::opaque_body().id());
        assert!(table.shape_for(&other).is_none());
    }

    #[test]
    fn binding_is_per_direction() {
        let mut table = SchemaTable::new();
        let to_server = MessageType::new(Phase::Login, Direction::ToServer, "HELLO");
        let to_client = MessageType::new(Phase::Login, Direction::ToClient, "HELLO");
        table.bind(to_server.clone(), Shape::builder("hello").build());
        assert!(table.shape_for(&to_server).is_some());
        assert!(table.shape_for(&to_client).is_none());
        assert_eq!(table.len(), 1);
    }
}
