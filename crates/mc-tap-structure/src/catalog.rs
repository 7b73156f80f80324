//! Body layouts for the built-in message catalog (protocol 767).
//!
//! Fields past the point the engine cares about (signatures, NBT text
//! components) are kept as a trailing raw field so bodies re-encode
//! byte-for-byte.

use std::sync::Arc;

use mc_tap_proto::catalog::names::*;
use mc_tap_proto::{Direction, MessageType, MessageTypeRegistry, Phase};

use crate::schema::SchemaTable;
use crate::shape::{FieldKind, Shape};

/// Bind every registered type that has a known layout.
pub fn builtin_schemas(registry: &MessageTypeRegistry) -> SchemaTable {
    let mut table = SchemaTable::new();
    for ty in registry.iter() {
        if let Some(shape) = builtin_shape(ty) {
            table.bind(ty.clone(), shape);
        }
    }
    table
}

/// Layout of one built-in message, if known.
pub fn builtin_shape(ty: &MessageType) -> Option<Arc<Shape>> {
    use Direction::*;

    let shape = match (ty.phase(), ty.direction(), ty.name()) {
        (Phase::Handshaking, ToServer, INTENTION) => Shape::builder("intention")
            .field("protocol_version", FieldKind::VarInt)
            .field("server_address", FieldKind::String { max_chars: 255 })
            .field("server_port", FieldKind::UnsignedShort)
            .field("intention", FieldKind::VarInt)
            .build(),

        (Phase::Status, ToServer, STATUS_REQUEST) => Shape::empty(),
        (Phase::Status, ToClient, STATUS_RESPONSE) => Shape::builder("status_response")
            .field("json", FieldKind::string())
            .build(),
        (Phase::Status, _, PING_REQUEST | PONG_RESPONSE) => Shape::builder("ping")
            .field("time", FieldKind::Long)
            .build(),

        (Phase::Login, ToServer, HELLO) => Shape::builder("hello")
            .field("name", FieldKind::String { max_chars: 16 })
            .field("profile_id", FieldKind::Uuid)
            .build(),
        (Phase::Login, ToClient, HELLO) => Shape::builder("encryption_request")
            .field("server_id", FieldKind::String { max_chars: 20 })
            .field("public_key", FieldKind::ByteArray)
            .field("challenge", FieldKind::ByteArray)
            .field("should_authenticate", FieldKind::Bool)
            .build(),
        (Phase::Login, ToServer, KEY) => Shape::builder("key")
            .field("shared_secret", FieldKind::ByteArray)
            .field("challenge", FieldKind::ByteArray)
            .build(),
        (Phase::Login, ToClient, LOGIN_DISCONNECT) => Shape::builder("login_disconnect")
            .field("reason", FieldKind::string())
            .build(),
        (Phase::Login, ToClient, LOGIN_FINISHED) => Shape::builder("login_finished")
            .field("profile_id", FieldKind::Uuid)
            .field("name", FieldKind::String { max_chars: 16 })
            .field("properties", FieldKind::list_of(FieldKind::Composite(property())))
            .field("strict_error_handling", FieldKind::Bool)
            .build(),
        (Phase::Login, ToClient, LOGIN_COMPRESSION) => Shape::builder("login_compression")
            .field("threshold", FieldKind::VarInt)
            .build(),
        (Phase::Login, ToServer, LOGIN_ACKNOWLEDGED) => Shape::empty(),

        (Phase::Configuration, ToServer, CLIENT_INFORMATION) => {
            Shape::builder("client_information")
                .field("language", FieldKind::String { max_chars: 16 })
                .field("view_distance", FieldKind::Byte)
                .field("chat_visibility", FieldKind::VarInt)
                .field("chat_colors", FieldKind::Bool)
                .field("model_customisation", FieldKind::UnsignedByte)
                .field("main_hand", FieldKind::VarInt)
                .field("text_filtering_enabled", FieldKind::Bool)
                .field("allows_listing", FieldKind::Bool)
                .build()
        }
        (Phase::Configuration, _, CUSTOM_PAYLOAD) => Shape::builder("custom_payload")
            .field("channel", FieldKind::string())
            .field("data", FieldKind::Remaining)
            .build(),
        (Phase::Configuration, _, FINISH_CONFIGURATION) => Shape::empty(),
        (Phase::Configuration | Phase::Play, _, KEEP_ALIVE) => Shape::builder("keep_alive")
            .field("id", FieldKind::Long)
            .build(),
        (Phase::Configuration | Phase::Play, ToClient, DISCONNECT | SYSTEM_CHAT) => {
            // NBT text component, carried raw.
            Shape::builder("text_component")
                .field("body", FieldKind::Remaining)
                .build()
        }

        (Phase::Play, ToServer, CHAT_COMMAND) => Shape::builder("chat_command")
            .field("command", FieldKind::string())
            .build(),
        (Phase::Play, ToServer, CHAT) => Shape::builder("chat")
            .field("message", FieldKind::String { max_chars: 256 })
            .field("timestamp", FieldKind::Long)
            .field("salt", FieldKind::Long)
            .field("signature_and_acks", FieldKind::Remaining)
            .build(),
        (Phase::Play, ToServer, CONFIGURATION_ACKNOWLEDGED) => Shape::empty(),
        (Phase::Play, ToClient, START_CONFIGURATION) => Shape::empty(),

        _ => return None,
    };
    Some(shape)
}

fn property() -> Arc<Shape> {
    Shape::builder("property")
        .field("name", FieldKind::string())
        .field("value", FieldKind::string())
        .field("signature", FieldKind::optional(FieldKind::string()))
        .build()
}
