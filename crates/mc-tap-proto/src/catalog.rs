//! Built-in sample catalog for protocol 767 (release 1.21).
//!
//! Only the messages the engine itself reasons about (phase transitions,
//! compression negotiation) plus a few commonly observed ones. Anything else
//! flows through as an unknown type; a full table can be loaded from JSON
//! with [`RegistryTable`](crate::registry::RegistryTable).

use crate::error::ProtoError;
use crate::message_type::MessageType;
use crate::phase::{Direction, Phase};
use crate::registry::MessageTypeRegistry;

pub const PROTOCOL_VERSION: i32 = 767;

/// Canonical message names.
pub mod names {
    pub const INTENTION: &str = "INTENTION";

    pub const STATUS_REQUEST: &str = "STATUS_REQUEST";
    pub const STATUS_RESPONSE: &str = "STATUS_RESPONSE";
    pub const PING_REQUEST: &str = "PING_REQUEST";
    pub const PONG_RESPONSE: &str = "PONG_RESPONSE";

    pub const HELLO: &str = "HELLO";
    pub const KEY: &str = "KEY";
    pub const LOGIN_ACKNOWLEDGED: &str = "LOGIN_ACKNOWLEDGED";
    pub const LOGIN_DISCONNECT: &str = "LOGIN_DISCONNECT";
    pub const LOGIN_FINISHED: &str = "LOGIN_FINISHED";
    pub const LOGIN_COMPRESSION: &str = "LOGIN_COMPRESSION";

    pub const CLIENT_INFORMATION: &str = "CLIENT_INFORMATION";
    pub const CUSTOM_PAYLOAD: &str = "CUSTOM_PAYLOAD";
    pub const FINISH_CONFIGURATION: &str = "FINISH_CONFIGURATION";
    pub const KEEP_ALIVE: &str = "KEEP_ALIVE";
    pub const DISCONNECT: &str = "DISCONNECT";

    pub const CHAT_COMMAND: &str = "CHAT_COMMAND";
    pub const CHAT: &str = "CHAT";
    pub const CONFIGURATION_ACKNOWLEDGED: &str = "CONFIGURATION_ACKNOWLEDGED";
    pub const START_CONFIGURATION: &str = "START_CONFIGURATION";
    pub const SYSTEM_CHAT: &str = "SYSTEM_CHAT";
}

use names::*;

// (phase, direction, name, wire id, legacy id)
const ENTRIES: &[(Phase, Direction, &str, i32, Option<i32>)] = &[
    (Phase::Handshaking, Direction::ToServer, INTENTION, 0x00, Some(2)),
    (Phase::Status, Direction::ToServer, STATUS_REQUEST, 0x00, Some(254)),
    (Phase::Status, Direction::ToServer, PING_REQUEST, 0x01, None),
    (Phase::Status, Direction::ToClient, STATUS_RESPONSE, 0x00, None),
    (Phase::Status, Direction::ToClient, PONG_RESPONSE, 0x01, None),
    (Phase::Login, Direction::ToServer, HELLO, 0x00, None),
    (Phase::Login, Direction::ToServer, KEY, 0x01, Some(252)),
    (Phase::Login, Direction::ToServer, LOGIN_ACKNOWLEDGED, 0x03, None),
    (Phase::Login, Direction::ToClient, LOGIN_DISCONNECT, 0x00, None),
    (Phase::Login, Direction::ToClient, HELLO, 0x01, Some(253)),
    (Phase::Login, Direction::ToClient, LOGIN_FINISHED, 0x02, None),
    (Phase::Login, Direction::ToClient, LOGIN_COMPRESSION, 0x03, None),
    (Phase::Configuration, Direction::ToServer, CLIENT_INFORMATION, 0x00, None),
    (Phase::Configuration, Direction::ToServer, CUSTOM_PAYLOAD, 0x02, None),
    (Phase::Configuration, Direction::ToServer, FINISH_CONFIGURATION, 0x03, None),
    (Phase::Configuration, Direction::ToServer, KEEP_ALIVE, 0x04, None),
    (Phase::Configuration, Direction::ToClient, CUSTOM_PAYLOAD, 0x01, None),
    (Phase::Configuration, Direction::ToClient, DISCONNECT, 0x02, None),
    (Phase::Configuration, Direction::ToClient, FINISH_CONFIGURATION, 0x03, None),
    (Phase::Configuration, Direction::ToClient, KEEP_ALIVE, 0x04, None),
    (Phase::Play, Direction::ToServer, CHAT_COMMAND, 0x04, None),
    (Phase::Play, Direction::ToServer, CHAT, 0x06, Some(3)),
    (Phase::Play, Direction::ToServer, CONFIGURATION_ACKNOWLEDGED, 0x0C, None),
    (Phase::Play, Direction::ToServer, KEEP_ALIVE, 0x18, Some(0)),
    (Phase::Play, Direction::ToClient, DISCONNECT, 0x1D, Some(255)),
    (Phase::Play, Direction::ToClient, KEEP_ALIVE, 0x26, Some(0)),
    (Phase::Play, Direction::ToClient, START_CONFIGURATION, 0x69, None),
    (Phase::Play, Direction::ToClient, SYSTEM_CHAT, 0x6C, Some(3)),
];

/// All catalog entries as message types.
pub fn builtin_types() -> impl Iterator<Item = MessageType> {
    ENTRIES.iter().map(|&(phase, direction, name, wire, legacy)| {
        let ty = MessageType::new(phase, direction, name).with_wire_id(wire);
        match legacy {
            Some(id) => ty.with_legacy_id(id),
            None => ty,
        }
    })
}

/// Registry holding the built-in catalog.
pub fn builtin_registry() -> Result<MessageTypeRegistry, ProtoError> {
    Ok(MessageTypeRegistry::builder()
        .protocol_version(PROTOCOL_VERSION)
        .register_all(builtin_types())?
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_consistent() {
        let reg = builtin_registry().unwrap();
        assert_eq!(reg.len(), ENTRIES.len());
        assert_eq!(reg.protocol_version(), Some(PROTOCOL_VERSION));
    }

    #[test]
    fn same_wire_id_means_different_messages_per_phase() {
        let reg = builtin_registry().unwrap();
        let ids: Vec<_> = [Phase::Handshaking, Phase::Status, Phase::Login]
            .iter()
            .map(|&p| reg.resolve_wire(p, Direction::ToServer, 0).unwrap().name())
            .collect();
        assert_eq!(ids, vec![INTENTION, STATUS_REQUEST, HELLO]);
    }

    #[test]
    fn keep_alive_exists_in_two_phases() {
        let reg = builtin_registry().unwrap();
        let config = reg
            .lookup(Phase::Configuration, Direction::ToServer, KEEP_ALIVE)
            .unwrap();
        let play = reg.lookup(Phase::Play, Direction::ToServer, KEEP_ALIVE).unwrap();
        assert_ne!(config, play);
        // Name-only lookup returns the first registered server-bound entry.
        assert_eq!(reg.lookup_by_name(KEEP_ALIVE).unwrap(), config);
    }
}
