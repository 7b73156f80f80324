//! Legacy numeric packet ids (protocol 39, release 1.3.2 through 1.6.4).
//!
//! Before the protocol grew phases every message had a single byte id per
//! sender. The tables are exposed through a [`MessageTypeRegistry`] whose
//! types all live in [`Phase::Play`] and carry only a legacy id, so
//! `value_of` / `declared_name` / `lookup_by_id` work on them directly.

use crate::error::ProtoError;
use crate::message_type::MessageType;
use crate::phase::{Direction, Phase};
use crate::registry::MessageTypeRegistry;

/// Packets sent by the server.
pub const SERVER_PACKETS: &[(&str, i32)] = &[
    ("KEEP_ALIVE", 0),
    ("LOGIN", 1),
    ("CHAT", 3),
    ("UPDATE_TIME", 4),
    ("ENTITY_EQUIPMENT", 5),
    ("SPAWN_POSITION", 6),
    ("UPDATE_HEALTH", 8),
    ("RESPAWN", 9),
    ("FLYING", 10),
    ("PLAYER_POSITION", 11),
    ("PLAYER_LOOK", 12),
    ("PLAYER_LOOK_MOVE", 13),
    ("ENTITY_LOCATION_ACTION", 17),
    ("ARM_ANIMATION", 18),
    ("NAMED_ENTITY_SPAWN", 20),
    ("PICKUP_SPAWN", 21),
    ("COLLECT", 22),
    ("VEHICLE_SPAWN", 23),
    ("MOB_SPAWN", 24),
    ("ENTITY_PAINTING", 25),
    ("ADD_EXP_ORB", 26),
    ("ENTITY_VELOCITY", 28),
    ("DESTROY_ENTITY", 29),
    ("ENTITY", 30),
    ("REL_ENTITY_MOVE", 31),
    ("ENTITY_LOOK", 32),
    ("REL_ENTITY_MOVE_LOOK", 33),
    ("ENTITY_TELEPORT", 34),
    ("ENTITY_HEAD_ROTATION", 35),
    ("ENTITY_STATUS", 38),
    ("ATTACH_ENTITY", 39),
    ("ENTITY_METADATA", 40),
    ("MOB_EFFECT", 41),
    ("REMOVE_MOB_EFFECT", 42),
    ("SET_EXPERIENCE", 43),
    ("MAP_CHUNK", 51),
    ("MULTI_BLOCK_CHANGE", 52),
    ("BLOCK_CHANGE", 53),
    ("PLAY_NOTE_BLOCK", 54),
    ("BLOCK_BREAK_ANIMATION", 55),
    ("MAP_CHUNK_BULK", 56),
    ("EXPLOSION", 60),
    ("WORLD_EVENT", 61),
    ("NAMED_SOUND_EFFECT", 62),
    ("BED", 70),
    ("WEATHER", 71),
    ("OPEN_WINDOW", 100),
    ("CLOSE_WINDOW", 101),
    ("SET_SLOT", 103),
    ("WINDOW_ITEMS", 104),
    ("CRAFT_PROGRESS_BAR", 105),
    ("TRANSACTION", 106),
    ("SET_CREATIVE_SLOT", 107),
    ("UPDATE_SIGN", 130),
    ("ITEM_DATA", 131),
    ("TILE_ENTITY_DATA", 132),
    ("STATISTIC", 200),
    ("PLAYER_INFO", 201),
    ("ABILITIES", 202),
    ("TAB_COMPLETE", 203),
    ("CUSTOM_PAYLOAD", 250),
    ("KEY_RESPONSE", 252),
    ("KEY_REQUEST", 253),
    ("KICK_DISCONNECT", 255),
];

/// Packets sent by the client.
pub const CLIENT_PACKETS: &[(&str, i32)] = &[
    ("KEEP_ALIVE", 0),
    ("LOGIN", 1),
    ("HANDSHAKE", 2),
    ("CHAT", 3),
    ("USE_ENTITY", 7),
    ("RESPAWN", 9),
    ("FLYING", 10),
    ("PLAYER_POSITION", 11),
    ("PLAYER_LOOK", 12),
    ("PLAYER_LOOK_MOVE", 13),
    ("BLOCK_DIG", 14),
    ("PLACE", 15),
    ("BLOCK_ITEM_SWITCH", 16),
    ("ARM_ANIMATION", 18),
    ("ENTITY_ACTION", 19),
    ("CLOSE_WINDOW", 101),
    ("WINDOW_CLICK", 102),
    ("TRANSACTION", 106),
    ("SET_CREATIVE_SLOT", 107),
    ("BUTTON_CLICK", 108),
    ("UPDATE_SIGN", 130),
    ("ABILITIES", 202),
    ("TAB_COMPLETE", 203),
    ("LOCALE_AND_VIEW_DISTANCE", 204),
    ("CLIENT_COMMAND", 205),
    ("CUSTOM_PAYLOAD", 250),
    ("KEY_RESPONSE", 252),
    ("GET_INFO", 254),
    ("KICK_DISCONNECT", 255),
];

/// Build a registry holding both legacy tables.
pub fn legacy_registry() -> Result<MessageTypeRegistry, ProtoError> {
    let client = CLIENT_PACKETS.iter().map(|&(name, id)| {
        MessageType::new(Phase::Play, Direction::ToServer, name).with_legacy_id(id)
    });
    let server = SERVER_PACKETS.iter().map(|&(name, id)| {
        MessageType::new(Phase::Play, Direction::ToClient, name).with_legacy_id(id)
    });
    Ok(MessageTypeRegistry::builder()
        .protocol_version(39)
        .register_all(client.chain(server))?
        .build())
}
