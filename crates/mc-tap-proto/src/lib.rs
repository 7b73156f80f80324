//! Protocol vocabulary for the mc-tap interception engine.
//!
//! Defines phases, directions and message types, the message type registry
//! (with its legacy id surface), and the Java-edition wire primitives
//! (VarInt framing, strings, zlib packet compression) shared by the
//! transport and the structure codec.

pub mod catalog;
pub mod codec;
pub mod compression;
pub mod error;
pub mod legacy;
pub mod message_type;
pub mod phase;
pub mod registry;
pub mod types;

pub use error::ProtoError;
pub use message_type::{Alias, MessageType, VersionRange};
pub use phase::{Direction, Phase};
pub use registry::{MessageTypeRegistry, RegistryBuilder, RegistryTable};
pub use types::{VarInt, VarLong};
