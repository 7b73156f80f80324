//! Protocol-level errors.

use thiserror::Error;

use crate::phase::{Direction, Phase};

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("buffer too short: need {needed} more bytes, have {remaining}")]
    BufferTooShort { needed: usize, remaining: usize },

    #[error("VarInt encoding error: {0}")]
    VarInt(#[from] crate::types::VarIntError),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("string too long: {len} bytes exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("decompression error: {0}")]
    DecompressError(String),

    #[error("compression error: {0}")]
    CompressError(String),

    #[error("compressed length {claimed} is below threshold {threshold}")]
    BadlyCompressed { claimed: usize, threshold: usize },

    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error("unknown direction: {0}")]
    UnknownDirection(String),

    #[error("duplicate message type {direction}/{phase}/{name}")]
    DuplicateMessageType {
        phase: Phase,
        direction: Direction,
        name: String,
    },

    #[error("wire id 0x{id:02X} already bound in {direction}/{phase} (to {existing})")]
    DuplicateWireId {
        phase: Phase,
        direction: Direction,
        id: i32,
        existing: String,
    },

    #[error("legacy id {id} already bound in {direction} (to {existing})")]
    DuplicateLegacyId {
        direction: Direction,
        id: i32,
        existing: String,
    },

    #[error("registry table parse error: {0}")]
    RegistryTable(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
