//! Structure access and codec errors.

use mc_tap_proto::ProtoError;
use thiserror::Error;

use crate::value::ValueKind;

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("{shape} has no {kind:?} field at index {index} ({count} present)")]
    FieldIndexOutOfBounds {
        shape: String,
        kind: ValueKind,
        index: usize,
        count: usize,
    },

    #[error("field {field} of {shape} expects {expected:?}, got {found:?}")]
    KindMismatch {
        shape: String,
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("{shape} has {expected} fields, got {found} values")]
    ValueCount {
        shape: String,
        expected: usize,
        found: usize,
    },

    #[error("field {field} of {shape}: {source}")]
    Codec {
        shape: String,
        field: String,
        #[source]
        source: ProtoError,
    },

    #[error("{remaining} trailing bytes after decoding {shape}")]
    TrailingBytes { shape: String, remaining: usize },

    #[error("field {field} of {shape} holds an opaque handle and has no wire form")]
    OpaqueField { shape: String, field: String },

    #[error("value {value} out of range for field {field} of {shape}")]
    OutOfRange {
        shape: String,
        field: String,
        value: i64,
    },
}

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("cannot deep-copy field {field} of {shape}: {type_name} is an opaque handle")]
    Unsupported {
        shape: String,
        field: String,
        type_name: &'static str,
    },
}
