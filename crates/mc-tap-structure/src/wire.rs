//! Shape-driven conversion between message bodies and structures.

use std::sync::Arc;

use bytes::{Buf, BufMut};
use mc_tap_proto::codec::{
    ensure_remaining, read_byte_array, read_length, read_string_bounded, write_byte_array,
    write_string, ProtoDecode, ProtoEncode,
};
use mc_tap_proto::{ProtoError, VarInt, VarLong};

use crate::error::StructureError;
use crate::shape::{FieldKind, Shape};
use crate::structure::Structure;
use crate::value::Value;

/// Decode a complete body. Bytes left over after the last field are an error.
pub fn decode(shape: &Arc<Shape>, buf: &mut impl Buf) -> Result<Structure, StructureError> {
    let structure = decode_fields(shape, buf)?;
    if buf.has_remaining() {
        return Err(StructureError::TrailingBytes {
            shape: shape.name().to_string(),
            remaining: buf.remaining(),
        });
    }
    Ok(structure)
}

/// Encode a structure into `buf`.
pub fn encode(structure: &Structure, buf: &mut impl BufMut) -> Result<(), StructureError> {
    let shape = structure.shape();
    for (field, value) in shape.fields().iter().zip(structure.values()) {
        let ctx = FieldCtx {
            shape,
            field: &field.name,
        };
        encode_value(&ctx, &field.kind, value, buf)?;
    }
    Ok(())
}

struct FieldCtx<'a> {
    shape: &'a Shape,
    field: &'a str,
}

impl FieldCtx<'_> {
    fn codec(&self, source: ProtoError) -> StructureError {
        StructureError::Codec {
            shape: self.shape.name().to_string(),
            field: self.field.to_string(),
            source,
        }
    }

    fn mismatch(&self, kind: &FieldKind, value: &Value) -> StructureError {
        StructureError::KindMismatch {
            shape: self.shape.name().to_string(),
            field: self.field.to_string(),
            expected: kind.value_kind(),
            found: value.kind(),
        }
    }

    fn out_of_range(&self, value: i64) -> StructureError {
        StructureError::OutOfRange {
            shape: self.shape.name().to_string(),
            field: self.field.to_string(),
            value,
        }
    }

    fn opaque(&self) -> StructureError {
        StructureError::OpaqueField {
            shape: self.shape.name().to_string(),
            field: self.field.to_string(),
        }
    }
}

fn decode_fields<B: Buf>(shape: &Arc<Shape>, buf: &mut B) -> Result<Structure, StructureError> {
    let mut values = Vec::with_capacity(shape.fields().len());
    for field in shape.fields() {
        let ctx = FieldCtx {
            shape,
            field: &field.name,
        };
        values.push(decode_value(&ctx, &field.kind, buf)?);
    }
    Structure::from_values(shape.clone(), values)
}

fn fixed<B: Buf>(ctx: &FieldCtx<'_>, buf: &B, size: usize) -> Result<(), StructureError> {
    ensure_remaining(buf, size).map_err(|e| ctx.codec(e))
}

fn decode_value<B: Buf>(
    ctx: &FieldCtx<'_>,
    kind: &FieldKind,
    buf: &mut B,
) -> Result<Value, StructureError> {
    let value = match kind {
        FieldKind::Bool => {
            fixed(ctx, buf, 1)?;
            Value::Bool(buf.get_u8() != 0)
        }
        FieldKind::Byte => {
            fixed(ctx, buf, 1)?;
            Value::Byte(buf.get_i8())
        }
        FieldKind::UnsignedByte => {
            fixed(ctx, buf, 1)?;
            Value::Int(buf.get_u8() as i32)
        }
        FieldKind::Short => {
            fixed(ctx, buf, 2)?;
            Value::Short(buf.get_i16())
        }
        FieldKind::UnsignedShort => {
            fixed(ctx, buf, 2)?;
            Value::Int(buf.get_u16() as i32)
        }
        FieldKind::Int => {
            fixed(ctx, buf, 4)?;
            Value::Int(buf.get_i32())
        }
        FieldKind::VarInt => Value::Int(VarInt::proto_decode(buf).map_err(|e| ctx.codec(e))?.0),
        FieldKind::Long => {
            fixed(ctx, buf, 8)?;
            Value::Long(buf.get_i64())
        }
        FieldKind::VarLong => {
            Value::Long(VarLong::proto_decode(buf).map_err(|e| ctx.codec(e))?.0)
        }
        FieldKind::Float => {
            fixed(ctx, buf, 4)?;
            Value::Float(buf.get_f32())
        }
        FieldKind::Double => {
            fixed(ctx, buf, 8)?;
            Value::Double(buf.get_f64())
        }
        FieldKind::String { max_chars } => Value::String(
            read_string_bounded(buf, *max_chars).map_err(|e| ctx.codec(e))?,
        ),
        FieldKind::ByteArray => Value::Bytes(read_byte_array(buf).map_err(|e| ctx.codec(e))?),
        FieldKind::Uuid => {
            fixed(ctx, buf, 16)?;
            Value::Uuid(buf.get_u128())
        }
        FieldKind::Remaining => Value::Bytes(buf.copy_to_bytes(buf.remaining())),
        FieldKind::List(element) => {
            let count = read_length(buf).map_err(|e| ctx.codec(e))?;
            // Every element occupies at least one byte unless it is an empty composite.
            let mut items = Vec::with_capacity(count.min(buf.remaining()));
            for _ in 0..count {
                items.push(decode_value(ctx, element, buf)?);
            }
            Value::List(items)
        }
        FieldKind::Optional(inner) => {
            fixed(ctx, buf, 1)?;
            if buf.get_u8() != 0 {
                Value::Optional(Some(Box::new(decode_value(ctx, inner, buf)?)))
            } else {
                Value::Optional(None)
            }
        }
        FieldKind::Composite(shape) => Value::Composite(decode_fields(shape, buf)?),
        FieldKind::Opaque => return Err(ctx.opaque()),
    };
    Ok(value)
}

fn encode_value(
    ctx: &FieldCtx<'_>,
    kind: &FieldKind,
    value: &Value,
    buf: &mut impl BufMut,
) -> Result<(), StructureError> {
    match (kind, value) {
        (FieldKind::Bool, Value::Bool(v)) => buf.put_u8(*v as u8),
        (FieldKind::Byte, Value::Byte(v)) => buf.put_i8(*v),
        (FieldKind::UnsignedByte, Value::Int(v)) => {
            let v = u8::try_from(*v).map_err(|_| ctx.out_of_range(*v as i64))?;
            buf.put_u8(v);
        }
        (FieldKind::Short, Value::Short(v)) => buf.put_i16(*v),
        (FieldKind::UnsignedShort, Value::Int(v)) => {
            let v = u16::try_from(*v).map_err(|_| ctx.out_of_range(*v as i64))?;
            buf.put_u16(v);
        }
        (FieldKind::Int, Value::Int(v)) => buf.put_i32(*v),
        (FieldKind::VarInt, Value::Int(v)) => VarInt(*v).proto_encode(buf),
        (FieldKind::Long, Value::Long(v)) => buf.put_i64(*v),
        (FieldKind::VarLong, Value::Long(v)) => VarLong(*v).proto_encode(buf),
        (FieldKind::Float, Value::Float(v)) => buf.put_f32(*v),
        (FieldKind::Double, Value::Double(v)) => buf.put_f64(*v),
        (FieldKind::String { max_chars }, Value::String(s)) => {
            let chars = s.chars().count();
            if chars > *max_chars {
                return Err(ctx.codec(ProtoError::StringTooLong {
                    len: chars,
                    max: *max_chars,
                }));
            }
            write_string(buf, s);
        }
        (FieldKind::ByteArray, Value::Bytes(b)) => write_byte_array(buf, b),
        (FieldKind::Uuid, Value::Uuid(v)) => buf.put_u128(*v),
        (FieldKind::Remaining, Value::Bytes(b)) => buf.put_slice(b),
        (FieldKind::List(element), Value::List(items)) => {
            VarInt(items.len() as i32).proto_encode(buf);
            for item in items {
                encode_value(ctx, element, item, buf)?;
            }
        }
        (FieldKind::Optional(inner), Value::Optional(v)) => match v {
            Some(v) => {
                buf.put_u8(1);
                encode_value(ctx, inner, v, buf)?;
            }
            None => buf.put_u8(0),
        },
        (FieldKind::Composite(_), Value::Composite(s)) => encode(s, buf)?,
        (FieldKind::Opaque, _) => return Err(ctx.opaque()),
        (kind, value) => return Err(ctx.mismatch(kind, value)),
    }
    Ok(())
}
