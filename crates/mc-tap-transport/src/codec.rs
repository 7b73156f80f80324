//! Framing, compression and packet codec stages.

use std::any::Any;
use std::sync::Mutex;

use bytes::{Buf, Bytes, BytesMut};
use mc_tap_proto::codec::{ProtoDecode, ProtoEncode};
use mc_tap_proto::compression::{compress_packet, decompress_packet};
use mc_tap_proto::types::VarIntError;
use mc_tap_proto::{ProtoError, VarInt};
use tracing::trace;

use crate::constants::MAX_FRAME_LENGTH;
use crate::error::TransportError;
use crate::pipeline::{ChannelHandler, HandlerContext, PipelineItem};
use crate::protocol::{PacketFlow, ProtocolInfo};

/// A decoded frame: wire id plus the undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub body: Bytes,
}

impl Packet {
    pub fn new(id: i32, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    /// `VarInt(id) + body`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(VarInt::written_size(self.id) + self.body.len());
        VarInt(self.id).proto_encode(&mut buf);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self, ProtoError> {
        let id = VarInt::proto_decode(&mut frame)?.0;
        Ok(Self { id, body: frame })
    }
}

fn expect_bytes(ctx: &HandlerContext<'_>, item: PipelineItem) -> Result<Bytes, TransportError> {
    match item {
        PipelineItem::Bytes(b) => Ok(b),
        PipelineItem::Packet(_) => Err(TransportError::UnexpectedItem {
            stage: ctx.name().to_string(),
            expected: "bytes",
        }),
    }
}

fn expect_packet(ctx: &HandlerContext<'_>, item: PipelineItem) -> Result<Packet, TransportError> {
    match item {
        PipelineItem::Packet(p) => Ok(p),
        PipelineItem::Bytes(_) => Err(TransportError::UnexpectedItem {
            stage: ctx.name().to_string(),
            expected: "packet",
        }),
    }
}

// ─── Framing ─────────────────────────────────────────────────────────────────

/// Accumulates stream bytes and yields complete length-prefixed frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, or `None` if more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        let (len, header) = match VarInt::decode(&self.buf) {
            Ok((len, header)) => (len.0, header),
            Err(VarIntError::BufferTooShort) => return Ok(None),
            Err(e) => return Err(ProtoError::from(e).into()),
        };
        if len < 0 {
            return Err(ProtoError::NegativeLength(len).into());
        }
        let len = len as usize;
        if len > MAX_FRAME_LENGTH {
            return Err(TransportError::FrameTooLong {
                length: len,
                max: MAX_FRAME_LENGTH,
            });
        }
        if self.buf.len() < header + len {
            return Ok(None);
        }
        self.buf.advance(header);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// `splitter`: stream bytes in, frames out.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    reader: Mutex<FrameReader>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelHandler for FrameSplitter {
    fn handle_inbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        let data = expect_bytes(ctx, item)?;
        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        reader.extend(&data);
        while let Some(frame) = reader.next_frame()? {
            out.push(PipelineItem::Bytes(frame));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `prepender`: frames in, length-prefixed frames out.
#[derive(Debug, Default)]
pub struct FramePrepender;

impl ChannelHandler for FramePrepender {
    fn handle_outbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        let frame = expect_bytes(ctx, item)?;
        if frame.len() > MAX_FRAME_LENGTH {
            return Err(TransportError::FrameTooLong {
                length: frame.len(),
                max: MAX_FRAME_LENGTH,
            });
        }
        let mut buf = BytesMut::with_capacity(VarInt::written_size(frame.len() as i32) + frame.len());
        VarInt(frame.len() as i32).proto_encode(&mut buf);
        buf.extend_from_slice(&frame);
        out.push(PipelineItem::Bytes(buf.freeze()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Compression ─────────────────────────────────────────────────────────────

/// `decompress`: compressed frames in, plain frames out.
#[derive(Debug)]
pub struct CompressionDecoder {
    threshold: usize,
}

impl CompressionDecoder {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl ChannelHandler for CompressionDecoder {
    fn handle_inbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        let frame = expect_bytes(ctx, item)?;
        out.push(PipelineItem::Bytes(decompress_packet(frame, self.threshold)?));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `compress`: plain frames in, compressed frames out.
#[derive(Debug)]
pub struct CompressionEncoder {
    threshold: usize,
}

impl CompressionEncoder {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl ChannelHandler for CompressionEncoder {
    fn handle_outbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        let frame = expect_bytes(ctx, item)?;
        out.push(PipelineItem::Bytes(compress_packet(&frame, self.threshold)?));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Packet codecs ───────────────────────────────────────────────────────────

/// `decoder`: frames in, packets out.
///
/// When configured for a protocol the decoder carries it; otherwise the
/// protocol lives in a channel attribute.
#[derive(Debug)]
pub struct PacketDecoder {
    info: Option<ProtocolInfo>,
}

impl PacketDecoder {
    pub fn new(info: Option<ProtocolInfo>) -> Self {
        Self { info }
    }

    pub fn info(&self) -> Option<&ProtocolInfo> {
        self.info.as_ref()
    }
}

impl ChannelHandler for PacketDecoder {
    fn handle_inbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        let frame = expect_bytes(ctx, item)?;
        let packet = Packet::decode(frame)?;
        trace!("[{}] decoded packet 0x{:02X} ({} bytes)", ctx.name(), packet.id, packet.body.len());
        out.push(PipelineItem::Packet(packet));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `encoder`: packets in, frames out.
#[derive(Debug)]
pub struct PacketEncoder {
    info: Option<ProtocolInfo>,
}

impl PacketEncoder {
    pub fn new(info: Option<ProtocolInfo>) -> Self {
        Self { info }
    }

    pub fn info(&self) -> Option<&ProtocolInfo> {
        self.info.as_ref()
    }
}

impl ChannelHandler for PacketEncoder {
    fn handle_outbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        let packet = expect_packet(ctx, item)?;
        out.push(PipelineItem::Bytes(packet.encode()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `inbound_config` / `outbound_config`: stands in for a codec until the
/// channel is configured for a protocol. Traffic seen meanwhile is coded as
/// handshake traffic.
#[derive(Debug)]
pub struct UnconfiguredCodec {
    flow: PacketFlow,
}

impl UnconfiguredCodec {
    pub fn new(flow: PacketFlow) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> PacketFlow {
        self.flow
    }
}

impl ChannelHandler for UnconfiguredCodec {
    fn handle_inbound(
        &self,
        _ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        match (self.flow, item) {
            (PacketFlow::Serverbound, PipelineItem::Bytes(frame)) => {
                out.push(PipelineItem::Packet(Packet::decode(frame)?));
            }
            (_, item) => out.push(item),
        }
        Ok(())
    }

    fn handle_outbound(
        &self,
        _ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        match (self.flow, item) {
            (PacketFlow::Clientbound, PipelineItem::Packet(packet)) => {
                out.push(PipelineItem::Bytes(packet.encode()));
            }
            (_, item) => out.push(item),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
