//! A connection with attributes, a pipeline, and two sinks.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::attribute::AttributeMap;
use crate::codec::{CompressionDecoder, CompressionEncoder, Packet, PacketDecoder, PacketEncoder};
use crate::constants::*;
use crate::error::TransportError;
use crate::pipeline::{ChannelHandler, HandlerContext, Pipeline, PipelineItem, Stage};
use crate::protocol::{ConnectionProtocol, PacketFlow, PhaseLayout, ProtocolInfo};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiving ends of a channel's sinks.
pub struct ChannelIo {
    /// Packets that made it through the inbound pipeline.
    pub inbound: mpsc::UnboundedReceiver<Packet>,
    /// Encoded bytes ready for the socket.
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
}

pub struct Channel {
    id: ChannelId,
    remote: SocketAddr,
    layout: PhaseLayout,
    attrs: AttributeMap,
    pipeline: Pipeline,
    open: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<Packet>,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
}

impl Channel {
    /// A channel with an empty pipeline.
    pub fn new(remote: SocketAddr, layout: PhaseLayout) -> (Arc<Self>, ChannelIo) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            id: ChannelId::next(),
            remote,
            layout,
            attrs: AttributeMap::new(),
            pipeline: Pipeline::new(),
            open: AtomicBool::new(true),
            inbound_tx,
            outbound_tx,
        });
        (channel, ChannelIo { inbound, outbound })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn layout(&self) -> PhaseLayout {
        self.layout
    }

    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    // ─── Traversal ───────────────────────────────────────────────────────────

    /// Feed bytes read from the socket through the whole inbound pipeline.
    pub fn fire_inbound(self: &Arc<Self>, data: Bytes) -> Result<(), TransportError> {
        let stages = self.pipeline.snapshot();
        self.run_inbound(&stages, 0, PipelineItem::Bytes(data))
    }

    /// Send a packet through the whole outbound pipeline.
    pub fn write(self: &Arc<Self>, packet: Packet) -> Result<(), TransportError> {
        let stages = self.pipeline.snapshot();
        self.run_outbound(&stages, stages.len(), PipelineItem::Packet(packet))
    }

    /// Continue an inbound item from the stage after `after`.
    pub fn resume_inbound(
        self: &Arc<Self>,
        after: &str,
        item: PipelineItem,
    ) -> Result<(), TransportError> {
        let stages = self.pipeline.snapshot();
        let index = position(&stages, after)?;
        self.run_inbound(&stages, index + 1, item)
    }

    /// Continue an outbound item from the stage before `before`.
    pub fn resume_outbound(
        self: &Arc<Self>,
        before: &str,
        item: PipelineItem,
    ) -> Result<(), TransportError> {
        let stages = self.pipeline.snapshot();
        let index = position(&stages, before)?;
        self.run_outbound(&stages, index, item)
    }

    fn run_inbound(
        self: &Arc<Self>,
        stages: &[Stage],
        start: usize,
        item: PipelineItem,
    ) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let mut items = vec![item];
        for stage in stages.iter().skip(start) {
            let ctx = HandlerContext::new(self, &stage.name);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                stage.handler.handle_inbound(&ctx, item, &mut out)?;
            }
            if out.is_empty() {
                return Ok(());
            }
            items = out;
        }
        for item in items {
            match item {
                PipelineItem::Packet(packet) => {
                    if self.inbound_tx.send(packet).is_err() {
                        trace!("[{}] inbound sink dropped", self.id);
                    }
                }
                PipelineItem::Bytes(b) => {
                    trace!("[{}] discarding {} undecoded bytes at tail", self.id, b.len());
                }
            }
        }
        Ok(())
    }

    fn run_outbound(
        self: &Arc<Self>,
        stages: &[Stage],
        end: usize,
        item: PipelineItem,
    ) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let mut items = vec![item];
        for stage in stages[..end.min(stages.len())].iter().rev() {
            let ctx = HandlerContext::new(self, &stage.name);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                stage.handler.handle_outbound(&ctx, item, &mut out)?;
            }
            if out.is_empty() {
                return Ok(());
            }
            items = out;
        }
        for item in items {
            match item {
                PipelineItem::Bytes(bytes) => {
                    if self.outbound_tx.send(bytes).is_err() {
                        trace!("[{}] outbound sink dropped", self.id);
                    }
                }
                PipelineItem::Packet(_) => {
                    return Err(TransportError::UnexpectedItem {
                        stage: "head".to_string(),
                        expected: "bytes",
                    })
                }
            }
        }
        Ok(())
    }

    // ─── Pipeline changes ────────────────────────────────────────────────────

    /// Remove a stage and notify it.
    pub fn remove_handler(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Arc<dyn ChannelHandler>, TransportError> {
        let handler = self.pipeline.take(name)?;
        handler.handler_removed(&HandlerContext::new(self, name));
        Ok(handler)
    }

    /// Replace a stage in place and notify the old one.
    pub fn replace_handler(
        self: &Arc<Self>,
        old: &str,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Arc<dyn ChannelHandler>, TransportError> {
        let previous = self.pipeline.swap(old, name, handler)?;
        previous.handler_removed(&HandlerContext::new(self, old));
        Ok(previous)
    }

    /// Bind one direction's codec to `protocol`.
    ///
    /// A configured codec is switched in place; a placeholder is replaced
    /// by a codec carrying the protocol.
    pub fn configure(
        self: &Arc<Self>,
        flow: PacketFlow,
        protocol: ConnectionProtocol,
    ) -> Result<(), TransportError> {
        let (codec, placeholder) = match flow {
            PacketFlow::Serverbound => (DECODER, INBOUND_CONFIG),
            PacketFlow::Clientbound => (ENCODER, OUTBOUND_CONFIG),
        };

        if let Some(handler) = self.pipeline.get(codec) {
            let info = match flow {
                PacketFlow::Serverbound => handler
                    .as_any()
                    .downcast_ref::<PacketDecoder>()
                    .and_then(PacketDecoder::info),
                PacketFlow::Clientbound => handler
                    .as_any()
                    .downcast_ref::<PacketEncoder>()
                    .and_then(PacketEncoder::info),
            };
            if let Some(info) = info {
                info.set_protocol(protocol);
                return Ok(());
            }
        }

        let info = Some(ProtocolInfo::new(protocol, flow));
        let handler: Arc<dyn ChannelHandler> = match flow {
            PacketFlow::Serverbound => Arc::new(PacketDecoder::new(info)),
            PacketFlow::Clientbound => Arc::new(PacketEncoder::new(info)),
        };
        let old = if self.pipeline.contains(placeholder) {
            placeholder
        } else {
            codec
        };
        self.replace_handler(old, codec, handler)?;
        debug!("[{}] {codec} configured for {protocol:?}", self.id);
        Ok(())
    }

    /// Install (or re-threshold) the compression stages.
    pub fn enable_compression(self: &Arc<Self>, threshold: usize) -> Result<(), TransportError> {
        let decompress: Arc<dyn ChannelHandler> = Arc::new(CompressionDecoder::new(threshold));
        if self.pipeline.contains(DECOMPRESS) {
            self.replace_handler(DECOMPRESS, DECOMPRESS, decompress)?;
        } else {
            self.pipeline.add_after(SPLITTER, DECOMPRESS, decompress)?;
        }

        let compress: Arc<dyn ChannelHandler> = Arc::new(CompressionEncoder::new(threshold));
        if self.pipeline.contains(COMPRESS) {
            self.replace_handler(COMPRESS, COMPRESS, compress)?;
        } else {
            self.pipeline.add_after(PREPENDER, COMPRESS, compress)?;
        }
        debug!("[{}] compression enabled (threshold {threshold})", self.id);
        Ok(())
    }

    /// Mark closed and tear down every stage, head first.
    pub fn close(self: &Arc<Self>) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        for name in self.pipeline.names() {
            if let Err(e) = self.remove_handler(&name) {
                trace!("[{}] removing {name} during close: {e}", self.id);
            }
        }
        debug!("[{}] channel closed", self.id);
    }
}

fn position(stages: &[Stage], name: &str) -> Result<usize, TransportError> {
    stages
        .iter()
        .position(|s| s.name == name)
        .ok_or_else(|| TransportError::NoSuchHandler(name.to_string()))
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("layout", &self.layout)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
