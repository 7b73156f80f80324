//! Builds freshly accepted channels for a given layout.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::attribute::AttributeKey;
use crate::channel::{Channel, ChannelIo};
use crate::codec::{FramePrepender, FrameSplitter, PacketDecoder, PacketEncoder, UnconfiguredCodec};
use crate::constants::*;
use crate::error::TransportError;
use crate::protocol::{CodecData, ConnectionProtocol, PacketFlow, PhaseLayout};

pub const PROTOCOL: AttributeKey<ConnectionProtocol> = AttributeKey::new(PROTOCOL_ATTRIBUTE);
pub const SERVERBOUND: AttributeKey<CodecData> = AttributeKey::new(SERVERBOUND_ATTRIBUTE);
pub const CLIENTBOUND: AttributeKey<CodecData> = AttributeKey::new(CLIENTBOUND_ATTRIBUTE);

/// Sets up the base pipeline and protocol state of new channels.
#[derive(Debug, Clone, Copy)]
pub struct ChannelInitializer {
    layout: PhaseLayout,
}

impl ChannelInitializer {
    pub fn new(layout: PhaseLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> PhaseLayout {
        self.layout
    }

    /// Create a channel for `remote`, in the handshaking protocol.
    pub fn init(&self, remote: SocketAddr) -> Result<(Arc<Channel>, ChannelIo), TransportError> {
        let (channel, io) = Channel::new(remote, self.layout);
        self.build_pipeline(&channel)?;

        let attrs = channel.attrs();
        match self.layout {
            PhaseLayout::SharedAttribute => attrs.set(&PROTOCOL, ConnectionProtocol::Handshaking),
            // Split slots start empty; an unset slot reads as handshaking.
            PhaseLayout::SplitAttributes => {}
            PhaseLayout::CodecEmbedded => {}
            PhaseLayout::Transitional => {
                attrs.set(&PROTOCOL, ConnectionProtocol::Handshaking);
                attrs.set(
                    &SERVERBOUND,
                    CodecData::new(ConnectionProtocol::Handshaking, PacketFlow::Serverbound),
                );
                attrs.set(
                    &CLIENTBOUND,
                    CodecData::new(ConnectionProtocol::Handshaking, PacketFlow::Clientbound),
                );
            }
        }

        debug!(
            "[{}] initialized channel for {remote} ({:?}): {:?}",
            channel.id(),
            self.layout,
            channel.pipeline()
        );
        Ok((channel, io))
    }

    fn build_pipeline(&self, channel: &Channel) -> Result<(), TransportError> {
        let pipeline = channel.pipeline();
        pipeline.add_last(SPLITTER, Arc::new(FrameSplitter::new()))?;
        match self.layout {
            PhaseLayout::CodecEmbedded => {
                pipeline.add_last(
                    INBOUND_CONFIG,
                    Arc::new(UnconfiguredCodec::new(PacketFlow::Serverbound)),
                )?;
                pipeline.add_last(PREPENDER, Arc::new(FramePrepender))?;
                pipeline.add_last(
                    OUTBOUND_CONFIG,
                    Arc::new(UnconfiguredCodec::new(PacketFlow::Clientbound)),
                )?;
            }
            _ => {
                pipeline.add_last(DECODER, Arc::new(PacketDecoder::new(None)))?;
                pipeline.add_last(PREPENDER, Arc::new(FramePrepender))?;
                pipeline.add_last(ENCODER, Arc::new(PacketEncoder::new(None)))?;
            }
        }
        Ok(())
    }
}
