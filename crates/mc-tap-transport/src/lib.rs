//! Connection transport for Java-edition streams.
//!
//! A [`Channel`] carries typed attributes and a named-stage [`Pipeline`]
//! through which inbound bytes become packets and outbound packets become
//! bytes. Stage names and attribute keys follow the vanilla server, so the
//! interception engine can locate its hook points by name.

pub mod attribute;
pub mod channel;
pub mod codec;
pub mod constants;
pub mod error;
pub mod initializer;
pub mod pipeline;
pub mod protocol;

pub use attribute::{AttributeKey, AttributeMap};
pub use channel::{Channel, ChannelId, ChannelIo};
pub use codec::{FrameReader, Packet};
pub use error::TransportError;
pub use initializer::ChannelInitializer;
pub use pipeline::{ChannelHandler, HandlerContext, Pipeline, PipelineItem};
pub use protocol::{CodecData, ConnectionProtocol, PacketFlow, PhaseLayout, ProtocolInfo};
