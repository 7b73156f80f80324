use mc_tap_api::ListenerId;
use mc_tap_proto::{Direction, ProtoError};
use mc_tap_structure::StructureError;
use mc_tap_transport::{ChannelId, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("no phase strategy fits the declared keys {keys:?}")]
    NoStrategy { keys: Vec<String> },

    #[error("cannot resolve {direction} phase of channel {channel}: {reason}")]
    Unresolvable {
        channel: ChannelId,
        direction: Direction,
        reason: &'static str,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("phase resolver: {0}")]
    Resolver(#[from] ResolverError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("no such listener: {0}")]
    UnknownListener(ListenerId),

    #[error("the async dispatcher needs a running tokio runtime")]
    NoRuntime,

    #[error("the engine has been shut down")]
    Shutdown,
}
