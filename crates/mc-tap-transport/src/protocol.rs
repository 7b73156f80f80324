//! Transport-side protocol state.
//!
//! The transport keeps its own notion of the connection protocol, stored in
//! one of several places depending on the [`PhaseLayout`]. Values that carry
//! a protocol inside a larger object expose it through a [`ProtocolHolder`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use mc_tap_proto::Phase;
use serde::{Deserialize, Serialize};

use crate::codec::{PacketDecoder, PacketEncoder};
use crate::constants::{CLIENTBOUND_ATTRIBUTE, PROTOCOL_ATTRIBUTE, SERVERBOUND_ATTRIBUTE};

/// Protocol states of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionProtocol {
    Handshaking = 0,
    Status = 1,
    Login = 2,
    Configuration = 3,
    Play = 4,
}

impl ConnectionProtocol {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Handshaking),
            1 => Some(Self::Status),
            2 => Some(Self::Login),
            3 => Some(Self::Configuration),
            4 => Some(Self::Play),
            _ => None,
        }
    }
}

impl From<ConnectionProtocol> for Phase {
    fn from(p: ConnectionProtocol) -> Self {
        match p {
            ConnectionProtocol::Handshaking => Phase::Handshaking,
            ConnectionProtocol::Status => Phase::Status,
            ConnectionProtocol::Login => Phase::Login,
            ConnectionProtocol::Configuration => Phase::Configuration,
            ConnectionProtocol::Play => Phase::Play,
        }
    }
}

impl From<Phase> for ConnectionProtocol {
    fn from(p: Phase) -> Self {
        match p {
            Phase::Handshaking => ConnectionProtocol::Handshaking,
            Phase::Status => ConnectionProtocol::Status,
            Phase::Login => ConnectionProtocol::Login,
            Phase::Configuration => ConnectionProtocol::Configuration,
            Phase::Play => ConnectionProtocol::Play,
        }
    }
}

/// Direction of a codec, named from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketFlow {
    Serverbound,
    Clientbound,
}

/// Protocol bound to one direction of a codec. Switchable in place.
pub struct ProtocolInfo {
    protocol: AtomicU8,
    flow: PacketFlow,
}

impl ProtocolInfo {
    pub fn new(protocol: ConnectionProtocol, flow: PacketFlow) -> Self {
        Self {
            protocol: AtomicU8::new(protocol as u8),
            flow,
        }
    }

    pub fn protocol(&self) -> ConnectionProtocol {
        ConnectionProtocol::from_u8(self.protocol.load(Ordering::Acquire))
            .unwrap_or(ConnectionProtocol::Handshaking)
    }

    pub fn set_protocol(&self, protocol: ConnectionProtocol) {
        self.protocol.store(protocol as u8, Ordering::Release);
    }

    pub fn flow(&self) -> PacketFlow {
        self.flow
    }
}

impl fmt::Debug for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolInfo")
            .field("protocol", &self.protocol())
            .field("flow", &self.flow)
            .finish()
    }
}

/// Per-direction codec state stored in the split attributes.
#[derive(Debug)]
pub struct CodecData {
    info: ProtocolInfo,
}

impl CodecData {
    pub fn new(protocol: ConnectionProtocol, flow: PacketFlow) -> Self {
        Self {
            info: ProtocolInfo::new(protocol, flow),
        }
    }

    pub fn info(&self) -> &ProtocolInfo {
        &self.info
    }
}

// ─── Layouts ─────────────────────────────────────────────────────────────────

/// Where a channel keeps its protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLayout {
    /// A single `protocol` attribute shared by both directions.
    SharedAttribute,
    /// One codec-data attribute per direction.
    SplitAttributes,
    /// No attribute; the configured decoder and encoder carry the protocol.
    #[default]
    CodecEmbedded,
    /// Both the shared attribute and the split attributes are kept; the
    /// shared one is authoritative.
    Transitional,
}

impl PhaseLayout {
    /// Attribute names this layout declares as phase-holding.
    pub fn phase_keys(self) -> &'static [&'static str] {
        match self {
            PhaseLayout::SharedAttribute => &[PROTOCOL_ATTRIBUTE],
            PhaseLayout::SplitAttributes => &[SERVERBOUND_ATTRIBUTE, CLIENTBOUND_ATTRIBUTE],
            PhaseLayout::CodecEmbedded => &[],
            PhaseLayout::Transitional => &[
                SERVERBOUND_ATTRIBUTE,
                PROTOCOL_ATTRIBUTE,
                CLIENTBOUND_ATTRIBUTE,
            ],
        }
    }
}

// ─── Holders ─────────────────────────────────────────────────────────────────

/// Accessor for a concrete type that carries a protocol somewhere inside it.
pub struct ProtocolHolder {
    pub type_id: fn() -> TypeId,
    pub type_name: &'static str,
    pub read: fn(&dyn Any) -> Option<ConnectionProtocol>,
    /// Returns false when the value does not currently hold a protocol.
    pub write: fn(&dyn Any, ConnectionProtocol) -> bool,
}

impl fmt::Debug for ProtocolHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolHolder")
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn info_of<T: Any>(value: &dyn Any, get: fn(&T) -> Option<&ProtocolInfo>) -> Option<&ProtocolInfo> {
    value.downcast_ref::<T>().and_then(get)
}

static HOLDERS: [ProtocolHolder; 3] = [
    ProtocolHolder {
        type_id: TypeId::of::<CodecData>,
        type_name: "CodecData",
        read: |v| info_of::<CodecData>(v, |d| Some(d.info())).map(ProtocolInfo::protocol),
        write: |v, p| {
            info_of::<CodecData>(v, |d| Some(d.info()))
                .map(|i| i.set_protocol(p))
                .is_some()
        },
    },
    ProtocolHolder {
        type_id: TypeId::of::<PacketDecoder>,
        type_name: "PacketDecoder",
        read: |v| info_of::<PacketDecoder>(v, PacketDecoder::info).map(ProtocolInfo::protocol),
        write: |v, p| {
            info_of::<PacketDecoder>(v, PacketDecoder::info)
                .map(|i| i.set_protocol(p))
                .is_some()
        },
    },
    ProtocolHolder {
        type_id: TypeId::of::<PacketEncoder>,
        type_name: "PacketEncoder",
        read: |v| info_of::<PacketEncoder>(v, PacketEncoder::info).map(ProtocolInfo::protocol),
        write: |v, p| {
            info_of::<PacketEncoder>(v, PacketEncoder::info)
                .map(|i| i.set_protocol(p))
                .is_some()
        },
    },
];

/// Every type known to hold a protocol.
pub fn protocol_holders() -> &'static [ProtocolHolder] {
    &HOLDERS
}
