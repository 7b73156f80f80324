//! Reading and advancing the transport's notion of a channel's phase.
//!
//! Transports keep their phase in different places. The strategy is chosen
//! once, at startup, from the attribute names the transport declares as
//! phase-holding.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mc_tap_proto::{Direction, Phase};
use mc_tap_transport::constants::{DECODER, ENCODER, INBOUND_CONFIG, OUTBOUND_CONFIG};
use mc_tap_transport::protocol::{protocol_holders, ProtocolHolder};
use mc_tap_transport::{Channel, CodecData, ConnectionProtocol, PacketFlow};
use tracing::debug;

use crate::error::ResolverError;

/// Per-type accessor cache. A `None` entry records that a type holds no
/// protocol, so the lookup is not repeated.
#[derive(Debug, Default)]
pub struct HolderCache {
    holders: RwLock<HashMap<TypeId, Option<&'static ProtocolHolder>>>,
}

impl HolderCache {
    pub fn holder_for(&self, value: &dyn Any) -> Option<&'static ProtocolHolder> {
        let id = value.type_id();
        {
            let cache = self.holders.read().unwrap_or_else(|e| e.into_inner());
            if let Some(found) = cache.get(&id) {
                return *found;
            }
        }

        let mut cache = self.holders.write().unwrap_or_else(|e| e.into_inner());
        // Another thread may have derived it while we waited.
        if let Some(found) = cache.get(&id) {
            return *found;
        }
        let found = protocol_holders().iter().find(|h| (h.type_id)() == id);
        match found {
            Some(h) => debug!("Derived protocol accessor for {}", h.type_name),
            None => debug!("Value type {id:?} carries no protocol"),
        }
        cache.insert(id, found);
        found
    }

    pub fn len(&self) -> usize {
        self.holders.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.holders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

// ─── Strategies ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PhaseResolver {
    /// One attribute, shared by both directions, holding the protocol itself.
    SharedSlot { key: &'static str },
    /// One attribute per direction, each holding a protocol-carrying value.
    SplitSlots {
        serverbound: &'static str,
        clientbound: &'static str,
        holders: HolderCache,
    },
    /// No attribute; the configured codec stages carry the protocol.
    CodecEmbedded { holders: HolderCache },
}

impl PhaseResolver {
    /// Pick a strategy for the declared phase-holding attribute names.
    pub fn probe(keys: &[&'static str]) -> Result<Self, ResolverError> {
        let resolver = match keys {
            [] => PhaseResolver::CodecEmbedded {
                holders: HolderCache::default(),
            },
            [key] => PhaseResolver::SharedSlot { key: *key },
            _ => {
                if let Some(key) = keys.iter().find(|k| **k == "protocol") {
                    PhaseResolver::SharedSlot { key: *key }
                } else {
                    let serverbound = keys.iter().find(|k| k.contains("server"));
                    let clientbound = keys.iter().find(|k| k.contains("client"));
                    match (serverbound, clientbound) {
                        (Some(s), Some(c)) => PhaseResolver::SplitSlots {
                            serverbound: *s,
                            clientbound: *c,
                            holders: HolderCache::default(),
                        },
                        _ => {
                            return Err(ResolverError::NoStrategy {
                                keys: keys.iter().map(|k| k.to_string()).collect(),
                            })
                        }
                    }
                }
            }
        };
        debug!("Phase strategy {} for keys {keys:?}", resolver.strategy());
        Ok(resolver)
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            PhaseResolver::SharedSlot { .. } => "shared_slot",
            PhaseResolver::SplitSlots { .. } => "split_slots",
            PhaseResolver::CodecEmbedded { .. } => "codec_embedded",
        }
    }

    /// Current phase of one direction of `channel`.
    pub fn resolve(&self, channel: &Channel, direction: Direction) -> Result<Phase, ResolverError> {
        let unresolvable = |reason| ResolverError::Unresolvable {
            channel: channel.id(),
            direction,
            reason,
        };

        match self {
            PhaseResolver::SharedSlot { key } => {
                let value = channel
                    .attrs()
                    .get_raw(key)
                    .ok_or_else(|| unresolvable("phase attribute unset"))?;
                value
                    .downcast_ref::<ConnectionProtocol>()
                    .map(|p| Phase::from(*p))
                    .ok_or_else(|| unresolvable("phase attribute holds another type"))
            }
            PhaseResolver::SplitSlots {
                serverbound,
                clientbound,
                holders,
            } => {
                let key = match direction {
                    Direction::ToServer => serverbound,
                    Direction::ToClient => clientbound,
                };
                // Unset slots belong to a channel that has not left handshaking.
                let Some(value) = channel.attrs().get_raw(key) else {
                    return Ok(Phase::Handshaking);
                };
                let value: &dyn Any = &*value;
                holders
                    .holder_for(value)
                    .and_then(|h| (h.read)(value))
                    .map(Phase::from)
                    .ok_or_else(|| unresolvable("phase attribute carries no protocol"))
            }
            PhaseResolver::CodecEmbedded { holders } => {
                let (codec, placeholder) = codec_names(direction);
                if let Some(handler) = channel.pipeline().get(codec) {
                    let value = handler.as_any();
                    return holders
                        .holder_for(value)
                        .and_then(|h| (h.read)(value))
                        .map(Phase::from)
                        .ok_or_else(|| unresolvable("codec stage carries no protocol"));
                }
                if channel.pipeline().contains(placeholder) {
                    Ok(Phase::Handshaking)
                } else {
                    Err(unresolvable("no codec stage in pipeline"))
                }
            }
        }
    }

    /// Move one direction of `channel` to `phase`.
    pub fn advance(
        &self,
        channel: &Arc<Channel>,
        direction: Direction,
        phase: Phase,
    ) -> Result<(), ResolverError> {
        let protocol = ConnectionProtocol::from(phase);
        let flow = flow_of(direction);

        match self {
            PhaseResolver::SharedSlot { key } => {
                channel.attrs().set_raw(key, Arc::new(protocol));
            }
            PhaseResolver::SplitSlots {
                serverbound,
                clientbound,
                holders,
            } => {
                let key = match direction {
                    Direction::ToServer => *serverbound,
                    Direction::ToClient => *clientbound,
                };
                let written = channel.attrs().get_raw(key).is_some_and(|value| {
                    let value: &dyn Any = &*value;
                    holders
                        .holder_for(value)
                        .is_some_and(|h| (h.write)(value, protocol))
                });
                if !written {
                    channel
                        .attrs()
                        .set_raw(key, Arc::new(CodecData::new(protocol, flow)));
                }
            }
            PhaseResolver::CodecEmbedded { .. } => channel.configure(flow, protocol)?,
        }
        debug!("[{}] {direction} phase now {phase}", channel.id());
        Ok(())
    }

    /// Forget every derived accessor.
    pub fn clear_cache(&self) {
        match self {
            PhaseResolver::SharedSlot { .. } => {}
            PhaseResolver::SplitSlots { holders, .. } | PhaseResolver::CodecEmbedded { holders } => {
                holders.clear()
            }
        }
    }

    pub fn cached_types(&self) -> usize {
        match self {
            PhaseResolver::SharedSlot { .. } => 0,
            PhaseResolver::SplitSlots { holders, .. } | PhaseResolver::CodecEmbedded { holders } => {
                holders.len()
            }
        }
    }
}

fn codec_names(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::ToServer => (DECODER, INBOUND_CONFIG),
        Direction::ToClient => (ENCODER, OUTBOUND_CONFIG),
    }
}

pub(crate) fn flow_of(direction: Direction) -> PacketFlow {
    match direction {
        Direction::ToServer => PacketFlow::Serverbound,
        Direction::ToClient => PacketFlow::Clientbound,
    }
}
