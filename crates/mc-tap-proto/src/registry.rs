//! Message type registry.
//!
//! Two namespaces, one per [`Direction`]. Name-only lookups consult the
//! `ToServer` namespace first and fall back to `ToClient`, so a name that
//! exists in both resolves to the server-bound entry. The registry is built
//! once through [`RegistryBuilder`] and is immutable afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::message_type::{Alias, MessageType, VersionRange};
use crate::phase::{Direction, Phase};

// ─── Namespace ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Namespace {
    types: Vec<MessageType>,
    by_phase_name: HashMap<Phase, HashMap<String, usize>>,
    by_name: HashMap<String, Vec<usize>>,
    by_wire: HashMap<(Phase, i32), usize>,
    by_legacy: HashMap<i32, usize>,
}

impl Namespace {
    fn insert(&mut self, ty: MessageType) -> Result<(), ProtoError> {
        let idx = self.types.len();
        let names = self.by_phase_name.entry(ty.phase()).or_default();
        if names.contains_key(ty.name()) {
            return Err(ProtoError::DuplicateMessageType {
                phase: ty.phase(),
                direction: ty.direction(),
                name: ty.name().to_string(),
            });
        }
        if let Some(id) = ty.wire_id() {
            if let Some(&other) = self.by_wire.get(&(ty.phase(), id)) {
                return Err(ProtoError::DuplicateWireId {
                    phase: ty.phase(),
                    direction: ty.direction(),
                    id,
                    existing: self.types[other].name().to_string(),
                });
            }
        }
        if let Some(id) = ty.legacy_id() {
            if let Some(&other) = self.by_legacy.get(&id) {
                return Err(ProtoError::DuplicateLegacyId {
                    direction: ty.direction(),
                    id,
                    existing: self.types[other].name().to_string(),
                });
            }
        }

        names.insert(ty.name().to_string(), idx);
        self.by_name
            .entry(ty.name().to_string())
            .or_default()
            .push(idx);
        if let Some(id) = ty.wire_id() {
            self.by_wire.insert((ty.phase(), id), idx);
        }
        if let Some(id) = ty.legacy_id() {
            self.by_legacy.insert(id, idx);
        }
        self.types.push(ty);
        Ok(())
    }

    fn by_name(&self, name: &str) -> Option<&MessageType> {
        self.by_name
            .get(name)
            .and_then(|v| v.first())
            .map(|&i| &self.types[i])
    }

    fn exact(&self, phase: Phase, name: &str) -> Option<&MessageType> {
        self.by_phase_name
            .get(&phase)
            .and_then(|m| m.get(name))
            .map(|&i| &self.types[i])
    }

    fn wire(&self, phase: Phase, id: i32) -> Option<&MessageType> {
        self.by_wire.get(&(phase, id)).map(|&i| &self.types[i])
    }

    fn legacy(&self, id: i32) -> Option<&MessageType> {
        self.by_legacy.get(&id).map(|&i| &self.types[i])
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Bidirectional mapping between message types and their wire identifiers.
#[derive(Debug, Default)]
pub struct MessageTypeRegistry {
    protocol_version: Option<i32>,
    to_server: Namespace,
    to_client: Namespace,
}

impl MessageTypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    fn namespace(&self, direction: Direction) -> &Namespace {
        match direction {
            Direction::ToServer => &self.to_server,
            Direction::ToClient => &self.to_client,
        }
    }

    /// Protocol version the loaded wire table describes, if it declared one.
    pub fn protocol_version(&self) -> Option<i32> {
        self.protocol_version
    }

    /// Look up by canonical name, `ToServer` namespace first.
    pub fn lookup_by_name(&self, name: &str) -> Option<&MessageType> {
        self.to_server
            .by_name(name)
            .or_else(|| self.to_client.by_name(name))
    }

    /// Look up by canonical name within one direction.
    pub fn lookup_by_name_in(&self, direction: Direction, name: &str) -> Option<&MessageType> {
        self.namespace(direction).by_name(name)
    }

    /// Look up by canonical name or alias, honouring version ranges.
    pub fn lookup_by_name_at(&self, name: &str, version: i32) -> Option<&MessageType> {
        Direction::ALL.iter().find_map(|&d| {
            self.namespace(d)
                .types
                .iter()
                .find(|t| t.answers_to(name, version))
        })
    }

    /// Exact identity lookup.
    pub fn lookup(&self, phase: Phase, direction: Direction, name: &str) -> Option<&MessageType> {
        self.namespace(direction).exact(phase, name)
    }

    /// Look up by legacy numeric id.
    pub fn lookup_by_id(&self, direction: Direction, id: i32) -> Option<&MessageType> {
        self.namespace(direction).legacy(id)
    }

    /// Legacy numeric id of a registered type.
    pub fn id_of(&self, ty: &MessageType) -> Option<i32> {
        self.lookup(ty.phase(), ty.direction(), ty.name())
            .and_then(MessageType::legacy_id)
    }

    /// Resolve the current-protocol wire id seen in `phase`.
    pub fn resolve_wire(&self, phase: Phase, direction: Direction, id: i32) -> Option<&MessageType> {
        self.namespace(direction).wire(phase, id)
    }

    /// Like [`resolve_wire`](Self::resolve_wire) but never fails: unknown ids
    /// yield a synthetic unknown type.
    pub fn resolve_or_unknown(&self, phase: Phase, direction: Direction, id: i32) -> MessageType {
        self.resolve_wire(phase, direction, id)
            .cloned()
            .unwrap_or_else(|| MessageType::unknown(phase, direction, id))
    }

    /// Legacy id for a name, `ToServer` namespace first.
    pub fn value_of(&self, name: &str) -> Option<i32> {
        Direction::ALL
            .iter()
            .find_map(|&d| self.namespace(d).by_name(name).and_then(|t| t.legacy_id()))
    }

    /// Declared name for a legacy id, `ToServer` namespace first.
    pub fn declared_name(&self, id: i32) -> Option<&str> {
        Direction::ALL
            .iter()
            .find_map(|&d| self.namespace(d).legacy(id).map(|t| t.name()))
    }

    /// All registered types of one direction, in registration order.
    pub fn types(&self, direction: Direction) -> &[MessageType] {
        &self.namespace(direction).types
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageType> {
        self.to_server.types.iter().chain(self.to_client.types.iter())
    }

    pub fn len(&self) -> usize {
        self.to_server.types.len() + self.to_client.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// One-shot bulk loader for a [`MessageTypeRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: MessageTypeRegistry,
}

impl RegistryBuilder {
    pub fn protocol_version(mut self, version: i32) -> Self {
        self.registry.protocol_version = Some(version);
        self
    }

    pub fn register(mut self, ty: MessageType) -> Result<Self, ProtoError> {
        match ty.direction() {
            Direction::ToServer => self.registry.to_server.insert(ty)?,
            Direction::ToClient => self.registry.to_client.insert(ty)?,
        }
        Ok(self)
    }

    pub fn register_all(
        self,
        types: impl IntoIterator<Item = MessageType>,
    ) -> Result<Self, ProtoError> {
        types.into_iter().try_fold(self, |b, ty| b.register(ty))
    }

    pub fn load_table(mut self, table: RegistryTable) -> Result<Self, ProtoError> {
        if let Some(v) = table.protocol_version {
            self.registry.protocol_version = Some(v);
        }
        self.register_all(table.messages.into_iter().map(MessageEntry::into_type))
    }

    pub fn build(self) -> MessageTypeRegistry {
        self.registry
    }
}

// ─── Wire table file format ──────────────────────────────────────────────────

/// Serialized wire identifier table, as loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryTable {
    #[serde(default)]
    pub protocol_version: Option<i32>,
    pub messages: Vec<MessageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntry {
    pub phase: Phase,
    pub direction: Direction,
    pub name: String,
    #[serde(default)]
    pub wire_id: Option<i32>,
    #[serde(default)]
    pub legacy_id: Option<i32>,
    #[serde(default)]
    pub versions: VersionRange,
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

impl MessageEntry {
    fn into_type(self) -> MessageType {
        let mut ty = MessageType::new(self.phase, self.direction, self.name)
            .with_versions(self.versions)
            .with_aliases(self.aliases);
        if let Some(id) = self.wire_id {
            ty = ty.with_wire_id(id);
        }
        if let Some(id) = self.legacy_id {
            ty = ty.with_legacy_id(id);
        }
        ty
    }
}

impl RegistryTable {
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::RegistryTable(e.to_string()))
    }
}
