//! Stable logical identifiers for protocol messages.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::phase::{Direction, Phase};

/// Inclusive protocol-version range. Open ends are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default)]
    pub min: Option<i32>,
    #[serde(default)]
    pub max: Option<i32>,
}

impl VersionRange {
    pub const ANY: VersionRange = VersionRange {
        min: None,
        max: None,
    };

    pub fn new(min: Option<i32>, max: Option<i32>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, version: i32) -> bool {
        self.min.is_none_or(|min| version >= min) && self.max.is_none_or(|max| version <= max)
    }
}

/// A former name of a message type, valid for a range of protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    #[serde(flatten)]
    pub versions: VersionRange,
}

/// Logical identity of a protocol message.
///
/// Identity is `(phase, direction, name)`; ids, version range and aliases
/// are attributes and do not take part in equality or hashing. Clones are
/// cheap.
#[derive(Clone)]
pub struct MessageType {
    phase: Phase,
    direction: Direction,
    name: Arc<str>,
    wire_id: Option<i32>,
    legacy_id: Option<i32>,
    versions: VersionRange,
    aliases: Arc<[Alias]>,
    unknown: bool,
}

impl MessageType {
    pub fn new(phase: Phase, direction: Direction, name: impl AsRef<str>) -> Self {
        Self {
            phase,
            direction,
            name: Arc::from(name.as_ref()),
            wire_id: None,
            legacy_id: None,
            versions: VersionRange::ANY,
            aliases: Arc::from(Vec::new()),
            unknown: false,
        }
    }

    /// Synthetic type for a wire id the registry does not know.
    pub fn unknown(phase: Phase, direction: Direction, wire_id: i32) -> Self {
        let mut ty = Self::new(phase, direction, format!("UNKNOWN_0x{wire_id:02X}"));
        ty.wire_id = Some(wire_id);
        ty.unknown = true;
        ty
    }

    pub fn with_wire_id(mut self, id: i32) -> Self {
        self.wire_id = Some(id);
        self
    }

    pub fn with_legacy_id(mut self, id: i32) -> Self {
        self.legacy_id = Some(id);
        self
    }

    pub fn with_versions(mut self, versions: VersionRange) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<Alias>) -> Self {
        self.aliases = Arc::from(aliases);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire_id(&self) -> Option<i32> {
        self.wire_id
    }

    pub fn legacy_id(&self) -> Option<i32> {
        self.legacy_id
    }

    pub fn versions(&self) -> VersionRange {
        self.versions
    }

    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    pub fn is_unknown(&self) -> bool {
        self.unknown
    }

    /// Whether `name` refers to this type at `version`, either as the
    /// canonical name or through an alias whose range covers the version.
    pub fn answers_to(&self, name: &str, version: i32) -> bool {
        if &*self.name == name {
            return self.versions.contains(version);
        }
        self.aliases
            .iter()
            .any(|a| a.name == name && a.versions.contains(version))
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.phase == other.phase && self.direction == other.direction && self.name == other.name
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.phase.hash(state);
        self.direction.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("MessageType");
        s.field("phase", &self.phase)
            .field("direction", &self.direction)
            .field("name", &&*self.name);
        if let Some(id) = self.wire_id {
            s.field("wire_id", &format_args!("0x{id:02X}"));
        }
        if let Some(id) = self.legacy_id {
            s.field("legacy_id", &id);
        }
        s.finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.phase, self.direction, self.name)
    }
}
