//! Listener traits and registration entries.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mc_tap_proto::MessageType;

use crate::event::PacketEvent;

pub use futures::future::BoxFuture;

/// Error a listener may return. It is logged and the listener's changes
/// are rolled back; dispatch continues with the next listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

// ─── Priorities ──────────────────────────────────────────────────────────────

/// Order in which listeners run. Lower tiers run first, so higher tiers get
/// the final say; `Monitor` runs last and may only observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListenerPriority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    Monitor,
}

impl ListenerPriority {
    pub const ALL: [ListenerPriority; 6] = [
        ListenerPriority::Lowest,
        ListenerPriority::Low,
        ListenerPriority::Normal,
        ListenerPriority::High,
        ListenerPriority::Highest,
        ListenerPriority::Monitor,
    ];

    pub fn is_monitor(self) -> bool {
        self == ListenerPriority::Monitor
    }
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// Which message types a listener wants. Message types carry their
/// direction, so a filter also selects directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    Only(HashSet<MessageType>),
    AllExcept(HashSet<MessageType>),
}

impl TypeFilter {
    pub fn only(types: impl IntoIterator<Item = MessageType>) -> Self {
        TypeFilter::Only(types.into_iter().collect())
    }

    pub fn all_except(types: impl IntoIterator<Item = MessageType>) -> Self {
        TypeFilter::AllExcept(types.into_iter().collect())
    }

    /// Every message type, known or not.
    pub fn all() -> Self {
        TypeFilter::AllExcept(HashSet::new())
    }

    pub fn matches(&self, ty: &MessageType) -> bool {
        match self {
            TypeFilter::Only(set) => set.contains(ty),
            TypeFilter::AllExcept(set) => !set.contains(ty),
        }
    }
}

// ─── Listener traits ─────────────────────────────────────────────────────────

/// Runs in-line on the transport thread. Must not block.
pub trait PacketListener: Send + Sync {
    fn on_packet(&self, event: &mut PacketEvent) -> Result<(), ListenerError>;
}

impl<F> PacketListener for F
where
    F: Fn(&mut PacketEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_packet(&self, event: &mut PacketEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Runs on the dispatch workers, off the transport thread.
///
/// By default the event is a read-only copy. For hold-open message types it
/// is writable, and the message is forwarded only after every async
/// listener has run.
pub trait AsyncPacketListener: Send + Sync {
    fn on_packet<'a>(
        &'a self,
        event: &'a mut PacketEvent,
    ) -> BoxFuture<'a, Result<(), ListenerError>>;
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// Handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

#[derive(Clone)]
pub enum ListenerMode {
    Sync(Arc<dyn PacketListener>),
    Async {
        listener: Arc<dyn AsyncPacketListener>,
        /// Calls running longer than this mark the listener stalled.
        timeout: Option<Duration>,
    },
}

impl fmt::Debug for ListenerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerMode::Sync(_) => f.write_str("Sync"),
            ListenerMode::Async { timeout, .. } => {
                f.debug_struct("Async").field("timeout", timeout).finish()
            }
        }
    }
}

/// A listener plus everything needed to schedule it.
#[derive(Debug, Clone)]
pub struct ListenerEntry {
    owner: String,
    priority: ListenerPriority,
    filter: TypeFilter,
    mode: ListenerMode,
}

impl ListenerEntry {
    pub fn sync(
        owner: impl Into<String>,
        priority: ListenerPriority,
        filter: TypeFilter,
        listener: impl PacketListener + 'static,
    ) -> Self {
        Self {
            owner: owner.into(),
            priority,
            filter,
            mode: ListenerMode::Sync(Arc::new(listener)),
        }
    }

    pub fn asynchronous(
        owner: impl Into<String>,
        priority: ListenerPriority,
        filter: TypeFilter,
        listener: impl AsyncPacketListener + 'static,
    ) -> Self {
        Self {
            owner: owner.into(),
            priority,
            filter,
            mode: ListenerMode::Async {
                listener: Arc::new(listener),
                timeout: None,
            },
        }
    }

    /// Set the stall timeout of an async entry. No effect on sync entries.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        if let ListenerMode::Async { timeout, .. } = &mut self.mode {
            *timeout = Some(limit);
        }
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn priority(&self) -> ListenerPriority {
        self.priority
    }

    pub fn filter(&self) -> &TypeFilter {
        &self.filter
    }

    pub fn mode(&self) -> &ListenerMode {
        &self.mode
    }

    pub fn is_async(&self) -> bool {
        matches!(self.mode, ListenerMode::Async { .. })
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.mode {
            ListenerMode::Async { timeout, .. } => timeout,
            ListenerMode::Sync(_) => None,
        }
    }
}
