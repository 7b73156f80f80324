//! Observer API: listener traits, priorities, filters and the packet event.
//!
//! Listener authors depend on this crate only. The engine that runs the
//! listeners lives in `mc-tap-injector`.

pub mod event;
pub mod listener;

pub use event::{ConnectionInfo, EventError, PacketEvent};
pub use listener::{
    AsyncPacketListener, BoxFuture, ListenerEntry, ListenerError, ListenerId, ListenerMode,
    ListenerPriority, PacketListener, TypeFilter,
};
