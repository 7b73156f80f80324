//! The mutable record handed to listeners for each intercepted message.

use std::net::SocketAddr;

use mc_tap_proto::{Direction, MessageType, Phase};
use mc_tap_structure::{ShapeId, Structure};
use mc_tap_transport::ChannelId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("{what} is read-only for this listener")]
    ReadOnly { what: &'static str },

    #[error("replacement payload has shape {found}, expected {expected}")]
    ShapeMismatch { expected: ShapeId, found: ShapeId },
}

/// The connection a message travels on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ChannelId,
    pub remote: SocketAddr,
}

#[derive(Debug, Clone)]
struct Checkpoint {
    /// Saved lazily, on the listener's first mutable access.
    payload: Option<Structure>,
    cancelled: bool,
    modified: bool,
}

/// One intercepted message.
///
/// The message type is fixed at creation. The payload and the cancel flag
/// can be changed by any listener that is not read-only.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    message_type: MessageType,
    payload: Structure,
    cancelled: bool,
    connection: ConnectionInfo,
    read_only: bool,
    modified: bool,
    checkpoint: Option<Checkpoint>,
    violation: Option<&'static str>,
}

impl PacketEvent {
    pub fn new(message_type: MessageType, payload: Structure, connection: ConnectionInfo) -> Self {
        Self {
            message_type,
            payload,
            cancelled: false,
            connection,
            read_only: false,
            modified: false,
            checkpoint: None,
            violation: None,
        }
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn direction(&self) -> Direction {
        self.message_type.direction()
    }

    pub fn phase(&self) -> Phase {
        self.message_type.phase()
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn payload(&self) -> &Structure {
        &self.payload
    }

    /// Mutable payload access. Marks the event modified.
    pub fn payload_mut(&mut self) -> Result<&mut Structure, EventError> {
        self.check_writable("payload")?;
        if let Some(cp) = &mut self.checkpoint {
            if cp.payload.is_none() {
                cp.payload = Some(self.payload.clone());
            }
        }
        self.modified = true;
        Ok(&mut self.payload)
    }

    /// Swap in a new payload of the same shape.
    pub fn set_payload(&mut self, payload: Structure) -> Result<(), EventError> {
        let expected = self.payload.shape().id();
        let found = payload.shape().id();
        if expected != found {
            return Err(EventError::ShapeMismatch { expected, found });
        }
        *self.payload_mut()? = payload;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Cancelling keeps the message from being forwarded. Later listeners
    /// still see it.
    pub fn set_cancelled(&mut self, cancelled: bool) -> Result<(), EventError> {
        self.check_writable("cancel flag")?;
        self.cancelled = cancelled;
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn into_payload(self) -> Structure {
        self.payload
    }

    /// A read-only copy carrying `payload` in place of this event's payload.
    pub fn detached(&self, payload: Structure) -> PacketEvent {
        PacketEvent {
            message_type: self.message_type.clone(),
            payload,
            cancelled: self.cancelled,
            connection: self.connection.clone(),
            read_only: true,
            modified: false,
            checkpoint: None,
            violation: None,
        }
    }

    fn check_writable(&mut self, what: &'static str) -> Result<(), EventError> {
        if self.read_only {
            self.violation.get_or_insert(what);
            return Err(EventError::ReadOnly { what });
        }
        Ok(())
    }

    // ─── Dispatcher hooks ────────────────────────────────────────────────────

    /// Prepare for the next listener: set its access mode and take a
    /// checkpoint to roll back to if it fails.
    #[doc(hidden)]
    pub fn begin_listener(&mut self, read_only: bool) {
        self.read_only = read_only;
        self.violation = None;
        self.checkpoint = Some(Checkpoint {
            payload: None,
            cancelled: self.cancelled,
            modified: self.modified,
        });
    }

    /// Undo everything the current listener changed.
    #[doc(hidden)]
    pub fn rollback(&mut self) {
        if let Some(cp) = self.checkpoint.take() {
            if let Some(payload) = cp.payload {
                self.payload = payload;
            }
            self.cancelled = cp.cancelled;
            self.modified = cp.modified;
        }
    }

    /// What the current read-only listener tried to change, if anything.
    #[doc(hidden)]
    pub fn take_violation(&mut self) -> Option<&'static str> {
        self.violation.take()
    }

    #[doc(hidden)]
    pub fn end_dispatch(&mut self) {
        self.read_only = false;
        self.checkpoint = None;
        self.violation = None;
    }

    /// Adopt the outcome of a listener that ran on a copy of this event.
    #[doc(hidden)]
    pub fn absorb(&mut self, other: PacketEvent) {
        if other.modified {
            self.payload = other.payload;
            self.modified = true;
        }
        self.cancelled = other.cancelled;
    }
}
