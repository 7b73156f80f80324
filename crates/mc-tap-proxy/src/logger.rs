//! Monitor listener behind `[logging] log_packets`.

use mc_tap_api::{ListenerEntry, ListenerError, ListenerPriority, PacketEvent, PacketListener, TypeFilter};
use mc_tap_proto::Direction;
use tracing::info;

pub const OWNER: &str = "mc-tap-proxy";

pub struct PacketLogger;

impl PacketListener for PacketLogger {
    fn on_packet(&self, event: &mut PacketEvent) -> Result<(), ListenerError> {
        let arrow = match event.direction() {
            Direction::ToServer => "C->S",
            Direction::ToClient => "S->C",
        };
        info!(
            "[{}] {arrow} {} {}{}",
            event.connection().id,
            event.message_type(),
            event.payload().shape().name(),
            if event.is_cancelled() { " (cancelled)" } else { "" }
        );
        Ok(())
    }
}

pub fn entry() -> ListenerEntry {
    ListenerEntry::sync(OWNER, ListenerPriority::Monitor, TypeFilter::all(), PacketLogger)
}
