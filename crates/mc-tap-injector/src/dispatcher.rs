//! Listener registry and synchronous dispatch.
//!
//! The index is copy-on-write: registration builds a new sorted index and
//! swaps it in, so dispatch only ever clones an `Arc` and never waits on a
//! registration.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use mc_tap_api::{ListenerEntry, ListenerId, ListenerMode, PacketEvent, PacketListener};
use mc_tap_proto::MessageType;
use tracing::{error, info};

use crate::async_dispatch::AsyncTarget;

struct Registered {
    id: ListenerId,
    entry: ListenerEntry,
}

#[derive(Default)]
struct ListenerIndex {
    /// Both lists are sorted by priority, then registration order.
    sync: Vec<Arc<Registered>>,
    asynchronous: Vec<Arc<Registered>>,
}

impl ListenerIndex {
    fn insert(&mut self, reg: Arc<Registered>) {
        let list = if reg.entry.is_async() {
            &mut self.asynchronous
        } else {
            &mut self.sync
        };
        let priority = reg.entry.priority();
        let at = list.partition_point(|r| r.entry.priority() <= priority);
        list.insert(at, reg);
    }

    fn retain(&mut self, keep: impl Fn(&Registered) -> bool) -> usize {
        let before = self.sync.len() + self.asynchronous.len();
        self.sync.retain(|r| keep(r));
        self.asynchronous.retain(|r| keep(r));
        before - self.sync.len() - self.asynchronous.len()
    }
}

#[derive(Default)]
pub struct ListenerDispatcher {
    index: RwLock<Arc<ListenerIndex>>,
    next_id: AtomicU64,
}

impl ListenerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<ListenerIndex> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut ListenerIndex) -> R) -> R {
        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        let mut next = ListenerIndex {
            sync: guard.sync.clone(),
            asynchronous: guard.asynchronous.clone(),
        };
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    // ─── Registration ────────────────────────────────────────────────────────

    pub fn register(&self, entry: ListenerEntry) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(
            "Registered {} listener {id} for {} at {:?}",
            if entry.is_async() { "async" } else { "sync" },
            entry.owner(),
            entry.priority()
        );
        self.update(|index| index.insert(Arc::new(Registered { id, entry })));
        id
    }

    /// Takes effect for messages dispatched after the call returns.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.update(|index| index.retain(|r| r.id != id));
        if removed > 0 {
            info!("Unregistered listener {id}");
        }
        removed > 0
    }

    pub fn unregister_owner(&self, owner: &str) -> usize {
        let removed = self.update(|index| index.retain(|r| r.entry.owner() != owner));
        if removed > 0 {
            info!("Unregistered {removed} listener(s) of {owner}");
        }
        removed
    }

    pub fn len(&self) -> usize {
        let index = self.snapshot();
        index.sync.len() + index.asynchronous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─── Interest ────────────────────────────────────────────────────────────

    /// Whether any listener, sync or async, accepts `ty`.
    pub fn has_interest(&self, ty: &MessageType) -> bool {
        let index = self.snapshot();
        index
            .sync
            .iter()
            .chain(index.asynchronous.iter())
            .any(|r| r.entry.filter().matches(ty))
    }

    /// The async listeners accepting `ty`, in dispatch order.
    pub fn async_targets(&self, ty: &MessageType) -> Vec<AsyncTarget> {
        self.snapshot()
            .asynchronous
            .iter()
            .filter(|r| r.entry.filter().matches(ty))
            .filter_map(|r| match r.entry.mode() {
                ListenerMode::Async { listener, timeout } => Some(AsyncTarget {
                    id: r.id,
                    owner: r.entry.owner().into(),
                    priority: r.entry.priority(),
                    listener: Arc::clone(listener),
                    timeout: *timeout,
                }),
                ListenerMode::Sync(_) => None,
            })
            .collect()
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Run every interested sync listener over `event`, in order.
    ///
    /// A listener that errors or panics has its changes rolled back; the
    /// rest still run. `Monitor` listeners see the event read-only.
    pub fn dispatch_sync(&self, mut event: PacketEvent) -> PacketEvent {
        let index = self.snapshot();
        let ty = event.message_type().clone();

        for reg in index.sync.iter().filter(|r| r.entry.filter().matches(&ty)) {
            let ListenerMode::Sync(listener) = reg.entry.mode() else {
                continue;
            };
            event.begin_listener(reg.entry.priority().is_monitor());
            if let Err(reason) = invoke(listener.as_ref(), &mut event) {
                error!(
                    "Listener {} of {} failed on {ty}: {reason}",
                    reg.id,
                    reg.entry.owner()
                );
                event.rollback();
            }
            if let Some(what) = event.take_violation() {
                error!(
                    "Monitor listener {} of {} tried to change the {what} of {ty}",
                    reg.id,
                    reg.entry.owner()
                );
            }
        }

        event.end_dispatch();
        event
    }
}

fn invoke(listener: &dyn PacketListener, event: &mut PacketEvent) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| listener.on_packet(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

impl std::fmt::Debug for ListenerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.snapshot();
        f.debug_struct("ListenerDispatcher")
            .field("sync", &index.sync.len())
            .field("async", &index.asynchronous.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use mc_tap_api::{ConnectionInfo, ListenerError, ListenerPriority, TypeFilter};
    use mc_tap_proto::{Direction, Phase};
    use mc_tap_structure::{FieldKind, Shape, Structure};
    use mc_tap_transport::ChannelId;

    fn command_type() -> MessageType {
        MessageType::new(Phase::Play, Direction::ToServer, "CHAT_COMMAND")
    }

    fn event(text: &str) -> PacketEvent {
        let shape = Shape::builder("chat_command")
            .field("command", FieldKind::string())
            .build();
        let mut payload = Structure::new(shape);
        payload.strings().write(0, text.to_string()).unwrap();
        PacketEvent::new(
            command_type(),
            payload,
            ConnectionInfo {
                id: ChannelId(9),
                remote: "127.0.0.1:2".parse().unwrap(),
            },
        )
    }

    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl PacketListener + 'static {
        let log = log.clone();
        move |_: &mut PacketEvent| -> Result<(), ListenerError> {
            log.lock().unwrap().push(tag);
            Ok(())
        }
    }

    #[test]
    fn runs_in_priority_then_registration_order() {
        let d = ListenerDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let only = || TypeFilter::only([command_type()]);
        d.register(ListenerEntry::sync("a", ListenerPriority::High, only(), recording(&log, "high")));
        d.register(ListenerEntry::sync("a", ListenerPriority::Low, only(), recording(&log, "low-1")));
        d.register(ListenerEntry::sync("b", ListenerPriority::Monitor, only(), recording(&log, "monitor")));
        d.register(ListenerEntry::sync("b", ListenerPriority::Low, only(), recording(&log, "low-2")));
        d.register(ListenerEntry::sync("c", ListenerPriority::Lowest, TypeFilter::all(), recording(&log, "lowest")));

        d.dispatch_sync(event("help"));
        assert_eq!(*log.lock().unwrap(), ["lowest", "low-1", "low-2", "high", "monitor"]);
    }

    #[test]
    fn failing_listener_is_rolled_back_and_rest_still_run() {
        let d = ListenerDispatcher::new();
        d.register(ListenerEntry::sync(
            "bad",
            ListenerPriority::Low,
            TypeFilter::all(),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                ev.payload_mut()?.strings().write(0, "op attacker".into())?;
                ev.set_cancelled(true)?;
                Err("refused".into())
            },
        ));
        d.register(ListenerEntry::sync(
            "panicky",
            ListenerPriority::Normal,
            TypeFilter::all(),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                ev.set_cancelled(true)?;
                panic!("listener bug");
            },
        ));
        d.register(ListenerEntry::sync(
            "good",
            ListenerPriority::High,
            TypeFilter::all(),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                let cmd = ev.payload().read::<String>(0)?;
                ev.payload_mut()?.strings().write(0, format!("{cmd} --safe"))?;
                Ok(())
            },
        ));

        let ev = d.dispatch_sync(event("list"));
        assert!(!ev.is_cancelled());
        assert!(ev.is_modified());
        assert_eq!(ev.payload().read::<String>(0).unwrap(), "list --safe");
    }

    #[test]
    fn monitor_cannot_change_the_event() {
        let d = ListenerDispatcher::new();
        d.register(ListenerEntry::sync(
            "audit",
            ListenerPriority::Monitor,
            TypeFilter::all(),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                let _ = ev.set_cancelled(true);
                Ok(())
            },
        ));
        let ev = d.dispatch_sync(event("stop"));
        assert!(!ev.is_cancelled());
        assert!(!ev.is_read_only());
    }

    #[test]
    fn cancellation_is_visible_to_later_listeners() {
        let d = ListenerDispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        d.register(ListenerEntry::sync(
            "filter",
            ListenerPriority::Low,
            TypeFilter::all(),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                ev.set_cancelled(true)?;
                Ok(())
            },
        ));
        let high = Arc::new(Mutex::new(None));
        let high2 = high.clone();
        d.register(ListenerEntry::sync(
            "enforcer",
            ListenerPriority::High,
            TypeFilter::all(),
            move |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                *high2.lock().unwrap() = Some(ev.is_cancelled());
                let cmd = ev.payload().read::<String>(0)?;
                ev.payload_mut()?.strings().write(0, format!("{cmd}!"))?;
                Ok(())
            },
        ));
        let seen2 = seen.clone();
        d.register(ListenerEntry::sync(
            "observer",
            ListenerPriority::Monitor,
            TypeFilter::all(),
            move |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                *seen2.lock().unwrap() = Some(ev.is_cancelled());
                Ok(())
            },
        ));
        let ev = d.dispatch_sync(event("x"));
        assert!(ev.is_cancelled());
        // The higher tier still ran on the cancelled event.
        assert_eq!(*high.lock().unwrap(), Some(true));
        assert_eq!(ev.payload().read::<String>(0).unwrap(), "x!");
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn unregister_stops_delivery() {
        let d = ListenerDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = d.register(ListenerEntry::sync("a", ListenerPriority::Normal, TypeFilter::all(), recording(&log, "a")));
        d.register(ListenerEntry::sync("b", ListenerPriority::Normal, TypeFilter::all(), recording(&log, "b1")));
        d.register(ListenerEntry::sync("b", ListenerPriority::Normal, TypeFilter::all(), recording(&log, "b2")));
        assert!(d.has_interest(&command_type()));

        assert!(d.unregister(id));
        assert!(!d.unregister(id));
        d.dispatch_sync(event("x"));
        assert_eq!(*log.lock().unwrap(), ["b1", "b2"]);

        assert_eq!(d.unregister_owner("b"), 2);
        assert!(d.is_empty());
        assert!(!d.has_interest(&command_type()));
    }

    #[test]
    fn filters_limit_interest() {
        let d = ListenerDispatcher::new();
        d.register(ListenerEntry::sync(
            "a",
            ListenerPriority::Normal,
            TypeFilter::only([command_type()]),
            |_: &mut PacketEvent| -> Result<(), ListenerError> { Ok(()) },
        ));
        let other = MessageType::new(Phase::Play, Direction::ToClient, "SYSTEM_CHAT");
        assert!(d.has_interest(&command_type()));
        assert!(!d.has_interest(&other));
        assert!(d.async_targets(&command_type()).is_empty());
    }
}
