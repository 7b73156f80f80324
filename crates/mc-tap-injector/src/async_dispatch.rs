//! Deferred observation on a pool of worker tasks.
//!
//! Every (connection, direction) pair gets its own bounded queue. A queue is
//! drained by at most one worker at a time, so async listeners see a
//! connection's messages in arrival order while different connections make
//! progress concurrently.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use mc_tap_api::{AsyncPacketListener, ListenerError, ListenerId, ListenerPriority, PacketEvent};
use mc_tap_proto::{Direction, MessageType};
use mc_tap_transport::ChannelId;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::config::{DispatchConfig, OverflowPolicy};
use crate::dispatcher::panic_message;
use crate::error::InjectorError;

type QueueKey = (ChannelId, Direction);

/// Continuation that forwards a held-open message.
pub type Resume = Box<dyn FnOnce(PacketEvent) + Send>;

/// One async listener a job is delivered to.
#[derive(Clone)]
pub struct AsyncTarget {
    pub id: ListenerId,
    pub owner: Arc<str>,
    /// `Monitor` targets see held-open messages read-only too.
    pub priority: ListenerPriority,
    pub listener: Arc<dyn AsyncPacketListener>,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for AsyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTarget")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A queued message plus the listeners that still have to see it.
pub struct AsyncJob {
    event: PacketEvent,
    targets: Vec<AsyncTarget>,
    resume: Option<Resume>,
}

impl AsyncJob {
    /// Observation only: `event` should be a detached copy.
    pub fn observe(event: PacketEvent, targets: Vec<AsyncTarget>) -> Self {
        Self {
            event,
            targets,
            resume: None,
        }
    }

    /// Listeners may change `event`; `resume` receives the outcome once all
    /// of them ran.
    pub fn hold_open(
        event: PacketEvent,
        targets: Vec<AsyncTarget>,
        resume: impl FnOnce(PacketEvent) + Send + 'static,
    ) -> Self {
        Self {
            event,
            targets,
            resume: Some(Box::new(resume)),
        }
    }

    pub fn is_hold_open(&self) -> bool {
        self.resume.is_some()
    }

    pub fn message_type(&self) -> &MessageType {
        self.event.message_type()
    }

    /// Hand a held-open message on without running the listeners.
    pub fn release(self) {
        let AsyncJob { event, resume, .. } = self;
        if let Some(resume) = resume {
            resume(event);
        }
    }
}

impl fmt::Debug for AsyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncJob")
            .field("type", &self.event.message_type().to_string())
            .field("targets", &self.targets.len())
            .field("hold_open", &self.is_hold_open())
            .finish()
    }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs accepted onto a queue.
    pub submitted: u64,
    /// Jobs whose listeners all ran (or were skipped).
    pub processed: u64,
    /// Jobs evicted by `DropOldest`.
    pub dropped: u64,
    /// Jobs refused by `RejectNew`.
    pub rejected: u64,
    /// Jobs discarded by `close_connection` or shutdown.
    pub cancelled: u64,
    /// Deliveries skipped because the listener was stalled.
    pub skipped_stalled: u64,
    pub timeouts: u64,
    /// Listener calls that errored or panicked.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
    skipped_stalled: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            skipped_stalled: self.skipped_stalled.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// ─── Queues ──────────────────────────────────────────────────────────────────

/// Jobs of one queue in arrival order.
#[derive(Default)]
struct Pending {
    jobs: VecDeque<AsyncJob>,
    /// Jobs that still have listeners to visit. Only these count against the
    /// capacity.
    observing: usize,
}

impl Pending {
    fn push(&mut self, job: AsyncJob) {
        if !job.targets.is_empty() {
            self.observing += 1;
        }
        self.jobs.push_back(job);
    }

    fn pop(&mut self) -> Option<AsyncJob> {
        let job = self.jobs.pop_front()?;
        if !job.targets.is_empty() {
            self.observing -= 1;
        }
        Some(job)
    }

    /// Give up observation of the oldest job that still has listeners to
    /// visit. An observe-only job is removed. A held-open job keeps its
    /// place and is forwarded in turn without async observation.
    fn evict_oldest(&mut self) -> Option<MessageType> {
        let pos = self.jobs.iter().position(|j| !j.targets.is_empty())?;
        self.observing -= 1;
        if self.jobs[pos].is_hold_open() {
            let job = &mut self.jobs[pos];
            job.targets.clear();
            Some(job.message_type().clone())
        } else {
            self.jobs.remove(pos).map(|job| job.message_type().clone())
        }
    }
}

#[derive(Default)]
struct OrderedQueue {
    pending: Mutex<Pending>,
    /// Set while a wake is pending or a worker is draining.
    scheduled: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Shared {
    queues: DashMap<QueueKey, Arc<OrderedQueue>>,
    wake_tx: mpsc::UnboundedSender<QueueKey>,
    capacity: usize,
    overflow: OverflowPolicy,
    stalled: DashSet<ListenerId>,
    counters: Counters,
}

type CallOutcome = Result<(PacketEvent, Result<(), ListenerError>), JoinError>;

impl Shared {
    async fn drain(self: &Arc<Self>, key: QueueKey) {
        // Closed while the wake was pending.
        let Some(queue) = self.queues.get(&key).map(|q| Arc::clone(q.value())) else {
            return;
        };
        loop {
            let job = lock(&queue.pending).pop();
            match job {
                Some(job) => self.run(job).await,
                None => {
                    queue.scheduled.store(false, Ordering::Release);
                    // A submit may have slipped in between the pop and the store.
                    if lock(&queue.pending).jobs.is_empty() || queue.scheduled.swap(true, Ordering::AcqRel) {
                        return;
                    }
                }
            }
        }
    }

    async fn run(self: &Arc<Self>, job: AsyncJob) {
        let AsyncJob {
            mut event,
            targets,
            resume,
        } = job;
        let hold_open = resume.is_some();
        let ty = event.message_type().clone();

        for target in targets {
            if self.stalled.contains(&target.id) {
                Counters::bump(&self.counters.skipped_stalled, 1);
                trace!("Skipping stalled listener {} for {ty}", target.id);
                continue;
            }

            let mut copy = event.clone();
            copy.begin_listener(!hold_open || target.priority.is_monitor());
            let listener = Arc::clone(&target.listener);
            let mut call = tokio::spawn(async move {
                let result = listener.on_packet(&mut copy).await;
                (copy, result)
            });

            let outcome = match target.timeout {
                None => (&mut call).await,
                Some(limit) => match tokio::time::timeout(limit, &mut call).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.mark_stalled(&target, &ty, limit, call);
                        continue;
                    }
                },
            };
            self.settle(&target, &ty, outcome, hold_open.then_some(&mut event));
        }

        Counters::bump(&self.counters.processed, 1);
        if let Some(resume) = resume {
            event.end_dispatch();
            resume(event);
        }
    }

    fn settle(
        &self,
        target: &AsyncTarget,
        ty: &MessageType,
        outcome: CallOutcome,
        original: Option<&mut PacketEvent>,
    ) {
        match outcome {
            Ok((mut copy, Ok(()))) => {
                self.report_violation(target, ty, &mut copy);
                if let Some(original) = original.filter(|_| !copy.is_read_only()) {
                    original.absorb(copy);
                }
            }
            Ok((mut copy, Err(e))) => {
                self.report_violation(target, ty, &mut copy);
                Counters::bump(&self.counters.failures, 1);
                error!(
                    "Async listener {} of {} failed on {ty}: {e}",
                    target.id, target.owner
                );
            }
            Err(e) if e.is_panic() => {
                Counters::bump(&self.counters.failures, 1);
                let panic = e.into_panic();
                error!(
                    "Async listener {} of {} panicked on {ty}: {}",
                    target.id,
                    target.owner,
                    panic_message(panic.as_ref())
                );
            }
            Err(e) => {
                Counters::bump(&self.counters.failures, 1);
                debug!("Async listener {} call on {ty} cancelled: {e}", target.id);
            }
        }
    }

    fn report_violation(&self, target: &AsyncTarget, ty: &MessageType, copy: &mut PacketEvent) {
        if let Some(what) = copy.take_violation() {
            error!(
                "Async listener {} of {} tried to change the {what} of {ty} without write access",
                target.id, target.owner
            );
        }
    }

    /// The call keeps running; the listener is skipped until it returns.
    fn mark_stalled(
        self: &Arc<Self>,
        target: &AsyncTarget,
        ty: &MessageType,
        limit: Duration,
        call: JoinHandle<(PacketEvent, Result<(), ListenerError>)>,
    ) {
        Counters::bump(&self.counters.timeouts, 1);
        if self.stalled.insert(target.id) {
            warn!(
                "Async listener {} of {} exceeded {limit:?} on {ty}, skipping it until it returns",
                target.id, target.owner
            );
        }

        let shared = Arc::clone(self);
        let id = target.id;
        let owner = Arc::clone(&target.owner);
        tokio::spawn(async move {
            let _ = call.await;
            if shared.stalled.remove(&id).is_some() {
                info!("Async listener {id} of {owner} recovered");
            }
        });
    }

    fn discard(&self, queue: &OrderedQueue) -> usize {
        let pending = std::mem::take(&mut *lock(&queue.pending));
        let n = pending.jobs.len();
        Counters::bump(&self.counters.cancelled, n as u64);
        n
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct AsyncDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl AsyncDispatcher {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(config: &DispatchConfig) -> Result<Self, InjectorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| InjectorError::NoRuntime)?;
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let wake_rx = Arc::new(tokio::sync::Mutex::new(wake_rx));

        let shared = Arc::new(Shared {
            queues: DashMap::new(),
            wake_tx,
            capacity: config.queue_capacity.max(1),
            overflow: config.overflow,
            stalled: DashSet::new(),
            counters: Counters::default(),
        });

        let count = config.worker_threads.max(1);
        let workers = (0..count)
            .map(|n| runtime.spawn(worker(n, Arc::clone(&shared), Arc::clone(&wake_rx))))
            .collect();

        info!(
            "Async dispatch started: {count} workers, queue capacity {}, {:?}",
            shared.capacity, shared.overflow
        );
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue `job` behind earlier jobs of the same connection and direction.
    ///
    /// Never blocks. A full queue gives up observation according to the
    /// overflow policy, but a held-open message always stays in line so the
    /// connection's stream is forwarded in order. Returns the job when it is
    /// refused: an observe-only job under `RejectNew`, or any job once the
    /// dispatcher is shut down.
    pub fn submit(
        &self,
        channel: ChannelId,
        direction: Direction,
        mut job: AsyncJob,
    ) -> Result<(), AsyncJob> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(job);
        }
        let key = (channel, direction);
        let queue = Arc::clone(self.shared.queues.entry(key).or_default().value());

        let evicted = {
            let mut pending = lock(&queue.pending);
            let mut evicted = None;
            if pending.observing >= self.shared.capacity {
                match self.shared.overflow {
                    OverflowPolicy::RejectNew => {
                        Counters::bump(&self.shared.counters.rejected, 1);
                        if !job.is_hold_open() {
                            debug!("[{channel}] {direction} async queue full, rejecting {}", job.message_type());
                            return Err(job);
                        }
                        debug!(
                            "[{channel}] {direction} async queue full, {} forwarded in turn unobserved",
                            job.message_type()
                        );
                        job.targets.clear();
                    }
                    OverflowPolicy::DropOldest => {
                        evicted = pending.evict_oldest();
                        if evicted.is_some() {
                            Counters::bump(&self.shared.counters.dropped, 1);
                        }
                    }
                }
            }
            pending.push(job);
            evicted
        };
        Counters::bump(&self.shared.counters.submitted, 1);

        if let Some(ty) = evicted {
            debug!("[{channel}] {direction} async queue full, dropped observation of {ty}");
        }

        if !queue.scheduled.swap(true, Ordering::AcqRel) && self.shared.wake_tx.send(key).is_err() {
            trace!("[{channel}] async workers gone");
        }
        Ok(())
    }

    /// Discard everything queued for `channel`. Calls already running finish.
    pub fn close_connection(&self, channel: ChannelId) -> usize {
        let mut cancelled = 0;
        for direction in Direction::ALL {
            if let Some((_, queue)) = self.shared.queues.remove(&(channel, direction)) {
                cancelled += self.shared.discard(&queue);
            }
        }
        if cancelled > 0 {
            debug!("[{channel}] cancelled {cancelled} queued async job(s)");
        }
        cancelled
    }

    /// Jobs waiting on one queue, including held-open messages that will
    /// be forwarded unobserved.
    pub fn queued(&self, channel: ChannelId, direction: Direction) -> usize {
        self.shared
            .queues
            .get(&(channel, direction))
            .map(|q| lock(&q.pending).jobs.len())
            .unwrap_or(0)
    }

    pub fn is_stalled(&self, id: ListenerId) -> bool {
        self.shared.stalled.contains(&id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the workers and drop every queued job.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *lock(&self.workers));
        for w in &workers {
            w.abort();
        }
        for w in workers {
            let _ = w.await;
        }

        let mut cancelled = 0;
        for entry in self.shared.queues.iter() {
            cancelled += self.shared.discard(entry.value());
        }
        self.shared.queues.clear();
        info!("Async dispatch stopped, {cancelled} queued job(s) discarded");
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        for w in lock(&self.workers).iter() {
            w.abort();
        }
    }
}

impl fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("queues", &self.shared.queues.len())
            .field("stats", &self.stats())
            .finish()
    }
}

async fn worker(
    n: usize,
    shared: Arc<Shared>,
    wake: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueKey>>>,
) {
    loop {
        let key = wake.lock().await.recv().await;
        let Some(key) = key else {
            break;
        };
        shared.drain(key).await;
    }
    trace!("Async worker {n} stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use mc_tap_api::{BoxFuture, ConnectionInfo};
    use mc_tap_proto::Phase;
    use mc_tap_structure::{FieldKind, Shape, Structure};
    use tokio::sync::{oneshot, Notify};

    fn event(channel: u64, n: i64) -> PacketEvent {
        let shape = Shape::builder("keep_alive")
            .field("id", FieldKind::Long)
            .build();
        let mut payload = Structure::new(shape);
        payload.longs().write(0, n).unwrap();
        PacketEvent::new(
            MessageType::new(Phase::Play, Direction::ToServer, "KEEP_ALIVE"),
            payload,
            ConnectionInfo {
                id: ChannelId(channel),
                remote: "127.0.0.1:3".parse().unwrap(),
            },
        )
    }

    fn target(id: u64, listener: Arc<dyn AsyncPacketListener>, timeout: Option<Duration>) -> AsyncTarget {
        AsyncTarget {
            id: ListenerId(id),
            owner: "test".into(),
            priority: ListenerPriority::Normal,
            listener,
            timeout,
        }
    }

    fn monitor(id: u64, listener: Arc<dyn AsyncPacketListener>) -> AsyncTarget {
        AsyncTarget {
            priority: ListenerPriority::Monitor,
            ..target(id, listener, None)
        }
    }

    fn config(workers: usize, capacity: usize, overflow: OverflowPolicy) -> DispatchConfig {
        DispatchConfig {
            worker_threads: workers,
            queue_capacity: capacity,
            overflow,
            ..DispatchConfig::default()
        }
    }

    async fn wait_until(d: &AsyncDispatcher, done: impl Fn(&SchedulerStats) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&d.stats()) {
            assert!(Instant::now() < deadline, "timed out: {:?}", d.stats());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Records (connection, id) of everything it sees.
    #[derive(Default)]
    struct Record {
        seen: Mutex<Vec<(u64, i64)>>,
    }

    impl AsyncPacketListener for Record {
        fn on_packet<'a>(
            &'a self,
            event: &'a mut PacketEvent,
        ) -> BoxFuture<'a, Result<(), ListenerError>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                let n = event.payload().read::<i64>(0)?;
                self.seen.lock().unwrap().push((event.connection().id.0, n));
                Ok(())
            })
        }
    }

    /// Blocks on its first call until released.
    struct Gate {
        started: Mutex<Option<oneshot::Sender<()>>>,
        release: Notify,
        seen: Mutex<Vec<i64>>,
    }

    impl Gate {
        fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
            let (tx, rx) = oneshot::channel();
            let gate = Arc::new(Self {
                started: Mutex::new(Some(tx)),
                release: Notify::new(),
                seen: Mutex::new(Vec::new()),
            });
            (gate, rx)
        }
    }

    impl AsyncPacketListener for Gate {
        fn on_packet<'a>(
            &'a self,
            event: &'a mut PacketEvent,
        ) -> BoxFuture<'a, Result<(), ListenerError>> {
            Box::pin(async move {
                let n = event.payload().read::<i64>(0)?;
                self.seen.lock().unwrap().push(n);
                let first = self.started.lock().unwrap().take();
                if let Some(tx) = first {
                    let _ = tx.send(());
                    self.release.notified().await;
                }
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_connection_order_is_preserved() {
        let d = Arc::new(AsyncDispatcher::start(&config(4, 1024, OverflowPolicy::DropOldest)).unwrap());
        let record = Arc::new(Record::default());
        let targets = vec![target(1, record.clone(), None)];

        // One submitting task per connection, all racing each other.
        let submitters: Vec<_> = (1..=4u64)
            .map(|channel| {
                let d = Arc::clone(&d);
                let targets = targets.clone();
                tokio::spawn(async move {
                    for n in 0..50 {
                        d.submit(
                            ChannelId(channel),
                            Direction::ToServer,
                            AsyncJob::observe(event(channel, n), targets.clone()),
                        )
                        .unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for s in submitters {
            s.await.unwrap();
        }
        wait_until(&d, |s| s.processed == 200).await;

        let seen = record.seen.lock().unwrap();
        for channel in 1..=4 {
            let order: Vec<i64> = seen
                .iter()
                .filter(|(c, _)| *c == channel)
                .map(|(_, n)| *n)
                .collect();
            assert_eq!(order, (0..50).collect::<Vec<_>>(), "connection {channel}");
        }
    }

    #[tokio::test]
    async fn drop_oldest_evicts_the_head() {
        let d = AsyncDispatcher::start(&config(1, 2, OverflowPolicy::DropOldest)).unwrap();
        let (gate, started) = Gate::new();
        let targets = vec![target(1, gate.clone(), None)];
        let submit = |n| {
            d.submit(ChannelId(1), Direction::ToClient, AsyncJob::observe(event(1, n), targets.clone()))
        };

        submit(0).unwrap();
        started.await.unwrap();
        for n in 1..=3 {
            submit(n).unwrap();
        }
        assert_eq!(d.queued(ChannelId(1), Direction::ToClient), 2);
        gate.release.notify_one();

        wait_until(&d, |s| s.processed == 3).await;
        assert_eq!(*gate.seen.lock().unwrap(), [0, 2, 3]);
        assert_eq!(d.stats().dropped, 1);
    }

    #[tokio::test]
    async fn reject_new_hands_the_job_back() {
        let d = AsyncDispatcher::start(&config(1, 2, OverflowPolicy::RejectNew)).unwrap();
        let (gate, started) = Gate::new();
        let targets = vec![target(1, gate.clone(), None)];
        let submit = |n| {
            d.submit(ChannelId(2), Direction::ToServer, AsyncJob::observe(event(2, n), targets.clone()))
        };

        submit(0).unwrap();
        started.await.unwrap();
        submit(1).unwrap();
        submit(2).unwrap();
        let refused = submit(3).unwrap_err();
        assert_eq!(refused.message_type().name(), "KEEP_ALIVE");
        gate.release.notify_one();

        wait_until(&d, |s| s.processed == 3).await;
        assert_eq!(*gate.seen.lock().unwrap(), [0, 1, 2]);
        assert_eq!(d.stats().rejected, 1);
    }

    #[tokio::test]
    async fn hold_open_resumes_with_listener_outcome() {
        struct Rewrite;

        impl AsyncPacketListener for Rewrite {
            fn on_packet<'a>(
                &'a self,
                event: &'a mut PacketEvent,
            ) -> BoxFuture<'a, Result<(), ListenerError>> {
                Box::pin(async move {
                    let n = event.payload().read::<i64>(0)?;
                    event.payload_mut()?.longs().write(0, n * 10)?;
                    if n == 3 {
                        event.set_cancelled(true)?;
                    }
                    Ok(())
                })
            }
        }

        struct Broken;

        impl AsyncPacketListener for Broken {
            fn on_packet<'a>(
                &'a self,
                event: &'a mut PacketEvent,
            ) -> BoxFuture<'a, Result<(), ListenerError>> {
                Box::pin(async move {
                    event.payload_mut()?.longs().write(0, -1)?;
                    Err("bad listener".into())
                })
            }
        }

        let d = AsyncDispatcher::start(&config(2, 16, OverflowPolicy::DropOldest)).unwrap();
        let targets = vec![
            target(1, Arc::new(Rewrite), None),
            target(2, Arc::new(Broken), None),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        for n in [7, 3] {
            let tx = tx.clone();
            let job = AsyncJob::hold_open(event(5, n), targets.clone(), move |ev| {
                let _ = tx.send(ev);
            });
            d.submit(ChannelId(5), Direction::ToServer, job).unwrap();
        }

        let first = rx.recv().await.unwrap();
        assert!(first.is_modified());
        assert!(!first.is_cancelled());
        assert_eq!(first.payload().read::<i64>(0).unwrap(), 70);

        let second = rx.recv().await.unwrap();
        assert!(second.is_cancelled());
        assert_eq!(second.payload().read::<i64>(0).unwrap(), 30);
        assert_eq!(d.stats().failures, 2);
    }

    #[tokio::test]
    async fn monitor_stays_read_only_on_held_messages() {
        struct Audit;

        impl AsyncPacketListener for Audit {
            fn on_packet<'a>(
                &'a self,
                event: &'a mut PacketEvent,
            ) -> BoxFuture<'a, Result<(), ListenerError>> {
                Box::pin(async move {
                    if let Ok(payload) = event.payload_mut() {
                        payload.longs().write(0, 666)?;
                    }
                    let _ = event.set_cancelled(true);
                    Ok(())
                })
            }
        }

        struct Double;

        impl AsyncPacketListener for Double {
            fn on_packet<'a>(
                &'a self,
                event: &'a mut PacketEvent,
            ) -> BoxFuture<'a, Result<(), ListenerError>> {
                Box::pin(async move {
                    let n = event.payload().read::<i64>(0)?;
                    event.payload_mut()?.longs().write(0, n * 2)?;
                    Ok(())
                })
            }
        }

        let d = AsyncDispatcher::start(&config(1, 16, OverflowPolicy::DropOldest)).unwrap();
        let targets = vec![target(1, Arc::new(Double), None), monitor(2, Arc::new(Audit))];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = AsyncJob::hold_open(event(4, 21), targets, move |ev| {
            let _ = tx.send(ev);
        });
        d.submit(ChannelId(4), Direction::ToServer, job).unwrap();

        let out = rx.recv().await.unwrap();
        assert!(!out.is_cancelled());
        assert!(out.is_modified());
        assert_eq!(out.payload().read::<i64>(0).unwrap(), 42);
        assert_eq!(d.stats().failures, 0);
    }

    /// Forwards held-open jobs 1, 2 and 3 through a full queue of capacity
    /// one while job 1 is still in flight.
    async fn held_forwarding_order(overflow: OverflowPolicy) -> (Vec<i64>, Vec<i64>, SchedulerStats) {
        let d = AsyncDispatcher::start(&config(1, 1, overflow)).unwrap();
        let (gate, started) = Gate::new();
        let targets = vec![target(1, gate.clone(), None)];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let submit = |n: i64| {
            let tx = tx.clone();
            let job = AsyncJob::hold_open(event(3, n), targets.clone(), move |ev| {
                let _ = tx.send(ev.payload().read::<i64>(0).unwrap());
            });
            d.submit(ChannelId(3), Direction::ToClient, job)
        };

        submit(1).unwrap();
        started.await.unwrap();
        submit(2).unwrap();
        submit(3).unwrap();
        assert_eq!(d.queued(ChannelId(3), Direction::ToClient), 2);
        // Nothing may overtake the message still in flight.
        assert!(rx.try_recv().is_err());
        gate.release.notify_one();

        let mut forwarded = Vec::new();
        for _ in 0..3 {
            forwarded.push(rx.recv().await.unwrap());
        }
        let seen = gate.seen.lock().unwrap().clone();
        (forwarded, seen, d.stats())
    }

    #[tokio::test]
    async fn drop_oldest_keeps_held_messages_in_order() {
        let (forwarded, seen, stats) = held_forwarding_order(OverflowPolicy::DropOldest).await;
        assert_eq!(forwarded, [1, 2, 3]);
        // Job 2 lost its observation to job 3.
        assert_eq!(seen, [1, 3]);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn reject_new_keeps_held_messages_in_order() {
        let (forwarded, seen, stats) = held_forwarding_order(OverflowPolicy::RejectNew).await;
        assert_eq!(forwarded, [1, 2, 3]);
        assert_eq!(seen, [1, 2]);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn observers_cannot_modify_detached_copies() {
        struct Meddler;

        impl AsyncPacketListener for Meddler {
            fn on_packet<'a>(
                &'a self,
                event: &'a mut PacketEvent,
            ) -> BoxFuture<'a, Result<(), ListenerError>> {
                Box::pin(async move {
                    assert!(event.set_cancelled(true).is_err());
                    Ok(())
                })
            }
        }

        let d = AsyncDispatcher::start(&config(1, 16, OverflowPolicy::DropOldest)).unwrap();
        let original = event(6, 1);
        let copy = original.detached(original.payload().clone());
        d.submit(
            ChannelId(6),
            Direction::ToServer,
            AsyncJob::observe(copy, vec![target(1, Arc::new(Meddler), None)]),
        )
        .unwrap();
        wait_until(&d, |s| s.processed == 1).await;
        assert_eq!(d.stats().failures, 0);
    }

    #[tokio::test]
    async fn stalled_listener_is_skipped_then_recovers() {
        struct Sleepy {
            slow_once: AtomicBool,
            seen: Mutex<Vec<i64>>,
        }

        impl AsyncPacketListener for Sleepy {
            fn on_packet<'a>(
                &'a self,
                event: &'a mut PacketEvent,
            ) -> BoxFuture<'a, Result<(), ListenerError>> {
                Box::pin(async move {
                    let n = event.payload().read::<i64>(0)?;
                    self.seen.lock().unwrap().push(n);
                    if self.slow_once.swap(false, Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    }
                    Ok(())
                })
            }
        }

        let d = AsyncDispatcher::start(&config(1, 16, OverflowPolicy::DropOldest)).unwrap();
        let sleepy = Arc::new(Sleepy {
            slow_once: AtomicBool::new(true),
            seen: Mutex::new(Vec::new()),
        });
        let targets = vec![target(9, sleepy.clone(), Some(Duration::from_millis(30)))];
        let submit = |n| {
            d.submit(ChannelId(7), Direction::ToServer, AsyncJob::observe(event(7, n), targets.clone()))
                .unwrap()
        };

        submit(0);
        wait_until(&d, |s| s.timeouts == 1).await;
        assert!(d.is_stalled(ListenerId(9)));

        submit(1);
        wait_until(&d, |s| s.processed == 2).await;
        assert_eq!(d.stats().skipped_stalled, 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while d.is_stalled(ListenerId(9)) {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        submit(2);
        wait_until(&d, |s| s.processed == 3).await;
        assert_eq!(*sleepy.seen.lock().unwrap(), [0, 2]);
        assert_eq!(d.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn close_connection_discards_queued_jobs() {
        let d = AsyncDispatcher::start(&config(1, 16, OverflowPolicy::DropOldest)).unwrap();
        let (gate, started) = Gate::new();
        let targets = vec![target(1, gate.clone(), None)];
        let submit = |n| {
            d.submit(ChannelId(8), Direction::ToServer, AsyncJob::observe(event(8, n), targets.clone()))
                .unwrap()
        };

        // The first job stays in flight, so the rest stay queued.
        submit(0);
        started.await.unwrap();
        submit(1);
        submit(2);

        assert_eq!(d.close_connection(ChannelId(8)), 2);
        assert_eq!(d.close_connection(ChannelId(8)), 0);
        gate.release.notify_one();
        wait_until(&d, |s| s.processed == 1).await;
        assert_eq!(*gate.seen.lock().unwrap(), [0]);
        assert_eq!(d.stats().cancelled, 2);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let d = AsyncDispatcher::start(&DispatchConfig::default()).unwrap();
        d.shutdown().await;
        d.shutdown().await;
        assert!(d.is_shut_down());
        let job = AsyncJob::observe(event(1, 1), Vec::new());
        assert!(d.submit(ChannelId(1), Direction::ToServer, job).is_err());
    }

    #[test]
    fn start_needs_a_runtime() {
        assert!(matches!(
            AsyncDispatcher::start(&DispatchConfig::default()),
            Err(InjectorError::NoRuntime)
        ));
    }
}
