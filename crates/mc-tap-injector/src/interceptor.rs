//! Capture stages installed just past a channel's packet codecs.
//!
//! Inbound, the stage sits after the decoder and sees client-sent packets;
//! outbound, it sits on the tail side of the encoder and sees server-sent
//! packets before they are encoded.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashSet;
use mc_tap_api::{ConnectionInfo, PacketEvent};
use mc_tap_proto::{Direction, MessageType, MessageTypeRegistry};
use mc_tap_structure::{wire, ObjectCloner, SchemaTable, StructureError};
use mc_tap_transport::constants::{DECODER, ENCODER, INBOUND_CONFIG, OUTBOUND_CONFIG};
use mc_tap_transport::error::BoxError;
use mc_tap_transport::{
    Channel, ChannelHandler, HandlerContext, Packet, Pipeline, PipelineItem, TransportError,
};
use tracing::{debug, trace, warn};

use crate::async_dispatch::{AsyncDispatcher, AsyncJob, AsyncTarget};
use crate::dispatcher::ListenerDispatcher;
use crate::phase_resolver::PhaseResolver;
use crate::transition;

pub const INBOUND_TAP: &str = "mc_tap_inbound";
pub const OUTBOUND_TAP: &str = "mc_tap_outbound";

pub struct Interceptor {
    registry: Arc<MessageTypeRegistry>,
    schemas: Arc<SchemaTable>,
    resolver: Arc<PhaseResolver>,
    dispatcher: Arc<ListenerDispatcher>,
    scheduler: Arc<AsyncDispatcher>,
    cloner: ObjectCloner,
    hold_open: HashSet<String>,
    /// Types whose payload could not be cloned, warned about once each.
    clone_failures: DashSet<MessageType>,
}

impl Interceptor {
    pub fn new(
        registry: Arc<MessageTypeRegistry>,
        schemas: Arc<SchemaTable>,
        resolver: Arc<PhaseResolver>,
        dispatcher: Arc<ListenerDispatcher>,
        scheduler: Arc<AsyncDispatcher>,
        hold_open: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry,
            schemas,
            resolver,
            dispatcher,
            scheduler,
            cloner: ObjectCloner::new(),
            hold_open: hold_open.into_iter().collect(),
            clone_failures: DashSet::new(),
        }
    }

    /// Add both capture stages. Returns false if they are already there.
    pub fn install(self: &Arc<Self>, channel: &Arc<Channel>) -> Result<bool, TransportError> {
        let pipeline = channel.pipeline();
        if pipeline.contains(INBOUND_TAP) {
            return Ok(false);
        }
        let inbound_anchor = anchor(pipeline, DECODER, INBOUND_CONFIG)?;
        let outbound_anchor = anchor(pipeline, ENCODER, OUTBOUND_CONFIG)?;

        pipeline.add_after(inbound_anchor, INBOUND_TAP, self.stage(Direction::ToServer))?;
        if let Err(e) = pipeline.add_after(outbound_anchor, OUTBOUND_TAP, self.stage(Direction::ToClient)) {
            let _ = channel.remove_handler(INBOUND_TAP);
            return Err(e);
        }
        debug!("[{}] capture stages installed: {:?}", channel.id(), pipeline.names());
        Ok(true)
    }

    /// Remove both capture stages and cancel the channel's async work.
    /// Safe to call on a channel that is closing or already closed.
    pub fn uninstall(&self, channel: &Arc<Channel>) -> bool {
        let mut removed = false;
        for name in [INBOUND_TAP, OUTBOUND_TAP] {
            match channel.remove_handler(name) {
                Ok(_) => removed = true,
                Err(e) => trace!("[{}] {name} not removed: {e}", channel.id()),
            }
        }
        self.scheduler.close_connection(channel.id());
        if removed {
            debug!("[{}] capture stages removed", channel.id());
        }
        removed
    }

    fn stage(self: &Arc<Self>, direction: Direction) -> Arc<dyn ChannelHandler> {
        Arc::new(CaptureStage {
            interceptor: Arc::clone(self),
            direction,
        })
    }

    // ─── Capture ─────────────────────────────────────────────────────────────

    /// Returns the packet to forward, or `None` if it was cancelled or is
    /// held for async listeners.
    fn capture(
        &self,
        ctx: &HandlerContext<'_>,
        direction: Direction,
        packet: Packet,
    ) -> Result<Option<Packet>, TransportError> {
        let channel = ctx.channel();
        let phase = match self.resolver.resolve(channel, direction) {
            Ok(phase) => phase,
            Err(e) => {
                debug!("[{}] forwarding 0x{:02X} untouched: {e}", channel.id(), packet.id);
                return Ok(Some(packet));
            }
        };

        let ty = self.registry.resolve_or_unknown(phase, direction, packet.id);
        let significant = transition::is_significant(&ty);
        if !significant && !self.dispatcher.has_interest(&ty) {
            trace!("[{}] {ty}: {} bytes, no listeners", channel.id(), packet.body.len());
            return Ok(Some(packet));
        }

        let shape = self.schemas.shape_or_opaque(&ty);
        let payload =
            wire::decode(&shape, &mut packet.body.clone()).map_err(|e| stage_error(ctx, e))?;
        let connection = ConnectionInfo {
            id: channel.id(),
            remote: channel.remote(),
        };
        let event = self
            .dispatcher
            .dispatch_sync(PacketEvent::new(ty.clone(), payload, connection));

        if !event.is_cancelled() {
            if let Some(next) = transition::next_phase(&ty, event.payload()) {
                for dir in Direction::ALL {
                    self.resolver
                        .advance(channel, dir, next)
                        .map_err(|e| stage_error(ctx, e))?;
                }
                debug!("[{}] {ty} moves the connection to {next}", channel.id());
            }
        }

        let targets = self.dispatcher.async_targets(&ty);
        if !targets.is_empty() {
            // Phase changes are applied in-line, so they are never held.
            if !significant && self.hold_open.contains(ty.name()) {
                self.hold(channel, direction, event, targets, packet);
                return Ok(None);
            }
            self.observe(&event, targets);
        }

        if event.is_cancelled() {
            trace!("[{}] {ty} cancelled", channel.id());
            return Ok(None);
        }
        finish(event, packet)
            .map(Some)
            .map_err(|e| stage_error(ctx, e))
    }

    /// Queue a detached copy for async observers.
    fn observe(&self, event: &PacketEvent, targets: Vec<AsyncTarget>) {
        let ty = event.message_type();
        match self.cloner.clone_structure(event.payload()) {
            Ok(copy) => {
                let job = AsyncJob::observe(event.detached(copy), targets);
                if self
                    .scheduler
                    .submit(event.connection().id, event.direction(), job)
                    .is_err()
                {
                    trace!("[{}] async observation of {ty} refused", event.connection().id);
                }
            }
            Err(e) => {
                if self.clone_failures.insert(ty.clone()) {
                    warn!("Async observation of {ty} skipped: {e}");
                }
            }
        }
    }

    /// Queue the event itself; the packet continues once async listeners ran.
    fn hold(
        &self,
        channel: &Arc<Channel>,
        direction: Direction,
        event: PacketEvent,
        targets: Vec<AsyncTarget>,
        packet: Packet,
    ) {
        let channel = Arc::clone(channel);
        let id = channel.id();
        let resume = move |event: PacketEvent| {
            let ty = event.message_type().clone();
            if event.is_cancelled() {
                trace!("[{id}] held {ty} cancelled");
                return;
            }
            let packet = match finish(event, packet) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("[{id}] held {ty} could not be re-encoded: {e}");
                    return;
                }
            };
            let item = PipelineItem::Packet(packet);
            let forwarded = match direction {
                Direction::ToServer => channel.resume_inbound(INBOUND_TAP, item),
                Direction::ToClient => channel.resume_outbound(OUTBOUND_TAP, item),
            };
            if let Err(e) = forwarded {
                debug!("[{id}] held {ty} not forwarded: {e}");
            }
        };

        let job = AsyncJob::hold_open(event, targets, resume);
        // Only refused after shutdown, when nothing is queued ahead of it.
        if let Err(job) = self.scheduler.submit(id, direction, job) {
            job.release();
        }
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("strategy", &self.resolver.strategy())
            .field("hold_open", &self.hold_open)
            .finish()
    }
}

/// The packet to forward: the original unless a listener changed the payload.
fn finish(event: PacketEvent, original: Packet) -> Result<Packet, StructureError> {
    if !event.is_modified() {
        return Ok(original);
    }
    let mut body = BytesMut::new();
    wire::encode(event.payload(), &mut body)?;
    Ok(Packet::new(original.id, body.freeze()))
}

fn anchor(
    pipeline: &Pipeline,
    codec: &'static str,
    placeholder: &'static str,
) -> Result<&'static str, TransportError> {
    if pipeline.contains(codec) {
        Ok(codec)
    } else if pipeline.contains(placeholder) {
        Ok(placeholder)
    } else {
        Err(TransportError::NoSuchHandler(codec.to_string()))
    }
}

fn stage_error(ctx: &HandlerContext<'_>, e: impl Into<BoxError>) -> TransportError {
    TransportError::Handler {
        stage: ctx.name().to_string(),
        source: e.into(),
    }
}

// ─── Stage ───────────────────────────────────────────────────────────────────

struct CaptureStage {
    interceptor: Arc<Interceptor>,
    direction: Direction,
}

impl ChannelHandler for CaptureStage {
    fn handle_inbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        match item {
            PipelineItem::Packet(packet) if self.direction == Direction::ToServer => {
                if let Some(packet) = self.interceptor.capture(ctx, Direction::ToServer, packet)? {
                    out.push(PipelineItem::Packet(packet));
                }
            }
            item => out.push(item),
        }
        Ok(())
    }

    fn handle_outbound(
        &self,
        ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        match item {
            PipelineItem::Packet(packet) if self.direction == Direction::ToClient => {
                if let Some(packet) = self.interceptor.capture(ctx, Direction::ToClient, packet)? {
                    out.push(PipelineItem::Packet(packet));
                }
            }
            item => out.push(item),
        }
        Ok(())
    }

    fn handler_removed(&self, ctx: &HandlerContext<'_>) {
        self.interceptor.scheduler.close_connection(ctx.channel().id());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::{BufMut, Bytes};
    use mc_tap_api::{
        AsyncPacketListener, BoxFuture, ListenerEntry, ListenerError, ListenerPriority, TypeFilter,
    };
    use mc_tap_proto::catalog::builtin_registry;
    use mc_tap_proto::catalog::names::*;
    use mc_tap_proto::codec::write_string;
    use mc_tap_proto::{Phase, VarInt};
    use mc_tap_structure::catalog::builtin_schemas;
    use mc_tap_transport::{ChannelInitializer, ChannelIo, PhaseLayout};

    use super::*;
    use crate::config::DispatchConfig;

    struct Rig {
        interceptor: Arc<Interceptor>,
        dispatcher: Arc<ListenerDispatcher>,
        resolver: Arc<PhaseResolver>,
        registry: Arc<MessageTypeRegistry>,
    }

    fn rig(layout: PhaseLayout, hold_open: &[&str]) -> Rig {
        let registry = Arc::new(builtin_registry().unwrap());
        let schemas = Arc::new(builtin_schemas(&registry));
        let resolver = Arc::new(PhaseResolver::probe(layout.phase_keys()).unwrap());
        let dispatcher = Arc::new(ListenerDispatcher::new());
        let scheduler = Arc::new(AsyncDispatcher::start(&DispatchConfig::default()).unwrap());
        let interceptor = Arc::new(Interceptor::new(
            registry.clone(),
            schemas,
            resolver.clone(),
            dispatcher.clone(),
            scheduler,
            hold_open.iter().map(|s| s.to_string()),
        ));
        Rig {
            interceptor,
            dispatcher,
            resolver,
            registry,
        }
    }

    impl Rig {
        fn connect(&self, layout: PhaseLayout) -> (Arc<Channel>, ChannelIo) {
            let (channel, io) = ChannelInitializer::new(layout)
                .init("127.0.0.1:45000".parse().unwrap())
                .unwrap();
            assert!(self.interceptor.install(&channel).unwrap());
            (channel, io)
        }

        fn ty(&self, phase: Phase, direction: Direction, name: &str) -> MessageType {
            self.registry.lookup(phase, direction, name).unwrap().clone()
        }

        fn enter(&self, channel: &Arc<Channel>, phase: Phase) {
            for dir in Direction::ALL {
                self.resolver.advance(channel, dir, phase).unwrap();
            }
        }
    }

    fn frame(id: i32, body: &[u8]) -> Bytes {
        let packet = Packet::new(id, Bytes::copy_from_slice(body)).encode();
        let mut v = Vec::new();
        VarInt(packet.len() as i32).encode(&mut v);
        v.extend_from_slice(&packet);
        Bytes::from(v)
    }

    fn string_body(s: &str) -> Vec<u8> {
        let mut b = BytesMut::new();
        write_string(&mut b, s);
        b.to_vec()
    }

    #[tokio::test]
    async fn install_places_stages_after_codecs() {
        let rig = rig(PhaseLayout::CodecEmbedded, &[]);
        let (channel, _io) = rig.connect(PhaseLayout::CodecEmbedded);
        assert_eq!(
            channel.pipeline().names(),
            [
                "splitter",
                "inbound_config",
                "mc_tap_inbound",
                "prepender",
                "outbound_config",
                "mc_tap_outbound"
            ]
        );
        assert!(!rig.interceptor.install(&channel).unwrap());

        // Configuring swaps the placeholder in place, so the tap stays adjacent.
        rig.enter(&channel, Phase::Login);
        let names = channel.pipeline().names();
        let decoder = names.iter().position(|n| n == "decoder").unwrap();
        assert_eq!(names[decoder + 1], INBOUND_TAP);

        assert!(rig.interceptor.uninstall(&channel));
        assert!(!rig.interceptor.uninstall(&channel));
        assert!(!channel.pipeline().contains(OUTBOUND_TAP));
    }

    #[tokio::test]
    async fn client_messages_drive_phase_transitions() {
        let rig = rig(PhaseLayout::CodecEmbedded, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::CodecEmbedded);
        let phase = |dir| rig.resolver.resolve(&channel, dir).unwrap();

        let mut intention = BytesMut::new();
        intention.put_slice(&[0xFF, 0x05]);
        write_string(&mut intention, "localhost");
        intention.put_u16(25565);
        intention.put_u8(2);
        channel.fire_inbound(frame(0x00, &intention)).unwrap();
        assert_eq!(io.inbound.try_recv().unwrap().body, intention.freeze());
        assert_eq!(phase(Direction::ToServer), Phase::Login);
        assert_eq!(phase(Direction::ToClient), Phase::Login);

        channel.fire_inbound(frame(0x03, &[])).unwrap();
        assert_eq!(phase(Direction::ToServer), Phase::Configuration);

        channel.fire_inbound(frame(0x03, &[])).unwrap();
        assert_eq!(phase(Direction::ToClient), Phase::Play);

        channel.fire_inbound(frame(0x0C, &[])).unwrap();
        assert_eq!(phase(Direction::ToServer), Phase::Configuration);
        assert_eq!(io.inbound.try_recv().unwrap().id, 0x03);
    }

    #[tokio::test]
    async fn sync_listener_rewrites_inbound_payload() {
        let rig = rig(PhaseLayout::SharedAttribute, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::SharedAttribute);
        rig.enter(&channel, Phase::Play);

        rig.dispatcher.register(ListenerEntry::sync(
            "rewriter",
            ListenerPriority::Normal,
            TypeFilter::only([rig.ty(Phase::Play, Direction::ToServer, CHAT_COMMAND)]),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                ev.payload_mut()?
                    .strings()
                    .modify(0, |c| c.replace("op", "help"))?;
                Ok(())
            },
        ));

        channel.fire_inbound(frame(0x04, &string_body("op alice"))).unwrap();
        let forwarded = io.inbound.try_recv().unwrap();
        assert_eq!(forwarded.id, 0x04);
        assert_eq!(forwarded.body, Bytes::from(string_body("help alice")));
    }

    #[tokio::test]
    async fn cancelled_outbound_message_is_dropped() {
        let rig = rig(PhaseLayout::SplitAttributes, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::SplitAttributes);
        rig.enter(&channel, Phase::Play);

        rig.dispatcher.register(ListenerEntry::sync(
            "mute",
            ListenerPriority::High,
            TypeFilter::only([rig.ty(Phase::Play, Direction::ToClient, SYSTEM_CHAT)]),
            |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                ev.set_cancelled(true)?;
                Ok(())
            },
        ));

        channel.write(Packet::new(0x6C, Bytes::from_static(b"\x08\x00\x02hi"))).unwrap();
        assert!(io.outbound.try_recv().is_err());

        // Other server messages still flow.
        channel.write(Packet::new(0x26, Bytes::from_static(&[0; 8]))).unwrap();
        assert!(io.outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unknown_ids_pass_through_as_unknown_types() {
        let rig = rig(PhaseLayout::SharedAttribute, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::SharedAttribute);
        rig.enter(&channel, Phase::Play);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        rig.dispatcher.register(ListenerEntry::sync(
            "all",
            ListenerPriority::Monitor,
            TypeFilter::all(),
            move |ev: &mut PacketEvent| -> Result<(), ListenerError> {
                log.lock().unwrap().push(ev.message_type().clone());
                Ok(())
            },
        ));

        channel.fire_inbound(frame(0x7E, &[1, 2, 3])).unwrap();
        let forwarded = io.inbound.try_recv().unwrap();
        assert_eq!(forwarded.body, Bytes::from_static(&[1, 2, 3]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_unknown());
        assert_eq!(seen[0].name(), "UNKNOWN_0x7E");
    }

    #[tokio::test]
    async fn malformed_known_payload_is_a_pipeline_error() {
        let rig = rig(PhaseLayout::SharedAttribute, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::SharedAttribute);
        rig.enter(&channel, Phase::Play);
        rig.dispatcher.register(ListenerEntry::sync(
            "keepalive",
            ListenerPriority::Normal,
            TypeFilter::only([rig.ty(Phase::Play, Direction::ToServer, KEEP_ALIVE)]),
            |_: &mut PacketEvent| -> Result<(), ListenerError> { Ok(()) },
        ));

        let result = channel.fire_inbound(frame(0x18, &[0, 0, 1]));
        assert!(matches!(result, Err(TransportError::Handler { .. })));
        assert!(io.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn unresolvable_phase_forwards_untouched() {
        let rig = rig(PhaseLayout::SharedAttribute, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::SharedAttribute);
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        rig.dispatcher.register(ListenerEntry::sync(
            "all",
            ListenerPriority::Normal,
            TypeFilter::all(),
            move |_: &mut PacketEvent| -> Result<(), ListenerError> {
                *counter.lock().unwrap() += 1;
                Ok(())
            },
        ));
        channel.attrs().remove("protocol");

        channel.fire_inbound(frame(0x00, &[9, 9])).unwrap();
        assert_eq!(io.inbound.try_recv().unwrap().body, Bytes::from_static(&[9, 9]));
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    struct Censor;

    impl AsyncPacketListener for Censor {
        fn on_packet<'a>(
            &'a self,
            event: &'a mut PacketEvent,
        ) -> BoxFuture<'a, Result<(), ListenerError>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                event.payload_mut()?.strings().write(0, "****".into())?;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn hold_open_forwards_after_async_listeners() {
        let rig = rig(PhaseLayout::SharedAttribute, &[CHAT_COMMAND]);
        let (channel, mut io) = rig.connect(PhaseLayout::SharedAttribute);
        rig.enter(&channel, Phase::Play);
        rig.dispatcher.register(ListenerEntry::asynchronous(
            "censor",
            ListenerPriority::Normal,
            TypeFilter::only([rig.ty(Phase::Play, Direction::ToServer, CHAT_COMMAND)]),
            Censor,
        ));

        channel.fire_inbound(frame(0x04, &string_body("secret"))).unwrap();
        assert!(io.inbound.try_recv().is_err());

        let forwarded = tokio::time::timeout(Duration::from_secs(5), io.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.body, Bytes::from(string_body("****")));
    }

    #[tokio::test]
    async fn async_observers_do_not_delay_forwarding() {
        let rig = rig(PhaseLayout::SharedAttribute, &[]);
        let (channel, mut io) = rig.connect(PhaseLayout::SharedAttribute);
        rig.enter(&channel, Phase::Play);
        rig.dispatcher.register(ListenerEntry::asynchronous(
            "censor",
            ListenerPriority::Normal,
            TypeFilter::only([rig.ty(Phase::Play, Direction::ToServer, CHAT_COMMAND)]),
            Censor,
        ));

        channel.fire_inbound(frame(0x04, &string_body("plain"))).unwrap();
        let forwarded = io.inbound.try_recv().unwrap();
        assert_eq!(forwarded.body, Bytes::from(string_body("plain")));
    }
}
