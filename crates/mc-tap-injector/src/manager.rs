//! The engine's public entry point.

use std::sync::Arc;

use mc_tap_api::{ListenerEntry, ListenerId};
use mc_tap_proto::catalog::builtin_registry;
use mc_tap_proto::{Direction, MessageType, MessageTypeRegistry, Phase};
use mc_tap_structure::catalog::builtin_schemas;
use mc_tap_structure::SchemaTable;
use mc_tap_transport::{Channel, PhaseLayout};
use tracing::{debug, info};

use crate::async_dispatch::{AsyncDispatcher, SchedulerStats};
use crate::config::DispatchConfig;
use crate::dispatcher::ListenerDispatcher;
use crate::error::{InjectorError, ResolverError};
use crate::interceptor::Interceptor;
use crate::phase_resolver::PhaseResolver;

pub struct ProtocolManagerBuilder {
    registry: Option<MessageTypeRegistry>,
    schemas: Option<SchemaTable>,
    phase_keys: Vec<&'static str>,
    config: DispatchConfig,
}

impl ProtocolManagerBuilder {
    /// Defaults to the built-in catalog.
    pub fn registry(mut self, registry: MessageTypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to the built-in layouts for the registry's types.
    pub fn schemas(mut self, schemas: SchemaTable) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Attribute names the transport declares as phase-holding.
    pub fn phase_keys(mut self, keys: &[&'static str]) -> Self {
        self.phase_keys = keys.to_vec();
        self
    }

    pub fn layout(self, layout: PhaseLayout) -> Self {
        self.phase_keys(layout.phase_keys())
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Pick the phase strategy and spawn the async workers. Must run inside
    /// a tokio runtime.
    pub fn start(self) -> Result<ProtocolManager, InjectorError> {
        let resolver = Arc::new(PhaseResolver::probe(&self.phase_keys)?);
        let registry = match self.registry {
            Some(registry) => registry,
            None => builtin_registry()?,
        };
        let schemas = self
            .schemas
            .unwrap_or_else(|| builtin_schemas(&registry));
        let registry = Arc::new(registry);

        let dispatcher = Arc::new(ListenerDispatcher::new());
        let scheduler = Arc::new(AsyncDispatcher::start(&self.config)?);
        let interceptor = Arc::new(Interceptor::new(
            Arc::clone(&registry),
            Arc::new(schemas),
            Arc::clone(&resolver),
            Arc::clone(&dispatcher),
            Arc::clone(&scheduler),
            self.config.hold_open.iter().cloned(),
        ));

        info!(
            "Protocol manager started: {} message types, {} phase strategy",
            registry.len(),
            resolver.strategy()
        );
        Ok(ProtocolManager {
            registry,
            resolver,
            dispatcher,
            scheduler,
            interceptor,
            config: self.config,
        })
    }
}

pub struct ProtocolManager {
    registry: Arc<MessageTypeRegistry>,
    resolver: Arc<PhaseResolver>,
    dispatcher: Arc<ListenerDispatcher>,
    scheduler: Arc<AsyncDispatcher>,
    interceptor: Arc<Interceptor>,
    config: DispatchConfig,
}

impl ProtocolManager {
    pub fn builder() -> ProtocolManagerBuilder {
        ProtocolManagerBuilder {
            registry: None,
            schemas: None,
            phase_keys: Vec::new(),
            config: DispatchConfig::default(),
        }
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    /// Async entries registered without a timeout get the configured default.
    pub fn register(&self, entry: ListenerEntry) -> Result<ListenerId, InjectorError> {
        if self.scheduler.is_shut_down() {
            return Err(InjectorError::Shutdown);
        }
        let entry = match self.config.async_timeout() {
            Some(limit) if entry.is_async() && entry.timeout().is_none() => entry.with_timeout(limit),
            _ => entry,
        };
        Ok(self.dispatcher.register(entry))
    }

    pub fn unregister(&self, id: ListenerId) -> Result<(), InjectorError> {
        if self.dispatcher.unregister(id) {
            Ok(())
        } else {
            Err(InjectorError::UnknownListener(id))
        }
    }

    pub fn unregister_owner(&self, owner: &str) -> usize {
        self.dispatcher.unregister_owner(owner)
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.len()
    }

    // ─── Message types ───────────────────────────────────────────────────────

    pub fn registry(&self) -> &MessageTypeRegistry {
        &self.registry
    }

    /// First type named `name`, serverbound before clientbound.
    pub fn message_type(&self, name: &str) -> Option<&MessageType> {
        self.registry.lookup_by_name(name)
    }

    pub fn message_type_in(&self, phase: Phase, direction: Direction, name: &str) -> Option<&MessageType> {
        self.registry.lookup(phase, direction, name)
    }

    // ─── Channels ────────────────────────────────────────────────────────────

    /// Start intercepting `channel`. Returns false if already injected.
    pub fn inject(&self, channel: &Arc<Channel>) -> Result<bool, InjectorError> {
        if self.scheduler.is_shut_down() {
            return Err(InjectorError::Shutdown);
        }
        Ok(self.interceptor.install(channel)?)
    }

    pub fn uninject(&self, channel: &Arc<Channel>) -> bool {
        self.interceptor.uninstall(channel)
    }

    pub fn phase(&self, channel: &Channel, direction: Direction) -> Result<Phase, ResolverError> {
        self.resolver.resolve(channel, direction)
    }

    pub fn strategy(&self) -> &'static str {
        self.resolver.strategy()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop async dispatch and forget cached accessors. Injected channels
    /// keep forwarding; their sync listeners keep running.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.resolver.clear_cache();
        debug!("Protocol manager shut down ({} listeners still registered)", self.dispatcher.len());
    }
}

impl std::fmt::Debug for ProtocolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolManager")
            .field("strategy", &self.resolver.strategy())
            .field("dispatcher", &self.dispatcher)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
