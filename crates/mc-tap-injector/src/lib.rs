//! The interception engine.
//!
//! [`ProtocolManager`] ties the pieces together: it probes the transport for
//! a [`PhaseResolver`] strategy, installs capture stages into channels with
//! the [`Interceptor`], runs synchronous listeners through the
//! [`ListenerDispatcher`] and hands asynchronous ones to the
//! [`AsyncDispatcher`].

pub mod async_dispatch;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod phase_resolver;
pub mod transition;

pub use async_dispatch::{AsyncDispatcher, AsyncJob, AsyncTarget, SchedulerStats};
pub use config::{DispatchConfig, OverflowPolicy};
pub use dispatcher::ListenerDispatcher;
pub use error::{InjectorError, ResolverError};
pub use interceptor::{Interceptor, INBOUND_TAP, OUTBOUND_TAP};
pub use manager::{ProtocolManager, ProtocolManagerBuilder};
pub use phase_resolver::PhaseResolver;
