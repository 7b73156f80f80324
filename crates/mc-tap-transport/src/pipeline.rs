//! Named, ordered processing stages of a channel.
//!
//! Inbound items travel head to tail, outbound items tail to head. Stage
//! lists are copy-on-write: a traversal works on the snapshot it started
//! with, so stages may be added or removed while items are in flight.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use crate::channel::Channel;
use crate::codec::Packet;
use crate::error::TransportError;

/// What flows between stages.
#[derive(Debug, Clone)]
pub enum PipelineItem {
    Bytes(Bytes),
    Packet(Packet),
}

impl PipelineItem {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineItem::Bytes(_) => "bytes",
            PipelineItem::Packet(_) => "packet",
        }
    }
}

/// Handed to a stage while it processes an item.
pub struct HandlerContext<'a> {
    channel: &'a Arc<Channel>,
    name: &'a str,
}

impl<'a> HandlerContext<'a> {
    pub fn new(channel: &'a Arc<Channel>, name: &'a str) -> Self {
        Self { channel, name }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        self.channel
    }

    /// Name the stage is registered under.
    pub fn name(&self) -> &str {
        self.name
    }
}

/// One processing stage. Each call may emit any number of items into `out`;
/// the defaults pass the item through untouched.
pub trait ChannelHandler: Send + Sync + 'static {
    fn handle_inbound(
        &self,
        _ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        out.push(item);
        Ok(())
    }

    fn handle_outbound(
        &self,
        _ctx: &HandlerContext<'_>,
        item: PipelineItem,
        out: &mut Vec<PipelineItem>,
    ) -> Result<(), TransportError> {
        out.push(item);
        Ok(())
    }

    /// Called once the stage has been taken out of the pipeline.
    fn handler_removed(&self, _ctx: &HandlerContext<'_>) {}

    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[derive(Clone)]
pub(crate) struct Stage {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn ChannelHandler>,
}

/// The stage list of one channel.
#[derive(Default)]
pub struct Pipeline {
    stages: RwLock<Arc<Vec<Stage>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Stage>> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn modify<R>(
        &self,
        f: impl FnOnce(&mut Vec<Stage>) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut guard = self.stages.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.as_ref().clone();
        let result = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(result)
    }

    fn index_of(stages: &[Stage], name: &str) -> Result<usize, TransportError> {
        stages
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| TransportError::NoSuchHandler(name.to_string()))
    }

    fn insert(
        &self,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
        at: impl FnOnce(&[Stage]) -> Result<usize, TransportError>,
    ) -> Result<(), TransportError> {
        self.modify(|stages| {
            if stages.iter().any(|s| s.name == name) {
                return Err(TransportError::DuplicateHandler(name.to_string()));
            }
            let index = at(stages.as_slice())?;
            stages.insert(
                index,
                Stage {
                    name: name.to_string(),
                    handler,
                },
            );
            Ok(())
        })
    }

    pub fn add_first(&self, name: &str, handler: Arc<dyn ChannelHandler>) -> Result<(), TransportError> {
        self.insert(name, handler, |_| Ok(0))
    }

    pub fn add_last(&self, name: &str, handler: Arc<dyn ChannelHandler>) -> Result<(), TransportError> {
        self.insert(name, handler, |stages| Ok(stages.len()))
    }

    /// Insert directly on the head side of `base`.
    pub fn add_before(
        &self,
        base: &str,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), TransportError> {
        self.insert(name, handler, |stages| Self::index_of(stages, base))
    }

    /// Insert directly on the tail side of `base`.
    pub fn add_after(
        &self,
        base: &str,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), TransportError> {
        self.insert(name, handler, |stages| Ok(Self::index_of(stages, base)? + 1))
    }

    /// Take a stage out. The caller is responsible for `handler_removed`.
    pub(crate) fn take(&self, name: &str) -> Result<Arc<dyn ChannelHandler>, TransportError> {
        self.modify(|stages| {
            let index = Self::index_of(stages, name)?;
            Ok(stages.remove(index).handler)
        })
    }

    /// Swap the stage named `old` for a new one at the same position.
    pub(crate) fn swap(
        &self,
        old: &str,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Arc<dyn ChannelHandler>, TransportError> {
        self.modify(|stages| {
            let index = Self::index_of(stages, old)?;
            if name != old && stages.iter().any(|s| s.name == name) {
                return Err(TransportError::DuplicateHandler(name.to_string()));
            }
            let previous = std::mem::replace(
                &mut stages[index],
                Stage {
                    name: name.to_string(),
                    handler,
                },
            );
            Ok(previous.handler)
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.snapshot()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|s| s.name.clone()).collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ChannelHandler for Noop {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn pipeline(names: &[&str]) -> Pipeline {
        let p = Pipeline::new();
        for name in names {
            p.add_last(name, Arc::new(Noop)).unwrap();
        }
        p
    }

    #[test]
    fn relative_insertion() {
        let p = pipeline(&["splitter", "decoder", "prepender", "encoder"]);
        p.add_after("decoder", "tap_in", Arc::new(Noop)).unwrap();
        p.add_before("decoder", "decompress", Arc::new(Noop)).unwrap();
        p.add_first("head", Arc::new(Noop)).unwrap();
        assert_eq!(
            p.names(),
            ["head", "splitter", "decompress", "decoder", "tap_in", "prepender", "encoder"]
        );
    }

    #[test]
    fn names_are_unique() {
        let p = pipeline(&["decoder"]);
        assert!(matches!(
            p.add_last("decoder", Arc::new(Noop)),
            Err(TransportError::DuplicateHandler(_))
        ));
        assert!(matches!(
            p.add_after("missing", "x", Arc::new(Noop)),
            Err(TransportError::NoSuchHandler(_))
        ));
    }

    #[test]
    fn swap_keeps_position() {
        let p = pipeline(&["splitter", "inbound_config", "prepender"]);
        p.swap("inbound_config", "decoder", Arc::new(Noop)).unwrap();
        assert_eq!(p.names(), ["splitter", "decoder", "prepender"]);
        assert!(p.take("decoder").is_ok());
        assert!(!p.contains("decoder"));
    }

    #[test]
    fn snapshots_are_isolated_from_later_changes() {
        let p = pipeline(&["a", "b"]);
        let before = p.snapshot();
        p.take("a").unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(p.snapshot().len(), 1);
    }
}
