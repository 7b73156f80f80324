//! Typed per-channel attribute slots.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;

/// Name plus value type of an attribute.
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({})", self.name)
    }
}

pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Attribute storage of one channel. Values are opaque to the map; typed
/// keys downcast on read.
#[derive(Default)]
pub struct AttributeMap {
    values: DashMap<&'static str, AttributeValue>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read. `None` if unset or holding another type.
    pub fn get<T: Any + Send + Sync>(&self, key: &AttributeKey<T>) -> Option<Arc<T>> {
        self.get_raw(key.name)
            .and_then(|v| Arc::downcast::<T>(v).ok())
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &AttributeKey<T>, value: T) {
        self.values.insert(key.name, Arc::new(value));
    }

    pub fn get_raw(&self, name: &str) -> Option<AttributeValue> {
        self.values.get(name).map(|v| v.value().clone())
    }

    pub fn set_raw(&self, name: &'static str, value: AttributeValue) {
        self.values.insert(name, value);
    }

    pub fn remove(&self, name: &str) -> Option<AttributeValue> {
        self.values.remove(name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.values.iter().map(|e| *e.key()).collect()
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
