//! Publication registry & property poller.
//!
//! An ordered, append-only list of `(key, stream_index, strategy,
//! last_published_ns, next_scheduled_ns)`. Iteration order is
//! registration order and is part of the contract, so this is a `Vec`,
//! not a hash map.

use crate::property_store::PropertyKey;
use crate::strategy::{PublishStrategy, NEVER};

#[derive(Debug, Clone, Copy)]
pub struct PublicationConfig {
    pub key: PropertyKey,
    pub stream_index: usize,
    pub strategy: PublishStrategy,
    pub last_published_ns: i64,
    pub next_scheduled_ns: i64,
}

impl PublicationConfig {
    fn new(key: PropertyKey, stream_index: usize, strategy: PublishStrategy) -> Self {
        Self {
            key,
            stream_index,
            strategy,
            last_published_ns: NEVER,
            next_scheduled_ns: strategy.next_time(0),
        }
    }
}

/// The registry. Registration is additive: the same
/// `(key, stream_index, strategy)` triple may be registered more than
/// once, producing independent configs that publish independently.
#[derive(Default)]
pub struct PublicationRegistry {
    configs: Vec<PublicationConfig>,
}

impl PublicationRegistry {
    pub fn new() -> Self {
        Self { configs: Vec::new() }
    }

    /// O(1) append.
    pub fn register(&mut self, key: PropertyKey, stream_index: usize, strategy: PublishStrategy) {
        self.configs
            .push(PublicationConfig::new(key, stream_index, strategy));
    }

    /// Remove the first config matching `(key, stream_index)`. Returns
    /// whether one was found.
    pub fn unregister(&mut self, key: PropertyKey, stream_index: usize) -> bool {
        if let Some(pos) = self
            .configs
            .iter()
            .position(|c| c.key == key && c.stream_index == stream_index)
        {
            self.configs.remove(pos);
            true
        } else {
            false
        }
    }

    /// Remove every config for `key`, regardless of stream. Returns the
    /// count removed.
    pub fn unregister_all(&mut self, key: PropertyKey) -> usize {
        let before = self.configs.len();
        self.configs.retain(|c| c.key != key);
        before - self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Enumerate `(key, stream_index, strategy)` in registration order.
    pub fn list(&self) -> impl Iterator<Item = (PropertyKey, usize, PublishStrategy)> + '_ {
        self.configs
            .iter()
            .map(|c| (c.key, c.stream_index, c.strategy))
    }

    /// Mutable, in-order iteration used by the poller to update
    /// `last_published_ns`/`next_scheduled_ns` in place.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PublicationConfig> {
        self.configs.iter_mut()
    }
}
