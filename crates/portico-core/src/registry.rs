//! Concurrent registration of handler entities.
//!
//! Stages added with `add_first` receive decreasing ordering keys
//! (`-1, -2, …`) and stages added with `add_last` receive increasing keys
//! (`0, 1, …`), so a sorted snapshot reproduces the order the caller asked
//! for. Readers take a cloned snapshot; a snapshot never changes after it is
//! taken.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{HandlerEntity, SharedHandler};
use crate::handler::ChannelHandler;

/// Thread-safe, append-only set of registered stages.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    entities: Vec<HandlerEntity>,
    next_first: i64,
    next_last: i64,
    next_sequence: u64,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            next_first: -1,
            next_last: 0,
            next_sequence: 0,
        }
    }
}

impl RegistryInner {
    fn push(&mut self, entity: HandlerEntity) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entities.push(entity.with_sequence(sequence));
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `handlers` appended in order.
    pub fn with_handlers<I>(handlers: I) -> Self
    where
        I: IntoIterator<Item = SharedHandler>,
    {
        let registry = Self::new();
        for handler in handlers {
            registry.add_last_shared(None, handler);
        }
        registry
    }

    /// Appends an anonymous stage after every stage registered so far.
    pub fn add_last<H: ChannelHandler>(&self, handler: H) {
        self.add_last_shared(None, Arc::new(handler));
    }

    /// Appends a named stage after every stage registered so far.
    pub fn add_last_named<H: ChannelHandler>(&self, name: impl Into<String>, handler: H) {
        self.add_last_shared(Some(name.into()), Arc::new(handler));
    }

    /// Appends a shared stage after every stage registered so far.
    pub fn add_last_shared(&self, name: Option<String>, handler: SharedHandler) {
        let mut inner = self.inner.write();
        let order = inner.next_last;
        inner.next_last += 1;
        inner.push(HandlerEntity::from_shared(order, handler, name));
    }

    /// Prepends an anonymous stage before every stage registered so far.
    pub fn add_first<H: ChannelHandler>(&self, handler: H) {
        self.add_first_shared(None, Arc::new(handler));
    }

    /// Prepends a named stage before every stage registered so far.
    pub fn add_first_named<H: ChannelHandler>(&self, name: impl Into<String>, handler: H) {
        self.add_first_shared(Some(name.into()), Arc::new(handler));
    }

    /// Prepends a shared stage before every stage registered so far.
    pub fn add_first_shared(&self, name: Option<String>, handler: SharedHandler) {
        let mut inner = self.inner.write();
        let order = inner.next_first;
        inner.next_first -= 1;
        inner.push(HandlerEntity::from_shared(order, handler, name));
    }

    /// Registers an entity with a caller-chosen ordering key.
    pub fn register(&self, entity: HandlerEntity) {
        self.inner.write().push(entity);
    }

    /// Returns a point-in-time copy of the registered entities.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HandlerEntity> {
        self.inner.read().entities.clone()
    }

    /// Returns the number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entities.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::handler::{handler_fn, Flow, FnHandler, HandlerContext};
    use bytes::Bytes;

    type PassFn = fn(&mut HandlerContext, Bytes) -> Result<Flow, CoreError>;

    fn pass() -> FnHandler<PassFn> {
        handler_fn(|_ctx, frame| Ok(Flow::Continue(frame)))
    }

    fn sorted_names(registry: &HandlerRegistry) -> Vec<String> {
        let mut snapshot = registry.snapshot();
        snapshot.sort();
        snapshot
            .iter()
            .map(|e| e.name().unwrap_or("_").to_string())
            .collect()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_add_last_keeps_registration_order() {
        let registry = HandlerRegistry::new();
        registry.add_last_named("a", pass());
        registry.add_last_named("b", pass());
        registry.add_last_named("c", pass());

        assert_eq!(sorted_names(&registry), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_add_first_prepends() {
        let registry = HandlerRegistry::new();
        registry.add_last_named("middle", pass());
        registry.add_first_named("second", pass());
        registry.add_first_named("first", pass());
        registry.add_last_named("last", pass());

        assert_eq!(
            sorted_names(&registry),
            vec!["first", "second", "middle", "last"]
        );
    }

    #[test]
    fn test_order_keys_grow_outward() {
        let registry = HandlerRegistry::new();
        registry.add_last(pass());
        registry.add_first(pass());
        registry.add_last(pass());
        registry.add_first(pass());

        let orders: Vec<i64> = registry.snapshot().iter().map(HandlerEntity::order).collect();
        assert_eq!(orders, vec![0, -1, 1, -2]);
    }

    #[test]
    fn test_register_explicit_order() {
        let registry = HandlerRegistry::new();
        registry.register(HandlerEntity::new(1, pass(), Some("auth".to_string())));
        registry.register(HandlerEntity::new(0, pass(), Some("log".to_string())));

        assert_eq!(sorted_names(&registry), vec!["log", "auth"]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_registrations() {
        let registry = HandlerRegistry::new();
        registry.add_last_named("a", pass());
        let snapshot = registry.snapshot();

        registry.add_last_named("b", pass());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_with_handlers_appends() {
        let handlers: Vec<SharedHandler> = vec![Arc::new(pass()), Arc::new(pass())];
        let registry = HandlerRegistry::with_handlers(handlers);

        let orders: Vec<i64> = registry.snapshot().iter().map(HandlerEntity::order).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(HandlerRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        if (i + j) % 2 == 0 {
                            registry.add_last(pass());
                        } else {
                            registry.add_first(pass());
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 200);

        let mut orders: Vec<i64> = snapshot.iter().map(HandlerEntity::order).collect();
        orders.sort_unstable();
        orders.dedup();
        assert_eq!(orders.len(), 200);
    }
}
