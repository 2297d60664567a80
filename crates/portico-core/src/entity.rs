//! Named, ordered wrappers around processing stages.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::handler::ChannelHandler;

/// A shared, type-erased processing stage.
pub type SharedHandler = Arc<dyn ChannelHandler>;

/// One registered stage plus the key that positions it in the chain.
///
/// Entities order by `order`, then by registration sequence, then by name.
/// They are immutable; cloning only bumps the handler's reference count.
#[derive(Clone)]
pub struct HandlerEntity {
    order: i64,
    sequence: u64,
    name: Option<String>,
    handler: SharedHandler,
}

impl HandlerEntity {
    /// Creates an entity with an explicit ordering key.
    pub fn new<H: ChannelHandler>(order: i64, handler: H, name: Option<String>) -> Self {
        Self::from_shared(order, Arc::new(handler), name)
    }

    /// Creates an entity around an already shared handler.
    pub fn from_shared(order: i64, handler: SharedHandler, name: Option<String>) -> Self {
        Self {
            order,
            sequence: 0,
            name,
            handler,
        }
    }

    /// Returns a copy stamped with the registry's sequence number.
    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns the ordering key.
    #[must_use]
    pub fn order(&self) -> i64 {
        self.order
    }

    /// Returns the registration sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the stage name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the wrapped handler.
    #[must_use]
    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    fn sort_key(&self) -> (i64, u64, Option<&str>) {
        (self.order, self.sequence, self.name.as_deref())
    }
}

impl PartialEq for HandlerEntity {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for HandlerEntity {}

impl PartialOrd for HandlerEntity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HandlerEntity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Debug for HandlerEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntity")
            .field("order", &self.order)
            .field("sequence", &self.sequence)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, Flow};

    fn entity(order: i64, name: Option<&str>) -> HandlerEntity {
        HandlerEntity::new(
            order,
            handler_fn(|_ctx, frame| Ok(Flow::Continue(frame))),
            name.map(ToString::to_string),
        )
    }

    #[test]
    fn test_orders_by_key_first() {
        let low = entity(-1, Some("z"));
        let high = entity(1, Some("a"));
        assert!(low < high);
    }

    #[test]
    fn test_sequence_breaks_ties() {
        let first = entity(0, None).with_sequence(1);
        let second = entity(0, None).with_sequence(2);
        assert!(first < second);
    }

    #[test]
    fn test_name_breaks_remaining_ties() {
        let unnamed = entity(0, None);
        let named = entity(0, Some("log"));
        assert!(unnamed < named);
        assert!(entity(0, Some("auth")) < named);
    }

    #[test]
    fn test_clone_shares_handler() {
        let original = entity(3, Some("auth"));
        let copy = original.clone();

        assert!(Arc::ptr_eq(original.handler(), copy.handler()));
        assert_eq!(copy.order(), 3);
        assert_eq!(copy.name(), Some("auth"));
        assert_eq!(copy.sequence(), 0);
    }
}
