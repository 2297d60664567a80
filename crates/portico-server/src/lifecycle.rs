//! Endpoint lifecycle state machine.
//!
//! ```text
//! Unbound ──bind──▶ Binding ──listening──▶ Active
//!    │                 │                      │
//!    │                 └──────failure/close───┴──▶ Closed
//!    └───────────────bad port──────────────────────▶ Closed
//! ```
//!
//! `Closed` is absorbing. Transitions are compare-and-set on an atomic tag,
//! so a transition only happens from the state the caller expected.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where an endpoint is in its bind → active → closed life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EndpointState {
    /// Created, not yet bound.
    Unbound = 0,
    /// `bind` is opening the listener.
    Binding = 1,
    /// Listening and both pools running.
    Active = 2,
    /// Shut down; cannot be bound again.
    Closed = 3,
}

impl EndpointState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unbound,
            1 => Self::Binding,
            2 => Self::Active,
            _ => Self::Closed,
        }
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Binding => "binding",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for an [`EndpointState`].
#[derive(Debug)]
pub struct EndpointLifecycle {
    state: AtomicU8,
}

impl EndpointLifecycle {
    /// Creates a lifecycle in [`EndpointState::Unbound`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EndpointState::Unbound as u8),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        EndpointState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves from `from` to `to`.
    ///
    /// Fails with the observed state if it was not `from`, or if the move is
    /// not an edge of the state machine.
    pub fn transition(&self, from: EndpointState, to: EndpointState) -> Result<(), EndpointState> {
        if !Self::is_edge(from, to) {
            return Err(self.state());
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(EndpointState::from_u8)
    }

    /// Moves to [`EndpointState::Closed`] from wherever the endpoint is.
    ///
    /// Returns the state that was left, or `None` if already closed.
    pub fn close(&self) -> Option<EndpointState> {
        let previous = EndpointState::from_u8(
            self.state
                .swap(EndpointState::Closed as u8, Ordering::SeqCst),
        );
        (previous != EndpointState::Closed).then_some(previous)
    }

    /// Returns `true` in [`EndpointState::Active`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == EndpointState::Active
    }

    /// Returns `true` in [`EndpointState::Closed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == EndpointState::Closed
    }

    fn is_edge(from: EndpointState, to: EndpointState) -> bool {
        use EndpointState::{Active, Binding, Closed, Unbound};
        matches!(
            (from, to),
            (Unbound, Binding | Closed) | (Binding, Active | Closed) | (Active, Closed)
        )
    }
}

impl Default for EndpointLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use EndpointState::{Active, Binding, Closed, Unbound};

    #[test]
    fn test_starts_unbound() {
        let lifecycle = EndpointLifecycle::new();
        assert_eq!(lifecycle.state(), Unbound);
        assert!(!lifecycle.is_active());
        assert!(!lifecycle.is_closed());
    }

    #[test]
    fn test_happy_path() {
        let lifecycle = EndpointLifecycle::new();
        lifecycle.transition(Unbound, Binding).unwrap();
        lifecycle.transition(Binding, Active).unwrap();
        assert!(lifecycle.is_active());
        lifecycle.transition(Active, Closed).unwrap();
        assert!(lifecycle.is_closed());
    }

    #[test]
    fn test_transition_from_wrong_state_reports_actual() {
        let lifecycle = EndpointLifecycle::new();
        assert_eq!(lifecycle.transition(Binding, Active), Err(Unbound));
    }

    #[test]
    fn test_non_edges_are_rejected() {
        let lifecycle = EndpointLifecycle::new();
        assert_eq!(lifecycle.transition(Unbound, Active), Err(Unbound));
        assert_eq!(lifecycle.state(), Unbound);
    }

    #[test]
    fn test_unbound_can_close_directly() {
        let lifecycle = EndpointLifecycle::new();
        lifecycle.transition(Unbound, Closed).unwrap();
        assert_eq!(lifecycle.state(), Closed);
        assert_eq!(lifecycle.transition(Unbound, Closed), Err(Closed));
    }

    #[test]
    fn test_closed_is_absorbing() {
        let lifecycle = EndpointLifecycle::new();
        assert_eq!(lifecycle.close(), Some(Unbound));
        assert_eq!(lifecycle.close(), None);
        assert_eq!(lifecycle.transition(Unbound, Binding), Err(Closed));
        assert_eq!(lifecycle.transition(Closed, Active), Err(Closed));
    }

    #[test]
    fn test_only_one_binder_wins() {
        let lifecycle = Arc::new(EndpointLifecycle::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                std::thread::spawn(move || lifecycle.transition(Unbound, Binding).is_ok())
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(lifecycle.state(), Binding);
    }

    #[test]
    fn test_display() {
        assert_eq!(Active.to_string(), "active");
        assert_eq!(Closed.as_str(), "closed");
    }
}
