//! Property tests for chain construction.
//!
//! These check the ordering contract over arbitrary registrations:
//!
//! - the framing prefix is always `[encoder, decoder]`
//! - building twice from the same registrations gives the same order
//! - application stages come out sorted by their ordering key

use std::sync::Arc;

use portico_core::{
    handler_fn, length_field_framing, CoreError, Flow, HandlerChainBuilder, HandlerEntity,
    HandlerRegistry, SharedHandler, StageKind,
};
use proptest::prelude::*;

/// How a single stage gets registered.
#[derive(Debug, Clone)]
enum Registration {
    First(Option<String>),
    Last(Option<String>),
    Explicit(i64, Option<String>),
}

fn pass() -> SharedHandler {
    Arc::new(handler_fn(|_ctx, frame| Ok(Flow::Continue(frame))))
}

fn name() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z]{1,6}")
}

fn registration() -> impl Strategy<Value = Registration> {
    prop_oneof![
        name().prop_map(Registration::First),
        name().prop_map(Registration::Last),
        (-50i64..50, name()).prop_map(|(order, name)| Registration::Explicit(order, name)),
    ]
}

/// Gives every named registration a unique name so builds succeed.
fn uniquify(registrations: Vec<Registration>) -> Vec<Registration> {
    let suffix = |name: Option<String>, i: usize| name.map(|n| format!("{n}-{i}"));
    registrations
        .into_iter()
        .enumerate()
        .map(|(i, r)| match r {
            Registration::First(n) => Registration::First(suffix(n, i)),
            Registration::Last(n) => Registration::Last(suffix(n, i)),
            Registration::Explicit(o, n) => Registration::Explicit(o, suffix(n, i)),
        })
        .collect()
}

fn registry_from(registrations: &[Registration]) -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    for r in registrations {
        match r {
            Registration::First(name) => registry.add_first_shared(name.clone(), pass()),
            Registration::Last(name) => registry.add_last_shared(name.clone(), pass()),
            Registration::Explicit(order, name) => {
                registry.register(HandlerEntity::from_shared(*order, pass(), name.clone()));
            }
        }
    }
    registry
}

fn builder() -> HandlerChainBuilder {
    HandlerChainBuilder::new(length_field_framing(1024))
}

proptest! {
    #[test]
    fn framing_prefix_is_fixed(registrations in prop::collection::vec(registration(), 0..24)) {
        let registry = registry_from(&uniquify(registrations));
        let chain = builder().build(&registry.snapshot()).unwrap();

        prop_assert_eq!(chain.kind_at(0), Some(StageKind::Encoder));
        prop_assert_eq!(chain.kind_at(1), Some(StageKind::Decoder));
        prop_assert_eq!(chain.len(), registry.len() + 2);
        prop_assert!(chain.kinds()[2..].iter().all(|k| *k == StageKind::Handler));
    }

    #[test]
    fn building_is_deterministic(registrations in prop::collection::vec(registration(), 0..24)) {
        let registry = registry_from(&uniquify(registrations));
        let snapshot = registry.snapshot();

        let first = builder().build(&snapshot).unwrap();
        let second = builder().build(&snapshot).unwrap();

        prop_assert_eq!(first.names(), second.names());
        for (a, b) in first.handlers().iter().zip(second.handlers()) {
            prop_assert!(Arc::ptr_eq(a.handler(), b.handler()));
        }
    }

    #[test]
    fn stages_follow_ordering_keys(registrations in prop::collection::vec(registration(), 0..24)) {
        let registry = registry_from(&uniquify(registrations));
        let snapshot = registry.snapshot();
        let chain = builder().build(&snapshot).unwrap();

        let mut expected = snapshot.clone();
        expected.sort();
        for (installed, entity) in chain.handlers().iter().zip(&expected) {
            prop_assert!(Arc::ptr_eq(installed.handler(), entity.handler()));
        }
    }

    #[test]
    fn repeated_name_always_fails(
        name in "[a-z]{1,6}",
        first_order in -10i64..10,
        second_order in -10i64..10,
    ) {
        let registry = HandlerRegistry::new();
        registry.register(HandlerEntity::from_shared(first_order, pass(), Some(name.clone())));
        registry.register(HandlerEntity::from_shared(second_order, pass(), Some(name.clone())));

        let result = builder().build(&registry.snapshot());
        let is_duplicate = matches!(result, Err(CoreError::DuplicateHandlerName { .. }));
        prop_assert!(is_duplicate);
    }
}

#[test]
fn distinct_names_keep_key_order() {
    let registry = HandlerRegistry::new();
    registry.register(HandlerEntity::from_shared(1, pass(), Some("auth".into())));
    registry.register(HandlerEntity::from_shared(0, pass(), Some("log".into())));

    let chain = builder().build(&registry.snapshot()).unwrap();

    assert_eq!(chain.names(), vec![Some("log"), Some("auth")]);
}
