//! Derived sets: each operator subscribes upstream, keeps private state, and
//! emits at most one downstream batch per upstream batch.

mod filter;
mod flat_map;
mod flat_map_array;
mod group;
mod join;
mod left_join;
mod map;

use std::sync::{Arc, Weak};

use crate::change::Change;
use crate::error::SetError;
use crate::observer::SetObserver;

/// Forwards one input of an operator node to methods on the node.
///
/// Holds the node weakly so the observer registered upstream never keeps the
/// node alive; once every handle and subscription for the derived set is
/// gone, the node drops and its upstream registration dies with it.
pub(crate) struct Relay<T, N> {
    node: Weak<N>,
    on_batch: fn(&N, &[Change<T>]),
    on_error: fn(&N, &Arc<SetError>),
    on_complete: fn(&N),
}

/// Build a relay targeting `node` through a weak reference.
pub(crate) fn relay<T, N>(
    node: &Arc<N>,
    on_batch: fn(&N, &[Change<T>]),
    on_error: fn(&N, &Arc<SetError>),
    on_complete: fn(&N),
) -> Relay<T, N> {
    Relay {
        node: Arc::downgrade(node),
        on_batch,
        on_error,
        on_complete,
    }
}

impl<T, N: Send + Sync> SetObserver<T> for Relay<T, N> {
    fn on_batch(&mut self, batch: &[Change<T>]) {
        if let Some(node) = self.node.upgrade() {
            (self.on_batch)(&node, batch);
        }
    }

    fn on_error(&mut self, error: &Arc<SetError>) {
        if let Some(node) = self.node.upgrade() {
            (self.on_error)(&node, error);
        }
    }

    fn on_complete(&mut self) {
        if let Some(node) = self.node.upgrade() {
            (self.on_complete)(&node);
        }
    }
}
