//! Bridges: adapt raw push streams into reactive sets with lifetimes.

mod multi;
mod single;
mod snapshots;

pub use multi::multi_lifetime;
pub use single::single_lifetime;
pub use snapshots::from_snapshots;

use std::sync::Weak;

use crate::error::UpstreamError;
use crate::subject::PushObserver;

/// Forwards a raw push stream to methods on a bridge node, holding the node
/// weakly so the upstream registration never keeps the bridge alive.
pub(crate) struct PushRelay<T, N> {
    node: Weak<N>,
    on_next: fn(&N, T),
    on_error: fn(&N, &UpstreamError),
    on_complete: fn(&N),
}

pub(crate) fn push_relay<T, N>(
    node: &std::sync::Arc<N>,
    on_next: fn(&N, T),
    on_error: fn(&N, &UpstreamError),
    on_complete: fn(&N),
) -> PushRelay<T, N> {
    PushRelay {
        node: std::sync::Arc::downgrade(node),
        on_next,
        on_error,
        on_complete,
    }
}

impl<T, N: Send + Sync> PushObserver<T> for PushRelay<T, N> {
    fn on_next(&mut self, value: T) {
        if let Some(node) = self.node.upgrade() {
            (self.on_next)(&node, value);
        }
    }

    fn on_error(&mut self, error: &UpstreamError) {
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
