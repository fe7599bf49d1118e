use std::any::Any;
use std::sync::Arc;

use crate::change::Change;
use crate::observer::{FnObserver, SetObserver};

/// Subscription surface implemented by every stage that exposes a reactive
/// set. Sealed: stages live in this crate, consumers go through
/// [`SetHandle`].
pub(crate) trait Subscribable<T>: Send + Sync {
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<T>>) -> Subscription;
}

/// A handle to a reactive set: a collection whose membership evolves over
/// time, exposed as a stream of batched [`Change`]s.
///
/// The handle offers exactly one primitive, [`subscribe`](SetHandle::subscribe);
/// everything else -- [`map`](SetHandle::map), [`filter`](SetHandle::filter),
/// [`join`](SetHandle::join), [`group_by`](SetHandle::group_by), and friends --
/// builds a new derived set and returns its handle. Cloning a handle shares
/// the same underlying set; all clones see identical membership.
///
/// A new subscriber first receives a replay batch containing one `Add` per
/// currently active lifetime, then every subsequent batch in order, so a late
/// subscriber converges on the same membership as one attached from the
/// start.
pub struct SetHandle<T> {
    node: Arc<dyn Subscribable<T>>,
}

impl<T> Clone for SetHandle<T> {
    fn clone(&self) -> Self {
        SetHandle {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> std::fmt::Debug for SetHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetHandle").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> SetHandle<T> {
    pub(crate) fn from_node<N>(node: Arc<N>) -> SetHandle<T>
    where
        N: Subscribable<T> + 'static,
    {
        SetHandle { node }
    }

    /// Attach an observer to this set.
    ///
    /// The observer synchronously receives the replay batch before this call
    /// returns, then live batches as they are produced. Dropping the returned
    /// [`Subscription`] detaches it again.
    pub fn subscribe(&self, observer: impl SetObserver<T> + 'static) -> Subscription {
        Arc::clone(&self.node).subscribe(Box::new(observer))
    }

    /// Attach a closure that is invoked once per batch.
    ///
    /// Shorthand for [`subscribe`](SetHandle::subscribe) with an observer
    /// that ignores errors and completion.
    pub fn subscribe_fn(&self, f: impl FnMut(&[Change<T>]) + Send + 'static) -> Subscription {
        self.subscribe(FnObserver(f))
    }
}

/// Detaches an observer from the set it watches.
///
/// Dropping the guard (or calling [`dispose`](Subscription::dispose)) removes
/// the observer and releases the bookkeeping specific to it. Detaching never
/// emits `Delete`s -- the observer has opted out, the set is unaffected.
/// Disposal is idempotent.
///
/// The guard also keeps the observed stage alive, so intermediate handles
/// from a builder chain may be dropped freely.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
    keep_alive: Option<Arc<dyn Any + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Subscription {
        Subscription {
            cancel: Some(Box::new(cancel)),
            keep_alive: None,
        }
    }

    /// A guard for a stream that already terminated; disposal is a no-op.
    pub(crate) fn settled() -> Subscription {
        Subscription {
            cancel: None,
            keep_alive: None,
        }
    }

    /// Tie the lifetime of `owner` to this guard.
    pub(crate) fn keeping(mut self, owner: Arc<dyn Any + Send + Sync>) -> Subscription {
        self.keep_alive = Some(owner);
        self
    }

    /// Detach the observer now. Equivalent to dropping the guard.
    pub fn dispose(self) {}

    /// Keep the observer attached for the life of the process.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.keep_alive.take();
    }
}
