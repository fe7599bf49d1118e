use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::change::{Change, Token};
use crate::error::{SetError, UpstreamError};
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::publisher::Publisher;
use crate::subject::{PushObserver, PushStream};

use super::push_relay;

/// Adapt a stream of inner push streams into a reactive set with one
/// lifetime per inner stream.
///
/// An inner stream's first value begins its lifetime, later values update
/// it, and its completion deletes it. An inner stream *failing* also just
/// deletes its lifetime -- inner failures are local and never take the set
/// down. Completion of the outer stream stops new lifetimes from arriving
/// but leaves existing ones running. Failure of the outer stream deletes
/// every active lifetime in one batch, disposes the inner subscriptions, and
/// propagates the error.
pub fn multi_lifetime<T, S, O>(streams: &O) -> SetHandle<T>
where
    T: Clone + Send + 'static,
    S: PushStream<T> + Send + 'static,
    O: PushStream<S> + ?Sized,
{
    let node = Arc::new_cyclic(|this| MultiNode {
        this: this.clone(),
        state: Mutex::new(MultiState {
            next_inner: 0,
            inners: HashMap::new(),
        }),
        output: Publisher::new(),
        upstream: Mutex::new(None),
        _marker: PhantomData,
    });
    let sub = streams.subscribe(Box::new(push_relay(
        &node,
        MultiNode::<T, S>::outer_next,
        MultiNode::<T, S>::outer_error,
        MultiNode::<T, S>::outer_complete,
    )));
    *node.upstream.lock() = Some(sub);
    SetHandle::from_node(node)
}

struct InnerEntry {
    token: Option<Token>,
    sub: Option<Subscription>,
}

struct MultiState {
    next_inner: u64,
    inners: HashMap<u64, InnerEntry>,
}

struct MultiNode<T, S> {
    this: Weak<MultiNode<T, S>>,
    state: Mutex<MultiState>,
    output: Publisher<T>,
    upstream: Mutex<Option<Subscription>>,
    _marker: PhantomData<fn() -> S>,
}

/// Observer for one inner stream, tagged with its slot.
struct InnerRelay<T, S> {
    node: Weak<MultiNode<T, S>>,
    id: u64,
    _marker: PhantomData<fn() -> S>,
}

impl<T, S> PushObserver<T> for InnerRelay<T, S>
where
    T: Clone + Send + 'static,
    S: PushStream<T> + Send + 'static,
{
    fn on_next(&mut self, value: T) {
        if let Some(node) = self.node.upgrade() {
            node.inner_next(self.id, value);
        }
    }

    fn on_error(&mut self, _error: &UpstreamError) {
        if let Some(node) = self.node.upgrade() {
            node.inner_closed(self.id);
        }
    }

    fn on_complete(&mut self) {
        if let Some(node) = self.node.upgrade() {
            node.inner_closed(self.id);
        }
    }
}

impl<T, S> MultiNode<T, S>
where
    T: Clone + Send + 'static,
    S: PushStream<T> + Send + 'static,
{
    fn outer_next(&self, inner: S) {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_inner;
            state.next_inner += 1;
            state.inners.insert(
                id,
                InnerEntry {
                    token: None,
                    sub: None,
                },
            );
            id
        };
        let sub = inner.subscribe(Box::new(InnerRelay::<T, S> {
            node: self.this.clone(),
            id,
            _marker: PhantomData,
        }));
        let mut state = self.state.lock();
        match state.inners.get_mut(&id) {
            // The inner stream may have terminated synchronously during
            // subscribe, removing its slot; the guard then just drops.
            Some(entry) => entry.sub = Some(sub),
            None => drop(sub),
        }
    }

    fn inner_next(&self, id: u64, value: T) {
        let (token, started) = {
            let mut state = self.state.lock();
            let Some(entry) = state.inners.get_mut(&id) else {
                return;
            };
            match entry.token {
                Some(token) => (token, true),
                None => {
                    let token = Token::mint();
                    entry.token = Some(token);
                    (token, false)
                }
            }
        };
        if started {
            self.output.emit(vec![Change::Update(token, value)]);
        } else {
            self.output.emit(vec![Change::Add(token, value)]);
        }
    }

    /// An inner stream ended, normally or not: its lifetime ends, the set
    /// stays healthy.
    fn inner_closed(&self, id: u64) {
        let token = {
            let mut state = self.state.lock();
            match state.inners.remove(&id) {
                Some(entry) => entry.token,
                None => return,
            }
        };
        if let Some(token) = token {
            self.output.emit(vec![Change::Delete(token)]);
        }
    }

    fn outer_complete(&self) {
        // No further inner streams can arrive; the existing ones keep
        // running and the set stays open.
    }

    fn outer_error(&self, error: &UpstreamError) {
        let inners = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.inners)
        };
        drop(inners); // dispose every inner subscription
        self.output.fail(SetError::upstream(error));
    }
}

impl<T, S> Subscribable<T> for MultiNode<T, S>
where
    T: Clone + Send + 'static,
    S: PushStream<T> + Send + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<T>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Subject;
    use crate::testing::Probe;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_lifetime_per_inner_stream() {
        let outer: Subject<Subject<i32>> = Subject::new();
        let set = multi_lifetime(&outer);
        let probe = Probe::attach(&set);

        let first = Subject::new();
        let second = Subject::new();
        outer.next(first.clone());
        outer.next(second.clone());

        // No lifetime until an inner stream produces a value.
        assert_eq!(probe.batch_count(), 0);

        first.next(1);
        second.next(10);
        first.next(2);
        assert_eq!(probe.values_sorted(), vec![2, 10]);
        assert_eq!(probe.len(), 2);
    }

    #[test]
    fn inner_completion_deletes_its_lifetime() {
        let outer: Subject<Subject<i32>> = Subject::new();
        let set = multi_lifetime(&outer);
        let probe = Probe::attach(&set);

        let inner = Subject::new();
        outer.next(inner.clone());
        inner.next(1);
        inner.complete();

        assert!(probe.is_empty());
        assert!(probe.error().is_none());
    }

    #[test]
    fn inner_failure_is_local() {
        let outer: Subject<Subject<i32>> = Subject::new();
        let set = multi_lifetime(&outer);
        let probe = Probe::attach(&set);

        let healthy = Subject::new();
        let doomed = Subject::new();
        outer.next(healthy.clone());
        outer.next(doomed.clone());
        healthy.next(1);
        doomed.next(2);

        doomed.error(std::io::Error::other("inner died"));

        assert_eq!(probe.values_sorted(), vec![1]);
        assert!(probe.error().is_none());

        // The healthy inner keeps flowing.
        healthy.next(3);
        assert_eq!(probe.values_sorted(), vec![3]);
    }

    #[test]
    fn unstarted_inner_completion_is_silent() {
        let outer: Subject<Subject<i32>> = Subject::new();
        let set = multi_lifetime(&outer);
        let probe = Probe::attach(&set);

        let inner: Subject<i32> = Subject::new();
        outer.next(inner.clone());
        inner.complete();
        assert_eq!(probe.batch_count(), 0);
    }

    #[test]
    fn outer_failure_drains_everything_in_one_batch() {
        let outer: Subject<Subject<i32>> = Subject::new();
        let set = multi_lifetime(&outer);
        let probe = Probe::attach(&set);

        let first = Subject::new();
        let second = Subject::new();
        outer.next(first.clone());
        outer.next(second.clone());
        first.next(1);
        second.next(2);

        probe.take_batches();
        outer.error(std::io::Error::other("outer died"));

        let batches = probe.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0].iter().all(|c| matches!(c, Change::Delete(_))));
        assert!(probe.error().is_some());

        // Disposed inners no longer reach the set.
        first.next(9);
        assert_eq!(probe.batches().len(), 1);
    }

    #[test]
    fn outer_completion_leaves_inners_running() {
        let outer: Subject<Subject<i32>> = Subject::new();
        let set = multi_lifetime(&outer);
        let probe = Probe::attach(&set);

        let inner = Subject::new();
        outer.next(inner.clone());
        inner.next(1);

        outer.complete();
        inner.next(2);
        assert_eq!(probe.values_sorted(), vec![2]);
        assert!(!probe.completed());
    }
}
