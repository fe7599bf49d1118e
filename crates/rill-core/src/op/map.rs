use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::Change;
use crate::error::SetError;
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::op::relay;
use crate::publisher::Publisher;

impl<T: Clone + Send + 'static> SetHandle<T> {
    /// Project every item through a pure function, keeping lifetimes 1:1.
    ///
    /// Upstream tokens are preserved; `Add` and `Update` carry the projected
    /// value, `Delete` passes through.
    ///
    /// # Examples
    ///
    /// ```
    /// use rill_core::{constant, testing::Probe};
    ///
    /// let numbers = constant(vec![1, 2, 3]);
    /// let doubled = numbers.map(|n| n * 2);
    /// let probe = Probe::attach(&doubled);
    /// assert_eq!(probe.values_sorted(), vec![2, 4, 6]);
    /// ```
    pub fn map<U, F>(&self, project: F) -> SetHandle<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let node = Arc::new(MapNode {
            output: Publisher::new(),
            project,
            upstream: Mutex::new(None),
            _input: std::marker::PhantomData,
        });
        let sub = self.subscribe(relay(
            &node,
            MapNode::upstream_batch,
            MapNode::upstream_error,
            MapNode::upstream_complete,
        ));
        *node.upstream.lock() = Some(sub);
        SetHandle::from_node(node)
    }
}

struct MapNode<T, U, F> {
    output: Publisher<U>,
    project: F,
    upstream: Mutex<Option<Subscription>>,
    _input: std::marker::PhantomData<fn(&T)>,
}

impl<T, U, F> MapNode<T, U, F>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    fn upstream_batch(&self, batch: &[Change<T>]) {
        let out = batch
            .iter()
            .map(|change| match change {
                Change::Add(token, value) => Change::Add(*token, (self.project)(value)),
                Change::Update(token, value) => Change::Update(*token, (self.project)(value)),
                Change::Delete(token) => Change::Delete(*token),
            })
            .collect();
        self.output.emit(out);
    }

    fn upstream_error(&self, error: &Arc<SetError>) {
        self.output.fail(Arc::clone(error));
    }

    fn upstream_complete(&self) {
        self.output.complete();
    }
}

impl<T, U, F> Subscribable<U> for MapNode<T, U, F>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<U>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MutableSet;
    use crate::testing::Probe;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_projection_reproduces_the_stream() {
        let source = MutableSet::new(|n: &u32| *n / 10);
        let direct = Probe::attach(&source.handle());
        let mapped = Probe::attach(&source.handle().map(|n| *n));

        source.insert(11).unwrap();
        source.insert(21).unwrap();
        source.update(12).unwrap();
        source.remove(&2).unwrap();

        assert_eq!(direct.batches(), mapped.batches());
    }

    #[test]
    fn projects_adds_and_updates() {
        let source = MutableSet::new(|s: &&'static str| s.len());
        let lengths = source.handle().map(|s| s.to_uppercase());
        let probe = Probe::attach(&lengths);

        source.insert("abc").unwrap();
        source.update("xyz").unwrap();

        let batches = probe.batches();
        let token = batches[0][0].token();
        assert_eq!(batches[0], vec![Change::Add(token, "ABC".to_string())]);
        assert_eq!(batches[1], vec![Change::Update(token, "XYZ".to_string())]);
    }
}
