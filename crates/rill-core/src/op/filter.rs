use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Change, Token};
use crate::error::SetError;
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::op::relay;
use crate::publisher::Publisher;

impl<T: Clone + Send + 'static> SetHandle<T> {
    /// Keep only the items the predicate admits, re-evaluating on every
    /// update.
    ///
    /// An item whose update flips the predicate crosses the membership
    /// boundary: false-to-true emits an `Add`, true-to-false emits a
    /// `Delete`. Lifetime tokens of admitted items are the upstream tokens,
    /// so an item that leaves and later re-enters does so under its original
    /// token.
    ///
    /// # Examples
    ///
    /// ```
    /// use rill_core::{constant, testing::Probe};
    ///
    /// let numbers = constant(vec![1, 2, 3, 4]);
    /// let even = numbers.filter(|n| n % 2 == 0);
    /// let probe = Probe::attach(&even);
    /// assert_eq!(probe.values_sorted(), vec![2, 4]);
    /// ```
    pub fn filter<P>(&self, predicate: P) -> SetHandle<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let node = Arc::new(FilterNode {
            admitted: Mutex::new(HashSet::new()),
            output: Publisher::new(),
            predicate,
            upstream: Mutex::new(None),
        });
        let sub = self.subscribe(relay(
            &node,
            FilterNode::upstream_batch,
            FilterNode::upstream_error,
            FilterNode::upstream_complete,
        ));
        *node.upstream.lock() = Some(sub);
        SetHandle::from_node(node)
    }
}

struct FilterNode<T, P> {
    admitted: Mutex<HashSet<Token>>,
    output: Publisher<T>,
    predicate: P,
    upstream: Mutex<Option<Subscription>>,
}

impl<T, P> FilterNode<T, P>
where
    T: Clone + Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn upstream_batch(&self, batch: &[Change<T>]) {
        let mut admitted = self.admitted.lock();
        let mut out = Vec::new();
        for change in batch {
            match change {
                Change::Add(token, value) => {
                    if (self.predicate)(value) {
                        admitted.insert(*token);
                        out.push(Change::Add(*token, value.clone()));
                    }
                }
                Change::Update(token, value) => {
                    let was = admitted.contains(token);
                    let now = (self.predicate)(value);
                    match (was, now) {
                        (true, true) => out.push(Change::Update(*token, value.clone())),
                        (true, false) => {
                            admitted.remove(token);
                            out.push(Change::Delete(*token));
                        }
                        (false, true) => {
                            admitted.insert(*token);
                            out.push(Change::Add(*token, value.clone()));
                        }
                        (false, false) => {}
                    }
                }
                Change::Delete(token) => {
                    if admitted.remove(token) {
                        out.push(Change::Delete(*token));
                    }
                }
            }
        }
        drop(admitted);
        self.output.emit(out);
    }

    fn upstream_error(&self, error: &Arc<SetError>) {
        self.admitted.lock().clear();
        self.output.fail(Arc::clone(error));
    }

    fn upstream_complete(&self) {
        self.output.complete();
    }
}

impl<T, P> Subscribable<T> for FilterNode<T, P>
where
    T: Clone + Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<T>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MutableSet;
    use crate::testing::Probe;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct Employee {
        id: u32,
        name: &'static str,
        dept: &'static str,
    }

    fn emp(id: u32, name: &'static str, dept: &'static str) -> Employee {
        Employee { id, name, dept }
    }

    #[test]
    fn tracks_admission_across_updates() {
        let source = MutableSet::new(|e: &Employee| e.id);
        let engineering = source.handle().filter(|e| e.dept == "Eng");
        let probe = Probe::attach(&engineering);

        source.insert(emp(1, "Alice", "Sales")).unwrap();
        source.update(emp(1, "Alice", "Eng")).unwrap();
        source.update(emp(1, "Bob", "Eng")).unwrap();
        source.update(emp(1, "Bob", "Sales")).unwrap();
        source.remove(&1).unwrap();

        let batches = probe.batches();
        assert_eq!(batches.len(), 3);
        let token = batches[0][0].token();
        assert_eq!(batches[0], vec![Change::Add(token, emp(1, "Alice", "Eng"))]);
        assert_eq!(batches[1], vec![Change::Update(token, emp(1, "Bob", "Eng"))]);
        assert_eq!(batches[2], vec![Change::Delete(token)]);
    }

    #[test]
    fn always_true_predicate_is_identity() {
        let source = MutableSet::new(|e: &Employee| e.id);
        source.insert(emp(1, "Alice", "Eng")).unwrap();

        let direct = Probe::attach(&source.handle());
        let filtered = Probe::attach(&source.handle().filter(|_| true));

        source.update(emp(1, "Alicia", "Eng")).unwrap();
        source.insert(emp(2, "Bob", "Sales")).unwrap();
        source.remove(&1).unwrap();

        assert_eq!(direct.batches(), filtered.batches());
    }

    #[test]
    fn stacked_filters_compose_as_conjunction() {
        let source = MutableSet::new(|e: &Employee| e.id);
        let stacked = source
            .handle()
            .filter(|e: &Employee| e.dept == "Eng")
            .filter(|e: &Employee| e.name.starts_with('A'));
        let combined = source
            .handle()
            .filter(|e: &Employee| e.dept == "Eng" && e.name.starts_with('A'));

        let stacked_probe = Probe::attach(&stacked);
        let combined_probe = Probe::attach(&combined);

        source.insert(emp(1, "Alice", "Eng")).unwrap();
        source.insert(emp(2, "Ann", "Sales")).unwrap();
        source.update(emp(2, "Ann", "Eng")).unwrap();
        source.update(emp(1, "Bob", "Eng")).unwrap();
        source.remove(&2).unwrap();

        assert_eq!(stacked_probe.batches(), combined_probe.batches());
    }

    #[test]
    fn replay_through_filter_reflects_admission() {
        let source = MutableSet::new(|e: &Employee| e.id);
        let engineering = source.handle().filter(|e| e.dept == "Eng");

        source.insert(emp(1, "Alice", "Eng")).unwrap();
        source.insert(emp(2, "Bob", "Sales")).unwrap();

        let probe = Probe::attach(&engineering);
        assert_eq!(probe.values_sorted(), vec![emp(1, "Alice", "Eng")]);
    }
}
