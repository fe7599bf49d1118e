use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::{SetError, UpstreamError};
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::publisher::Publisher;
use crate::subject::PushStream;

use super::push_relay;

/// Adapt a stream of full collection snapshots into a reactive set by
/// diffing consecutive snapshots.
///
/// Items are identified across snapshots by `key_fn`; an item that persists
/// keeps its lifetime token, emitting an `Update` only when its value
/// changed. Items that disappear are deleted before new ones are added, all
/// in one batch per snapshot; a snapshot equal to the previous one emits
/// nothing. Duplicate keys within one snapshot collapse, the later entry
/// winning.
///
/// Completion of the snapshot stream drains every lifetime and leaves the
/// set open; failure drains and then propagates the error.
pub fn from_snapshots<T, K, F, S>(stream: &S, key_fn: F) -> SetHandle<T>
where
    T: Clone + PartialEq + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
    S: PushStream<Vec<T>> + ?Sized,
{
    let node = Arc::new(SnapshotNode {
        state: Mutex::new(HashMap::new()),
        output: Publisher::new(),
        key_fn,
        upstream: Mutex::new(None),
    });
    let sub = stream.subscribe(Box::new(push_relay(
        &node,
        SnapshotNode::snapshot,
        SnapshotNode::error,
        SnapshotNode::complete,
    )));
    *node.upstream.lock() = Some(sub);
    SetHandle::from_node(node)
}

struct SnapshotNode<T, K, F> {
    state: Mutex<HashMap<K, (Token, T)>>,
    output: Publisher<T>,
    key_fn: F,
    upstream: Mutex<Option<Subscription>>,
}

impl<T, K, F> SnapshotNode<T, K, F>
where
    T: Clone + PartialEq + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn snapshot(&self, items: Vec<T>) {
        let mut state = self.state.lock();

        // Late duplicates overwrite earlier ones.
        let mut incoming: HashMap<K, T> = HashMap::with_capacity(items.len());
        for item in items {
            incoming.insert((self.key_fn)(&item), item);
        }

        let mut out: Batch<T> = Vec::new();
        for (key, (token, _)) in state.iter() {
            if !incoming.contains_key(key) {
                out.push(Change::Delete(*token));
            }
        }
        let mut next: HashMap<K, (Token, T)> = HashMap::with_capacity(incoming.len());
        for (key, item) in incoming {
            match state.remove(&key) {
                Some((token, previous)) => {
                    if previous != item {
                        out.push(Change::Update(token, item.clone()));
                    }
                    next.insert(key, (token, item));
                }
                None => {
                    let token = Token::mint();
                    out.push(Change::Add(token, item.clone()));
                    next.insert(key, (token, item));
                }
            }
        }
        *state = next;
        drop(state);

        tracing::trace!(changes = out.len(), "snapshot diffed");
        self.output.emit(out);
    }

    fn complete(&self) {
        let drain: Batch<T> = self
            .state
            .lock()
            .drain()
            .map(|(_, (token, _))| Change::Delete(token))
            .collect();
        self.output.emit(drain);
        // The set stays open after the snapshot stream ends.
    }

    fn error(&self, error: &UpstreamError) {
        self.state.lock().clear();
        self.output.fail(SetError::upstream(error));
    }
}

impl<T, K, F> Subscribable<T> for SnapshotNode<T, K, F>
where
    T: Clone + PartialEq + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
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

    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct Employee {
        id: u32,
        dept: &'static str,
    }

    fn emp(id: u32, dept: &'static str) -> Employee {
        Employee { id, dept }
    }

    fn bridge(subject: &Subject<Vec<Employee>>) -> SetHandle<Employee> {
        from_snapshots(subject, |e: &Employee| e.id)
    }

    #[test]
    fn identical_snapshot_emits_nothing() {
        let subject = Subject::new();
        let probe = Probe::attach(&bridge(&subject));

        subject.next(vec![emp(1, "Eng")]);
        assert_eq!(probe.batch_count(), 1);

        subject.next(vec![emp(1, "Eng")]);
        assert_eq!(probe.batch_count(), 1);
    }

    #[test]
    fn diffs_adds_updates_and_deletes() {
        let subject = Subject::new();
        let probe = Probe::attach(&bridge(&subject));

        subject.next(vec![emp(1, "Eng"), emp(2, "Sales")]);
        let tokens = probe.live_tokens();
        assert_eq!(tokens.len(), 2);

        probe.take_batches();
        subject.next(vec![emp(1, "Ops"), emp(3, "Legal")]);

        let batches = probe.batches();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 3);
        assert!(batch
            .iter()
            .any(|c| matches!(c, Change::Update(_, value) if *value == emp(1, "Ops"))));
        assert!(batch
            .iter()
            .any(|c| matches!(c, Change::Add(_, value) if *value == emp(3, "Legal"))));
        assert!(batch.iter().any(|c| matches!(c, Change::Delete(_))));

        // Persisting items keep their token across snapshots.
        assert_eq!(probe.live_tokens().intersection(&tokens).count(), 1);
    }

    #[test]
    fn duplicate_keys_collapse_later_wins() {
        let subject = Subject::new();
        let probe = Probe::attach(&bridge(&subject));

        subject.next(vec![emp(1, "Eng"), emp(1, "Sales")]);
        assert_eq!(probe.values_sorted(), vec![emp(1, "Sales")]);
    }

    #[test]
    fn completion_drains_and_stays_open() {
        let subject = Subject::new();
        let probe = Probe::attach(&bridge(&subject));

        subject.next(vec![emp(1, "Eng")]);
        subject.complete();

        assert!(probe.is_empty());
        assert!(probe.error().is_none());
        assert!(!probe.completed());
    }

    #[test]
    fn failure_drains_then_propagates() {
        let subject = Subject::new();
        let probe = Probe::attach(&bridge(&subject));

        subject.next(vec![emp(1, "Eng"), emp(2, "Sales")]);
        probe.take_batches();
        subject.error(std::io::Error::other("poll failed"));

        let batches = probe.batches();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].iter().all(|c| matches!(c, Change::Delete(_))));
        assert!(matches!(
            *probe.error().expect("error expected"),
            SetError::Upstream(_)
        ));
    }

    #[test]
    fn reconstructs_a_source_stream_up_to_token_renaming() {
        // Feeding a set's own snapshots through the bridge reproduces its
        // membership trajectory.
        let source = crate::source::MutableSet::new(|e: &Employee| e.id);
        let snapshots: Subject<Vec<Employee>> = Subject::new();
        let rebuilt = Probe::attach(&bridge(&snapshots));
        let direct = Probe::attach(&source.handle());

        let feed = |probe: &Probe<Employee>, subject: &Subject<Vec<Employee>>| {
            subject.next(probe.values_sorted());
        };

        source.insert(emp(1, "Eng")).unwrap();
        feed(&direct, &snapshots);
        source.insert(emp(2, "Sales")).unwrap();
        feed(&direct, &snapshots);
        source.update(emp(1, "Ops")).unwrap();
        feed(&direct, &snapshots);
        source.remove(&2).unwrap();
        feed(&direct, &snapshots);

        assert_eq!(rebuilt.values_sorted(), direct.values_sorted());
        assert_eq!(rebuilt.batch_count(), direct.batch_count());
    }
}
