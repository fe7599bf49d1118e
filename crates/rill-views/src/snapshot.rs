use std::collections::HashMap;
use std::sync::Arc;

use rill_core::{
    Change, PushObserver, PushStream, SetError, SetHandle, SetObserver, Subject, Subscription,
    Token,
};

/// A push stream of full value collections, one per upstream batch.
///
/// Obtained from [`snapshots`]. Implements [`PushStream`], so it can feed
/// anything that consumes one -- including
/// [`from_snapshots`](rill_core::from_snapshots), which reconstructs a
/// change stream from it.
pub struct Snapshots<T> {
    subject: Subject<Vec<T>>,
    _sub: Subscription,
}

impl<T: Clone + Send + 'static> PushStream<Vec<T>> for Snapshots<T> {
    fn subscribe(&self, observer: Box<dyn PushObserver<Vec<T>>>) -> Subscription {
        self.subject.subscribe(observer)
    }
}

struct SnapshotObserver<T> {
    members: HashMap<Token, T>,
    feed: Subject<Vec<T>>,
}

impl<T: Clone + Send + 'static> SetObserver<T> for SnapshotObserver<T> {
    fn on_batch(&mut self, batch: &[Change<T>]) {
        for change in batch {
            match change {
                Change::Add(token, value) | Change::Update(token, value) => {
                    self.members.insert(*token, value.clone());
                }
                Change::Delete(token) => {
                    self.members.remove(token);
                }
            }
        }
        self.feed.next(self.members.values().cloned().collect());
    }

    fn on_error(&mut self, error: &Arc<SetError>) {
        let error_clone = Arc::clone(error);
        let error: rill_core::UpstreamError = error_clone;
        self.feed.error_arc(error);
    }

    fn on_complete(&mut self) {
        self.feed.complete();
    }
}

/// Emit the full value collection of `handle` after every batch it
/// delivers, the replay batch included.
///
/// A set that is empty at attach time delivers no replay, so the first
/// snapshot arrives with the first live batch.
pub fn snapshots<T: Clone + Send + 'static>(handle: &SetHandle<T>) -> Snapshots<T> {
    let subject = Subject::new();
    let sub = handle.subscribe(SnapshotObserver {
        members: HashMap::new(),
        feed: subject.clone(),
    });
    Snapshots {
        subject,
        _sub: sub,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rill_core::MutableSet;

    struct Collector(Arc<Mutex<Vec<Vec<u32>>>>);

    impl PushObserver<Vec<u32>> for Collector {
        fn on_next(&mut self, mut value: Vec<u32>) {
            value.sort();
            self.0.lock().push(value);
        }
    }

    #[test]
    fn emits_a_collection_per_batch() {
        let source = MutableSet::new(|n: &u32| *n);
        let stream = snapshots(&source.handle());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = stream.subscribe(Box::new(Collector(Arc::clone(&seen))));

        source.insert(1).unwrap();
        source.insert(2).unwrap();
        source.remove(&1).unwrap();

        assert_eq!(
            seen.lock().clone(),
            vec![vec![1], vec![1, 2], vec![2]]
        );
    }

    #[test]
    fn replay_produces_the_initial_snapshot() {
        let source = MutableSet::new(|n: &u32| *n);
        source.insert(5).unwrap();
        source.insert(6).unwrap();

        let stream = snapshots(&source.handle());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = stream.subscribe(Box::new(Collector(Arc::clone(&seen))));

        source.insert(7).unwrap();
        assert_eq!(seen.lock().clone(), vec![vec![5, 6, 7]]);
    }
}
