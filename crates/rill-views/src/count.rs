use std::sync::Arc;

use rill_core::{
    Change, PushObserver, PushStream, SetError, SetHandle, SetObserver, Subject, Subscription,
};

/// A push stream of membership counts, one per upstream batch.
///
/// Obtained from [`counts`].
pub struct Counts {
    subject: Subject<usize>,
    _sub: Subscription,
}

impl PushStream<usize> for Counts {
    fn subscribe(&self, observer: Box<dyn PushObserver<usize>>) -> Subscription {
        self.subject.subscribe(observer)
    }
}

struct CountObserver {
    count: usize,
    feed: Subject<usize>,
}

impl<T> SetObserver<T> for CountObserver {
    fn on_batch(&mut self, batch: &[Change<T>]) {
        for change in batch {
            match change {
                Change::Add(_, _) => self.count += 1,
                Change::Delete(_) => self.count -= 1,
                Change::Update(_, _) => {}
            }
        }
        self.feed.next(self.count);
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

/// Emit the membership count of `handle` after every batch it delivers,
/// the replay batch included. Updates leave the count unchanged but still
/// produce an emission for the batch that carried them.
pub fn counts<T: Clone + Send + 'static>(handle: &SetHandle<T>) -> Counts {
    let subject = Subject::new();
    let sub = handle.subscribe(CountObserver {
        count: 0,
        feed: subject.clone(),
    });
    Counts {
        subject,
        _sub: sub,
    }
}
