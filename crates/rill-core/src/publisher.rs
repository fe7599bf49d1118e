//! Shared fan-out machinery behind every reactive set stage.
//!
//! A [`Publisher`] owns the two things every stage needs to honor the stream
//! contract: the live-membership map that backs subscription replay, and the
//! observer registry that batches fan out through. Stages translate their
//! input into output batches and hand them to [`Publisher::emit`]; replay,
//! termination, and the delete-all-then-error cascade are handled here once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::SetError;
use crate::handle::{Subscribable, Subscription};
use crate::observer::SetObserver;

type ObserverCell<T> = Arc<Mutex<Box<dyn SetObserver<T>>>>;

/// Latched terminal state, replayed to late subscribers.
enum Terminal {
    Completed,
    Failed(Arc<SetError>),
}

pub(crate) struct Publisher<T> {
    state: Arc<Mutex<PubState<T>>>,
}

struct PubState<T> {
    live: HashMap<Token, T>,
    next_id: u64,
    subscribers: Vec<(u64, ObserverCell<T>)>,
    terminal: Option<Terminal>,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub(crate) fn new() -> Publisher<T> {
        Publisher::with_members([])
    }

    /// A publisher whose membership starts out non-empty (constant sources).
    pub(crate) fn with_members(members: impl IntoIterator<Item = (Token, T)>) -> Publisher<T> {
        Publisher {
            state: Arc::new(Mutex::new(PubState {
                live: members.into_iter().collect(),
                next_id: 0,
                subscribers: Vec::new(),
                terminal: None,
            })),
        }
    }

    /// Register an observer: replay current membership, then live batches.
    ///
    /// On an already-terminated stream the terminal notification is delivered
    /// immediately instead and the returned guard is inert.
    ///
    /// The observer's own cell lock is held while it is registered and while
    /// the replay is delivered, so a concurrent emit cannot overtake the
    /// replay. A subscriber added from within another observer's callback
    /// misses the in-flight batch; its replay already reflects that batch.
    pub(crate) fn attach(&self, observer: Box<dyn SetObserver<T>>) -> Subscription {
        let mut state = self.state.lock();
        match &state.terminal {
            Some(Terminal::Failed(error)) => {
                let error = Arc::clone(error);
                drop(state);
                let mut observer = observer;
                observer.on_error(&error);
                return Subscription::settled();
            }
            Some(Terminal::Completed) => {
                drop(state);
                let mut observer = observer;
                observer.on_complete();
                return Subscription::settled();
            }
            None => {}
        }

        let id = state.next_id;
        state.next_id += 1;
        let replay: Batch<T> = state
            .live
            .iter()
            .map(|(token, value)| Change::Add(*token, value.clone()))
            .collect();
        let cell: ObserverCell<T> = Arc::new(Mutex::new(observer));
        let mut guard = cell.lock();
        state.subscribers.push((id, Arc::clone(&cell)));
        drop(state);

        tracing::trace!(id, replayed = replay.len(), "observer attached");
        if !replay.is_empty() {
            guard.on_batch(&replay);
        }
        drop(guard);

        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Apply a batch to the membership map and fan it out.
    ///
    /// Empty batches are elided, and a batch arriving after termination is
    /// dropped (an input that outlived the failure of a sibling input). The
    /// map is updated before delivery, so a subscriber attached re-entrantly
    /// from a callback replays the post-batch membership.
    pub(crate) fn emit(&self, batch: Batch<T>) {
        if batch.is_empty() {
            return;
        }
        let subscribers = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            #[cfg(debug_assertions)]
            validate(&state.live, &batch);
            for change in &batch {
                match change {
                    Change::Add(token, value) | Change::Update(token, value) => {
                        state.live.insert(*token, value.clone());
                    }
                    Change::Delete(token) => {
                        state.live.remove(token);
                    }
                }
            }
            state.subscribers.clone()
        };
        tracing::trace!(changes = batch.len(), observers = subscribers.len(), "emit");
        for (_, cell) in subscribers {
            cell.lock().on_batch(&batch);
        }
    }

    /// Delete every active lifetime in one batch, then deliver the error.
    ///
    /// Subscribers see a clean end to each lifetime before the stream
    /// terminates. Idempotent once terminated.
    pub(crate) fn fail(&self, error: Arc<SetError>) {
        let (drain, subscribers) = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Failed(Arc::clone(&error)));
            let drain: Batch<T> = state
                .live
                .drain()
                .map(|(token, _)| Change::Delete(token))
                .collect();
            (drain, std::mem::take(&mut state.subscribers))
        };
        tracing::debug!(drained = drain.len(), %error, "stream failed");
        if !drain.is_empty() {
            for (_, cell) in &subscribers {
                cell.lock().on_batch(&drain);
            }
        }
        for (_, cell) in &subscribers {
            cell.lock().on_error(&error);
        }
    }

    /// Terminate normally. Membership is left as is; no further batches flow.
    pub(crate) fn complete(&self) {
        let subscribers = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Completed);
            std::mem::take(&mut state.subscribers)
        };
        for (_, cell) in &subscribers {
            cell.lock().on_complete();
        }
    }

    /// Snapshot of the current membership (test support).
    #[cfg(test)]
    pub(crate) fn members(&self) -> Vec<(Token, T)> {
        self.state
            .lock()
            .live
            .iter()
            .map(|(token, value)| (*token, value.clone()))
            .collect()
    }
}

/// Check a batch against the lifetime contract, treating the batch as a
/// prefix of the stream. Violations are producer bugs and abort loudly.
#[cfg(debug_assertions)]
fn validate<T>(live: &HashMap<Token, T>, batch: &Batch<T>) {
    let mut active: std::collections::HashSet<Token> = live.keys().copied().collect();
    for change in batch {
        match change {
            Change::Add(token, _) => {
                if !active.insert(*token) {
                    panic!(
                        "{}",
                        SetError::InvalidPrecondition {
                            detail: format!("Add for live token {token:?}"),
                        }
                    );
                }
            }
            Change::Update(token, _) => {
                if !active.contains(token) {
                    panic!(
                        "{}",
                        SetError::InvalidPrecondition {
                            detail: format!("Update for inactive token {token:?}"),
                        }
                    );
                }
            }
            Change::Delete(token) => {
                if !active.remove(token) {
                    panic!(
                        "{}",
                        SetError::InvalidPrecondition {
                            detail: format!("Delete for inactive token {token:?}"),
                        }
                    );
                }
            }
        }
    }
}

impl<T: Clone + Send + 'static> Subscribable<T> for Publisher<T> {
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<T>>) -> Subscription {
        self.attach(observer).keeping(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    fn collect() -> (
        Box<dyn SetObserver<i32>>,
        mpsc::Receiver<Batch<i32>>,
    ) {
        let (tx, rx) = mpsc::channel();
        let observer = crate::observer::FnObserver(move |batch: &[Change<i32>]| {
            let _ = tx.send(batch.to_vec());
        });
        (Box::new(observer), rx)
    }

    #[test]
    fn replays_membership_on_attach() {
        let publisher = Publisher::new();
        let token = Token::mint();
        publisher.emit(vec![Change::Add(token, 5)]);

        let (observer, rx) = collect();
        let _sub = publisher.attach(observer);
        assert_eq!(rx.try_recv().unwrap(), vec![Change::Add(token, 5)]);
    }

    #[test]
    fn empty_replay_is_elided() {
        let publisher: Publisher<i32> = Publisher::new();
        let (observer, rx) = collect();
        let _sub = publisher.attach(observer);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fans_out_to_every_observer() {
        let publisher = Publisher::new();
        let (first, first_rx) = collect();
        let (second, second_rx) = collect();
        let _a = publisher.attach(first);
        let _b = publisher.attach(second);

        let token = Token::mint();
        publisher.emit(vec![Change::Add(token, 1)]);
        assert_eq!(first_rx.try_recv().unwrap(), vec![Change::Add(token, 1)]);
        assert_eq!(second_rx.try_recv().unwrap(), vec![Change::Add(token, 1)]);
    }

    #[test]
    fn disposed_observer_stops_receiving() {
        let publisher = Publisher::new();
        let (observer, rx) = collect();
        let sub = publisher.attach(observer);
        sub.dispose();

        publisher.emit(vec![Change::Add(Token::mint(), 1)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fail_drains_then_errors() {
        let publisher = Publisher::new();
        let token = Token::mint();
        publisher.emit(vec![Change::Add(token, 3)]);

        let (observer, rx) = collect();
        let _sub = publisher.attach(observer);
        let _replay = rx.try_recv().unwrap();

        let payload: crate::error::UpstreamError =
            Arc::new(std::io::Error::other("feed died"));
        publisher.fail(SetError::upstream(&payload));

        assert_eq!(rx.try_recv().unwrap(), vec![Change::Delete(token)]);
        assert!(publisher.members().is_empty());
    }

    #[test]
    fn late_subscriber_sees_same_membership() {
        let publisher = Publisher::new();
        let early_token = Token::mint();
        publisher.emit(vec![Change::Add(early_token, 1)]);
        publisher.emit(vec![Change::Update(early_token, 2)]);

        let (observer, rx) = collect();
        let _sub = publisher.attach(observer);
        assert_eq!(rx.try_recv().unwrap(), vec![Change::Add(early_token, 2)]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lifetime contract violated")]
    fn double_add_aborts() {
        let publisher = Publisher::new();
        let token = Token::mint();
        publisher.emit(vec![Change::Add(token, 1)]);
        publisher.emit(vec![Change::Add(token, 2)]);
    }
}
