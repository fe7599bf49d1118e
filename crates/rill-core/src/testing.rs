//! Headless test support: record what a reactive set emits and check the
//! lifetime contract while doing so.
//!
//! A [`Probe`] is an observer you can attach to any [`SetHandle`] in a plain
//! `#[test]` function. It stores every batch, tracks membership, and asserts
//! on each delivery that the stream is well-formed (one `Add` per token,
//! `Update`/`Delete` only while active, no empty batches), so any test that
//! goes through a probe verifies stream integrity for free.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::SetError;
use crate::handle::{SetHandle, Subscription};
use crate::observer::SetObserver;

/// A recording observer for tests.
///
/// # Examples
///
/// ```
/// use rill_core::{constant, testing::Probe};
///
/// let set = constant(vec![1, 2, 3]);
/// let probe = Probe::attach(&set);
/// assert_eq!(probe.values_sorted(), vec![1, 2, 3]);
/// ```
pub struct Probe<T> {
    state: Arc<Mutex<ProbeState<T>>>,
    _sub: Subscription,
}

struct ProbeState<T> {
    batches: Vec<Batch<T>>,
    live: HashMap<Token, T>,
    seen: HashSet<Token>,
    error: Option<Arc<SetError>>,
    completed: bool,
}

struct ProbeObserver<T> {
    state: Arc<Mutex<ProbeState<T>>>,
}

impl<T: Clone + Send> SetObserver<T> for ProbeObserver<T> {
    fn on_batch(&mut self, batch: &[Change<T>]) {
        let mut state = self.state.lock();
        assert!(!batch.is_empty(), "empty batch delivered");
        assert!(
            state.error.is_none() && !state.completed,
            "batch delivered after termination"
        );
        for change in batch {
            match change {
                Change::Add(token, value) => {
                    assert!(
                        state.seen.insert(*token),
                        "second Add for token {token:?}"
                    );
                    state.live.insert(*token, value.clone());
                }
                Change::Update(token, value) => {
                    assert!(
                        state.live.contains_key(token),
                        "Update for inactive token {token:?}"
                    );
                    state.live.insert(*token, value.clone());
                }
                Change::Delete(token) => {
                    assert!(
                        state.live.remove(token).is_some(),
                        "Delete for inactive token {token:?}"
                    );
                }
            }
        }
        state.batches.push(batch.to_vec());
    }

    fn on_error(&mut self, error: &Arc<SetError>) {
        let mut state = self.state.lock();
        assert!(
            state.live.is_empty(),
            "stream errored while lifetimes were still active"
        );
        state.error = Some(Arc::clone(error));
    }

    fn on_complete(&mut self) {
        self.state.lock().completed = true;
    }
}

impl<T: Clone + Send + 'static> Probe<T> {
    /// Subscribe a fresh probe to `handle`.
    ///
    /// The probe's recorded history starts with the replay batch, if the set
    /// was non-empty at attach time.
    pub fn attach(handle: &SetHandle<T>) -> Probe<T> {
        let state = Arc::new(Mutex::new(ProbeState {
            batches: Vec::new(),
            live: HashMap::new(),
            seen: HashSet::new(),
            error: None,
            completed: false,
        }));
        let sub = handle.subscribe(ProbeObserver {
            state: Arc::clone(&state),
        });
        Probe { state, _sub: sub }
    }

    /// Every batch received so far, in delivery order.
    pub fn batches(&self) -> Vec<Batch<T>> {
        self.state.lock().batches.clone()
    }

    /// Number of batches received so far.
    pub fn batch_count(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// The most recent batch. Panics if nothing arrived yet.
    pub fn last_batch(&self) -> Batch<T> {
        self.state
            .lock()
            .batches
            .last()
            .cloned()
            .expect("no batch received")
    }

    /// Drain the recorded batches, so the next assertion starts fresh.
    pub fn take_batches(&self) -> Vec<Batch<T>> {
        std::mem::take(&mut self.state.lock().batches)
    }

    /// Tokens of the currently active lifetimes.
    pub fn live_tokens(&self) -> HashSet<Token> {
        self.state.lock().live.keys().copied().collect()
    }

    /// Number of currently active lifetimes.
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Whether no lifetime is currently active.
    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// The value carried by `token`, if it is active.
    pub fn value_of(&self, token: Token) -> Option<T> {
        self.state.lock().live.get(&token).cloned()
    }

    /// The terminal error, if the stream failed.
    pub fn error(&self) -> Option<Arc<SetError>> {
        self.state.lock().error.clone()
    }

    /// Whether the stream completed normally.
    pub fn completed(&self) -> bool {
        self.state.lock().completed
    }
}

impl<T: Clone + Send + Ord + 'static> Probe<T> {
    /// Current membership values, sorted for stable assertions.
    pub fn values_sorted(&self) -> Vec<T> {
        let mut values: Vec<T> = self.state.lock().live.values().cloned().collect();
        values.sort();
        values
    }
}

impl<T: Clone + Send + 'static> Probe<T> {
    /// Current membership values, sorted by a key for stable assertions.
    pub fn values_sorted_by<K: Ord>(&self, key: impl Fn(&T) -> K) -> Vec<T> {
        let mut values: Vec<T> = self.state.lock().live.values().cloned().collect();
        values.sort_by_key(|value| key(value));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_observer() -> (ProbeObserver<i32>, Arc<Mutex<ProbeState<i32>>>) {
        let state = Arc::new(Mutex::new(ProbeState {
            batches: Vec::new(),
            live: HashMap::new(),
            seen: HashSet::new(),
            error: None,
            completed: false,
        }));
        (
            ProbeObserver {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    #[test]
    fn tracks_membership_through_batches() {
        let (mut observer, state) = probe_observer();
        let token = Token::mint();
        observer.on_batch(&[Change::Add(token, 1)]);
        observer.on_batch(&[Change::Update(token, 2)]);
        assert_eq!(state.lock().live.get(&token), Some(&2));
        observer.on_batch(&[Change::Delete(token)]);
        assert!(state.lock().live.is_empty());
    }

    #[test]
    #[should_panic(expected = "second Add")]
    fn rejects_double_add() {
        let (mut observer, _state) = probe_observer();
        let token = Token::mint();
        observer.on_batch(&[Change::Add(token, 1)]);
        observer.on_batch(&[Change::Add(token, 2)]);
    }

    #[test]
    #[should_panic(expected = "Update for inactive token")]
    fn rejects_update_before_add() {
        let (mut observer, _state) = probe_observer();
        observer.on_batch(&[Change::Update(Token::mint(), 1)]);
    }

    #[test]
    #[should_panic(expected = "Delete for inactive token")]
    fn rejects_delete_after_delete() {
        let (mut observer, _state) = probe_observer();
        let token = Token::mint();
        observer.on_batch(&[Change::Add(token, 1)]);
        observer.on_batch(&[Change::Delete(token)]);
        observer.on_batch(&[Change::Delete(token)]);
    }
}
