use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::SetError;
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::op::relay;
use crate::publisher::Publisher;

impl<L: Clone + Send + 'static> SetHandle<L> {
    /// Inner-join this set against another by key, many-to-many.
    ///
    /// Every (left, right) pair whose keys match produces one downstream
    /// lifetime carrying `project(left, right)`. The pair's token is minted
    /// when the match forms and retired when either side leaves or changes
    /// key; an item that changes key tears down its old pairs and forms new
    /// ones in the same batch. A key-preserving update on either side updates
    /// every affected pair.
    ///
    /// The relative order of pair changes fanned out across one key bucket
    /// within a single batch is unspecified.
    pub fn join<R, K, O, LK, RK, P>(
        &self,
        right: &SetHandle<R>,
        left_key: LK,
        right_key: RK,
        project: P,
    ) -> SetHandle<O>
    where
        R: Clone + Send + 'static,
        K: Eq + Hash + Clone + Send + 'static,
        O: Clone + Send + 'static,
        LK: Fn(&L) -> K + Send + Sync + 'static,
        RK: Fn(&R) -> K + Send + Sync + 'static,
        P: Fn(&L, &R) -> O + Send + Sync + 'static,
    {
        let node = Arc::new(JoinNode {
            state: Mutex::new(JoinState {
                left: Side::new(),
                right: Side::new(),
                pairs: HashMap::new(),
            }),
            output: Publisher::new(),
            left_key,
            right_key,
            project,
            inputs: Mutex::new(Vec::new()),
        });
        let left_sub = self.subscribe(relay(
            &node,
            JoinNode::left_batch,
            JoinNode::input_error,
            JoinNode::input_complete,
        ));
        let right_sub = right.subscribe(relay(
            &node,
            JoinNode::right_batch,
            JoinNode::input_error,
            JoinNode::input_complete,
        ));
        *node.inputs.lock() = vec![left_sub, right_sub];
        SetHandle::from_node(node)
    }
}

/// One side's index: rows by token, and token buckets by key.
pub(crate) struct Side<T, K> {
    pub(crate) rows: HashMap<Token, (K, T)>,
    pub(crate) buckets: HashMap<K, HashSet<Token>>,
}

impl<T, K: Eq + Hash + Clone> Side<T, K> {
    pub(crate) fn new() -> Side<T, K> {
        Side {
            rows: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, token: Token, key: K, value: T) {
        self.buckets.entry(key.clone()).or_default().insert(token);
        self.rows.insert(token, (key, value));
    }

    /// Remove a row, cleaning up its bucket. Returns the row it carried.
    pub(crate) fn remove(&mut self, token: Token) -> (K, T) {
        let (key, value) = self
            .rows
            .remove(&token)
            .unwrap_or_else(|| panic!("join input referenced unknown token {token:?}"));
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(&token);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        (key, value)
    }

    /// Tokens currently filed under `key`.
    pub(crate) fn matches(&self, key: &K) -> Vec<Token> {
        self.buckets
            .get(key)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn value(&self, token: Token) -> &T {
        &self.rows[&token].1
    }

    pub(crate) fn key_of(&self, token: Token) -> &K {
        &self.rows[&token].0
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.buckets.clear();
    }
}

struct JoinState<L, R, K> {
    left: Side<L, K>,
    right: Side<R, K>,
    /// (left token, right token) -> downstream token, minted per match.
    pairs: HashMap<(Token, Token), Token>,
}

struct JoinNode<L, R, K, O, LK, RK, P> {
    state: Mutex<JoinState<L, R, K>>,
    output: Publisher<O>,
    left_key: LK,
    right_key: RK,
    project: P,
    inputs: Mutex<Vec<Subscription>>,
}

impl<L, R, K, O, LK, RK, P> JoinNode<L, R, K, O, LK, RK, P>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    O: Clone + Send + 'static,
    LK: Fn(&L) -> K + Send + Sync + 'static,
    RK: Fn(&R) -> K + Send + Sync + 'static,
    P: Fn(&L, &R) -> O + Send + Sync + 'static,
{
    fn left_batch(&self, batch: &[Change<L>]) {
        let mut state = self.state.lock();
        let mut out: Batch<O> = Vec::new();
        for change in batch {
            match change {
                Change::Add(token, value) => {
                    let key = (self.left_key)(value);
                    self.left_enter(&mut state, *token, key, value, &mut out);
                }
                Change::Update(token, value) => {
                    let key = (self.left_key)(value);
                    if *state.left.key_of(*token) == key {
                        state.left.rows.insert(*token, (key.clone(), value.clone()));
                        for right_token in state.right.matches(&key) {
                            let down = state.pairs[&(*token, right_token)];
                            let projected = (self.project)(value, state.right.value(right_token));
                            out.push(Change::Update(down, projected));
                        }
                    } else {
                        self.left_leave(&mut state, *token, &mut out);
                        self.left_enter(&mut state, *token, key, value, &mut out);
                    }
                }
                Change::Delete(token) => {
                    self.left_leave(&mut state, *token, &mut out);
                }
            }
        }
        drop(state);
        self.output.emit(out);
    }

    fn right_batch(&self, batch: &[Change<R>]) {
        let mut state = self.state.lock();
        let mut out: Batch<O> = Vec::new();
        for change in batch {
            match change {
                Change::Add(token, value) => {
                    let key = (self.right_key)(value);
                    self.right_enter(&mut state, *token, key, value, &mut out);
                }
                Change::Update(token, value) => {
                    let key = (self.right_key)(value);
                    if *state.right.key_of(*token) == key {
                        state
                            .right
                            .rows
                            .insert(*token, (key.clone(), value.clone()));
                        for left_token in state.left.matches(&key) {
                            let down = state.pairs[&(left_token, *token)];
                            let projected = (self.project)(state.left.value(left_token), value);
                            out.push(Change::Update(down, projected));
                        }
                    } else {
                        self.right_leave(&mut state, *token, &mut out);
                        self.right_enter(&mut state, *token, key, value, &mut out);
                    }
                }
                Change::Delete(token) => {
                    self.right_leave(&mut state, *token, &mut out);
                }
            }
        }
        drop(state);
        self.output.emit(out);
    }

    fn left_enter(
        &self,
        state: &mut JoinState<L, R, K>,
        token: Token,
        key: K,
        value: &L,
        out: &mut Batch<O>,
    ) {
        for right_token in state.right.matches(&key) {
            let down = Token::mint();
            state.pairs.insert((token, right_token), down);
            let projected = (self.project)(value, state.right.value(right_token));
            out.push(Change::Add(down, projected));
        }
        state.left.insert(token, key, value.clone());
    }

    fn left_leave(&self, state: &mut JoinState<L, R, K>, token: Token, out: &mut Batch<O>) {
        let (key, _) = state.left.remove(token);
        for right_token in state.right.matches(&key) {
            if let Some(down) = state.pairs.remove(&(token, right_token)) {
                out.push(Change::Delete(down));
            }
        }
    }

    fn right_enter(
        &self,
        state: &mut JoinState<L, R, K>,
        token: Token,
        key: K,
        value: &R,
        out: &mut Batch<O>,
    ) {
        for left_token in state.left.matches(&key) {
            let down = Token::mint();
            state.pairs.insert((left_token, token), down);
            let projected = (self.project)(state.left.value(left_token), value);
            out.push(Change::Add(down, projected));
        }
        state.right.insert(token, key, value.clone());
    }

    fn right_leave(&self, state: &mut JoinState<L, R, K>, token: Token, out: &mut Batch<O>) {
        let (key, _) = state.right.remove(token);
        for left_token in state.left.matches(&key) {
            if let Some(down) = state.pairs.remove(&(left_token, token)) {
                out.push(Change::Delete(down));
            }
        }
    }

    fn input_error(&self, error: &Arc<SetError>) {
        {
            let mut state = self.state.lock();
            state.left.clear();
            state.right.clear();
            state.pairs.clear();
        }
        self.inputs.lock().clear();
        self.output.fail(Arc::clone(error));
    }

    fn input_complete(&self) {
        self.output.complete();
    }
}

impl<L, R, K, O, LK, RK, P> Subscribable<O> for JoinNode<L, R, K, O, LK, RK, P>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    O: Clone + Send + 'static,
    LK: Fn(&L) -> K + Send + Sync + 'static,
    RK: Fn(&R) -> K + Send + Sync + 'static,
    P: Fn(&L, &R) -> O + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<O>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}
