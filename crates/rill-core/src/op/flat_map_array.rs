use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::SetError;
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::op::relay;
use crate::publisher::Publisher;

impl<T: Clone + Send + 'static> SetHandle<T> {
    /// Flatten a keyed array computed from each item into a single set.
    ///
    /// `arr_fn` derives the children of an item, `child_key` identifies them
    /// across recomputations. On a parent update the new array is diffed
    /// against the old one by child key: children present in both keep their
    /// downstream lifetime and emit an `Update` only when the value changed;
    /// the rest are added or deleted. Duplicate child keys within one array
    /// collapse, the later entry winning.
    pub fn flat_map_array<U, KU, F, G>(&self, arr_fn: F, child_key: G) -> SetHandle<U>
    where
        U: Clone + PartialEq + Send + 'static,
        KU: Eq + Hash + Clone + Send + 'static,
        F: Fn(&T) -> Vec<U> + Send + Sync + 'static,
        G: Fn(&U) -> KU + Send + Sync + 'static,
    {
        let node = Arc::new(FlatMapArrayNode {
            state: Mutex::new(HashMap::new()),
            output: Publisher::new(),
            arr_fn,
            child_key,
            upstream: Mutex::new(None),
            _marker: std::marker::PhantomData,
        });
        let sub = self.subscribe(relay(
            &node,
            FlatMapArrayNode::upstream_batch,
            FlatMapArrayNode::upstream_error,
            FlatMapArrayNode::upstream_complete,
        ));
        *node.upstream.lock() = Some(sub);
        SetHandle::from_node(node)
    }
}

struct FlatMapArrayNode<T, U, KU, F, G> {
    /// parent token -> child key -> (downstream token, last value).
    state: Mutex<HashMap<Token, HashMap<KU, (Token, U)>>>,
    output: Publisher<U>,
    arr_fn: F,
    child_key: G,
    upstream: Mutex<Option<Subscription>>,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, U, KU, F, G> FlatMapArrayNode<T, U, KU, F, G>
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
    KU: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> Vec<U> + Send + Sync + 'static,
    G: Fn(&U) -> KU + Send + Sync + 'static,
{
    /// Evaluate the array and collapse duplicate child keys, later wins.
    fn keyed(&self, value: &T) -> HashMap<KU, U> {
        let mut keyed = HashMap::new();
        for child in (self.arr_fn)(value) {
            keyed.insert((self.child_key)(&child), child);
        }
        keyed
    }

    fn upstream_batch(&self, batch: &[Change<T>]) {
        let mut out: Batch<U> = Vec::new();
        {
            let mut state = self.state.lock();
            for change in batch {
                match change {
                    Change::Add(token, value) => {
                        let mut children = HashMap::new();
                        for (key, child) in self.keyed(value) {
                            let down = Token::mint();
                            out.push(Change::Add(down, child.clone()));
                            children.insert(key, (down, child));
                        }
                        state.insert(*token, children);
                    }
                    Change::Update(token, value) => {
                        let mut old = state
                            .remove(token)
                            .unwrap_or_else(|| panic!("unknown parent token {token:?}"));
                        let mut children = HashMap::new();
                        for (key, child) in self.keyed(value) {
                            match old.remove(&key) {
                                Some((down, previous)) => {
                                    if previous != child {
                                        out.push(Change::Update(down, child.clone()));
                                    }
                                    children.insert(key, (down, child));
                                }
                                None => {
                                    let down = Token::mint();
                                    out.push(Change::Add(down, child.clone()));
                                    children.insert(key, (down, child));
                                }
                            }
                        }
                        for (down, _) in old.into_values() {
                            out.push(Change::Delete(down));
                        }
                        state.insert(*token, children);
                    }
                    Change::Delete(token) => {
                        let old = state
                            .remove(token)
                            .unwrap_or_else(|| panic!("unknown parent token {token:?}"));
                        for (down, _) in old.into_values() {
                            out.push(Change::Delete(down));
                        }
                    }
                }
            }
        }
        self.output.emit(out);
    }

    fn upstream_error(&self, error: &Arc<SetError>) {
        self.state.lock().clear();
        self.output.fail(Arc::clone(error));
    }

    fn upstream_complete(&self) {
        self.output.complete();
    }
}

impl<T, U, KU, F, G> Subscribable<U> for FlatMapArrayNode<T, U, KU, F, G>
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
    KU: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> Vec<U> + Send + Sync + 'static,
    G: Fn(&U) -> KU + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<U>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}
