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
    /// Partition the set by key into a reactive set of reactive sets.
    ///
    /// The outer set holds one child set per key with at least one member; a
    /// child replays its members to late subscribers and re-emits upstream
    /// tokens (grouping partitions the stream, it does not rename it). A
    /// group is added when its first member arrives and deleted in the same
    /// outer batch whose processing drained it; a key that empties and later
    /// refills gets a fresh group lifetime and child set.
    pub fn group_by<K, F>(&self, key_fn: F) -> SetHandle<SetHandle<T>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let node = Arc::new(GroupNode {
            state: Mutex::new(GroupState {
                groups: HashMap::new(),
                member_key: HashMap::new(),
            }),
            output: Publisher::new(),
            key_fn,
            upstream: Mutex::new(None),
        });
        let sub = self.subscribe(relay(
            &node,
            GroupNode::upstream_batch,
            GroupNode::upstream_error,
            GroupNode::upstream_complete,
        ));
        *node.upstream.lock() = Some(sub);
        SetHandle::from_node(node)
    }
}

struct Group<T> {
    token: Token,
    child: Arc<Publisher<T>>,
    members: usize,
}

struct GroupState<T, K> {
    groups: HashMap<K, Group<T>>,
    member_key: HashMap<Token, K>,
}

struct GroupNode<T, K, F> {
    state: Mutex<GroupState<T, K>>,
    output: Publisher<SetHandle<T>>,
    key_fn: F,
    upstream: Mutex<Option<Subscription>>,
}

/// Changes staged for one child set during a batch, keyed by publisher
/// identity: a key that empties and refills within the batch produces two
/// distinct children.
struct PendingChildren<T> {
    slots: Vec<(Arc<Publisher<T>>, Batch<T>)>,
}

impl<T> PendingChildren<T> {
    fn new() -> PendingChildren<T> {
        PendingChildren { slots: Vec::new() }
    }

    fn push(&mut self, child: &Arc<Publisher<T>>, change: Change<T>) {
        if let Some((_, batch)) = self
            .slots
            .iter_mut()
            .find(|(existing, _)| Arc::ptr_eq(existing, child))
        {
            batch.push(change);
        } else {
            self.slots.push((Arc::clone(child), vec![change]));
        }
    }
}

impl<T, K, F> GroupNode<T, K, F>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn upstream_batch(&self, batch: &[Change<T>]) {
        let mut pending = PendingChildren::new();
        let mut outer: Batch<SetHandle<T>> = Vec::new();
        {
            let mut state = self.state.lock();
            for change in batch {
                match change {
                    Change::Add(token, value) => {
                        let key = (self.key_fn)(value);
                        self.enter(&mut state, &mut pending, &mut outer, *token, key, value);
                    }
                    Change::Update(token, value) => {
                        let key = (self.key_fn)(value);
                        let old_key = state.member_key[token].clone();
                        if old_key == key {
                            let group = &state.groups[&key];
                            pending.push(&group.child, Change::Update(*token, value.clone()));
                        } else {
                            self.leave(&mut state, &mut pending, &mut outer, *token, &old_key);
                            self.enter(&mut state, &mut pending, &mut outer, *token, key, value);
                        }
                    }
                    Change::Delete(token) => {
                        let old_key = state.member_key.remove(token).unwrap_or_else(|| {
                            panic!("group input referenced unknown token {token:?}")
                        });
                        self.leave(&mut state, &mut pending, &mut outer, *token, &old_key);
                    }
                }
            }
        }
        // Children first, so a group's delete lands after its drain and a new
        // group's membership is in place before the outer Add announces it.
        for (child, changes) in pending.slots {
            child.emit(changes);
        }
        self.output.emit(outer);
    }

    fn enter(
        &self,
        state: &mut GroupState<T, K>,
        pending: &mut PendingChildren<T>,
        outer: &mut Batch<SetHandle<T>>,
        token: Token,
        key: K,
        value: &T,
    ) {
        let group = state.groups.entry(key.clone()).or_insert_with(|| {
            let child = Arc::new(Publisher::new());
            let group = Group {
                token: Token::mint(),
                child: Arc::clone(&child),
                members: 0,
            };
            outer.push(Change::Add(group.token, SetHandle::from_node(child)));
            group
        });
        group.members += 1;
        pending.push(&group.child, Change::Add(token, value.clone()));
        state.member_key.insert(token, key);
    }

    fn leave(
        &self,
        state: &mut GroupState<T, K>,
        pending: &mut PendingChildren<T>,
        outer: &mut Batch<SetHandle<T>>,
        token: Token,
        old_key: &K,
    ) {
        let group = state
            .groups
            .get_mut(old_key)
            .unwrap_or_else(|| panic!("group missing for token {token:?}"));
        group.members -= 1;
        pending.push(&group.child, Change::Delete(token));
        if group.members == 0 {
            outer.push(Change::Delete(group.token));
            state.groups.remove(old_key);
        }
    }

    fn upstream_error(&self, error: &Arc<SetError>) {
        let groups: Vec<Arc<Publisher<T>>> = {
            let mut state = self.state.lock();
            state.member_key.clear();
            state
                .groups
                .drain()
                .map(|(_, group)| group.child)
                .collect()
        };
        for child in groups {
            child.fail(Arc::clone(error));
        }
        self.output.fail(Arc::clone(error));
    }

    fn upstream_complete(&self) {
        let groups: Vec<Arc<Publisher<T>>> = {
            let state = self.state.lock();
            state
                .groups
                .values()
                .map(|group| Arc::clone(&group.child))
                .collect()
        };
        for child in groups {
            child.complete();
        }
        self.output.complete();
    }
}

impl<T, K, F> Subscribable<SetHandle<T>> for GroupNode<T, K, F>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<SetHandle<T>>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}
