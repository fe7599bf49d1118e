use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::SetError;
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::op::relay;
use crate::publisher::Publisher;

impl<T: Clone + Send + 'static> SetHandle<T> {
    /// Flatten one reactive child set per item into a single set.
    ///
    /// Every upstream item designates a child set through `child_fn`; the
    /// operator subscribes to it and forwards its members under freshly
    /// minted downstream lifetimes. When the parent item updates, the old
    /// child subscription is replaced and the new child's replay is diffed
    /// against the old contribution: child lifetimes present in both keep
    /// their downstream token (emitting an `Update` only if the value
    /// changed), the rest are added or deleted. Deleting the parent retires
    /// the whole contribution.
    pub fn flat_map_set<U, F>(&self, child_fn: F) -> SetHandle<U>
    where
        U: Clone + PartialEq + Send + 'static,
        F: Fn(&T) -> SetHandle<U> + Send + Sync + 'static,
    {
        let node = Arc::new_cyclic(|this| FlatMapNode {
            this: this.clone(),
            state: Mutex::new(HashMap::new()),
            output: Publisher::new(),
            child_fn,
            upstream: Mutex::new(None),
            _marker: PhantomData,
        });
        let sub = self.subscribe(relay(
            &node,
            FlatMapNode::<T, U, F>::upstream_batch,
            FlatMapNode::<T, U, F>::upstream_error,
            FlatMapNode::<T, U, F>::upstream_complete,
        ));
        *node.upstream.lock() = Some(sub);
        SetHandle::from_node(node)
    }
}

/// One parent's contribution: its child subscription and the translation
/// from child tokens to downstream tokens plus the last forwarded value.
struct ParentEntry<U> {
    sub: Subscription,
    forwarded: HashMap<Token, (Token, U)>,
}

struct FlatMapNode<T, U, F> {
    this: Weak<FlatMapNode<T, U, F>>,
    state: Mutex<HashMap<Token, ParentEntry<U>>>,
    output: Publisher<U>,
    child_fn: F,
    upstream: Mutex<Option<Subscription>>,
    _marker: PhantomData<fn() -> T>,
}

/// Buffer shared with a child observer while its subscription is being set
/// up: the replay delivered during `subscribe` is captured here instead of
/// re-entering the node, then the observer goes live.
struct Staging<U> {
    capture: Option<Batch<U>>,
    failed: Option<Arc<SetError>>,
}

struct ChildObserver<T, U, F> {
    node: Weak<FlatMapNode<T, U, F>>,
    parent: Token,
    staging: Arc<Mutex<Staging<U>>>,
}

impl<T, U, F> SetObserver<U> for ChildObserver<T, U, F>
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
    F: Fn(&T) -> SetHandle<U> + Send + Sync + 'static,
{
    fn on_batch(&mut self, batch: &[Change<U>]) {
        {
            let mut staging = self.staging.lock();
            if let Some(capture) = staging.capture.as_mut() {
                capture.extend_from_slice(batch);
                return;
            }
        }
        if let Some(node) = self.node.upgrade() {
            node.child_batch(self.parent, batch);
        }
    }

    fn on_error(&mut self, error: &Arc<SetError>) {
        {
            let mut staging = self.staging.lock();
            if staging.capture.is_some() {
                staging.failed = Some(Arc::clone(error));
                return;
            }
        }
        if let Some(node) = self.node.upgrade() {
            node.child_error(error);
        }
    }
}

impl<T, U, F> FlatMapNode<T, U, F>
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
    F: Fn(&T) -> SetHandle<U> + Send + Sync + 'static,
{
    /// Subscribe to a child, capturing its replay without re-entering the
    /// node state. Returns the subscription, the captured replay, and the
    /// child's failure if it terminated during setup.
    fn open_child(
        &self,
        parent: Token,
        child: &SetHandle<U>,
    ) -> (Subscription, Batch<U>, Option<Arc<SetError>>) {
        let staging = Arc::new(Mutex::new(Staging {
            capture: Some(Vec::new()),
            failed: None,
        }));
        let sub = child.subscribe(ChildObserver::<T, U, F> {
            node: self.this.clone(),
            parent,
            staging: Arc::clone(&staging),
        });
        let mut staging = staging.lock();
        let replay = staging.capture.take().unwrap_or_default();
        (sub, replay, staging.failed.take())
    }

    fn upstream_batch(&self, batch: &[Change<T>]) {
        let mut out: Batch<U> = Vec::new();
        let mut child_failure: Option<Arc<SetError>> = None;
        {
            let mut state = self.state.lock();
            for change in batch {
                match change {
                    Change::Add(token, value) => {
                        let child = (self.child_fn)(value);
                        let (sub, replay, failed) = self.open_child(*token, &child);
                        let mut forwarded = HashMap::new();
                        translate(&mut forwarded, &replay, &mut out);
                        state.insert(*token, ParentEntry { sub, forwarded });
                        child_failure = child_failure.or(failed);
                    }
                    Change::Update(token, value) => {
                        let old = state
                            .remove(token)
                            .unwrap_or_else(|| panic!("unknown parent token {token:?}"));
                        drop(old.sub);
                        let mut old_forwarded = old.forwarded;

                        let child = (self.child_fn)(value);
                        let (sub, replay, failed) = self.open_child(*token, &child);
                        let mut forwarded = HashMap::new();
                        for change in &replay {
                            match change {
                                Change::Add(child_token, value) => {
                                    match old_forwarded.remove(child_token) {
                                        Some((down, previous)) => {
                                            if previous != *value {
                                                out.push(Change::Update(down, value.clone()));
                                            }
                                            forwarded.insert(*child_token, (down, value.clone()));
                                        }
                                        None => {
                                            let down = Token::mint();
                                            forwarded.insert(*child_token, (down, value.clone()));
                                            out.push(Change::Add(down, value.clone()));
                                        }
                                    }
                                }
                                // A replay is all Adds unless the child
                                // failed during setup and drained itself.
                                other => translate(
                                    &mut forwarded,
                                    std::slice::from_ref(other),
                                    &mut out,
                                ),
                            }
                        }
                        for (down, _) in old_forwarded.into_values() {
                            out.push(Change::Delete(down));
                        }
                        state.insert(*token, ParentEntry { sub, forwarded });
                        child_failure = child_failure.or(failed);
                    }
                    Change::Delete(token) => {
                        let old = state
                            .remove(token)
                            .unwrap_or_else(|| panic!("unknown parent token {token:?}"));
                        for (down, _) in old.forwarded.into_values() {
                            out.push(Change::Delete(down));
                        }
                    }
                }
            }
        }
        self.output.emit(out);
        if let Some(error) = child_failure {
            self.child_error(&error);
        }
    }

    fn child_batch(&self, parent: Token, batch: &[Change<U>]) {
        let mut out: Batch<U> = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(entry) = state.get_mut(&parent) else {
                return;
            };
            translate(&mut entry.forwarded, batch, &mut out);
        }
        self.output.emit(out);
    }

    /// A child stream failing takes the flattened set down with it, like any
    /// other input of a multi-input operator: the remaining child
    /// subscriptions and the upstream subscription are disposed.
    fn child_error(&self, error: &Arc<SetError>) {
        self.state.lock().clear();
        self.upstream.lock().take();
        self.output.fail(Arc::clone(error));
    }

    fn upstream_error(&self, error: &Arc<SetError>) {
        self.state.lock().clear();
        self.output.fail(Arc::clone(error));
    }

    fn upstream_complete(&self) {
        self.output.complete();
    }
}

/// Apply child changes to a parent's forwarded map, minting and retiring
/// downstream tokens.
fn translate<U: Clone>(
    forwarded: &mut HashMap<Token, (Token, U)>,
    batch: &[Change<U>],
    out: &mut Batch<U>,
) {
    for change in batch {
        match change {
            Change::Add(child_token, value) => {
                let down = Token::mint();
                forwarded.insert(*child_token, (down, value.clone()));
                out.push(Change::Add(down, value.clone()));
            }
            Change::Update(child_token, value) => {
                let entry = forwarded
                    .get_mut(child_token)
                    .unwrap_or_else(|| panic!("unknown child token {child_token:?}"));
                entry.1 = value.clone();
                out.push(Change::Update(entry.0, value.clone()));
            }
            Change::Delete(child_token) => {
                let (down, _) = forwarded
                    .remove(child_token)
                    .unwrap_or_else(|| panic!("unknown child token {child_token:?}"));
                out.push(Change::Delete(down));
            }
        }
    }
}

impl<T, U, F> Subscribable<U> for FlatMapNode<T, U, F>
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
    F: Fn(&T) -> SetHandle<U> + Send + Sync + 'static,
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

    #[derive(Clone)]
    struct Team {
        id: u32,
        roster: SetHandle<&'static str>,
    }

    fn team(id: u32, roster: &SetHandle<&'static str>) -> Team {
        Team {
            id,
            roster: roster.clone(),
        }
    }

    fn names() -> MutableSet<&'static str, &'static str, impl Fn(&&'static str) -> &'static str> {
        MutableSet::new(|name: &&'static str| *name)
    }

    #[test]
    fn forwards_child_membership_under_fresh_tokens() {
        let roster = names();
        let teams = MutableSet::new(|t: &Team| t.id);
        let flattened = teams.handle().flat_map_set(|t| t.roster.clone());
        let probe = Probe::attach(&flattened);

        roster.insert("alice").unwrap();
        teams.insert(team(1, &roster.handle())).unwrap();
        assert_eq!(probe.values_sorted(), vec!["alice"]);

        roster.insert("bob").unwrap();
        assert_eq!(probe.values_sorted(), vec!["alice", "bob"]);

        roster.remove(&"alice").unwrap();
        assert_eq!(probe.values_sorted(), vec!["bob"]);

        // Downstream tokens are the operator's own, not the child's.
        let child_probe = Probe::attach(&roster.handle());
        assert!(probe.live_tokens().is_disjoint(&child_probe.live_tokens()));
    }

    #[test]
    fn parent_update_to_the_same_child_is_silent() {
        let roster = names();
        roster.insert("alice").unwrap();
        let teams = MutableSet::new(|t: &Team| t.id);
        let flattened = teams.handle().flat_map_set(|t| t.roster.clone());
        let probe = Probe::attach(&flattened);

        teams.insert(team(1, &roster.handle())).unwrap();
        let tokens_before = probe.live_tokens();
        assert_eq!(probe.batch_count(), 1);

        teams.update(team(1, &roster.handle())).unwrap();
        assert_eq!(probe.live_tokens(), tokens_before);
        assert_eq!(probe.batch_count(), 1);
    }

    #[test]
    fn parent_update_diffs_old_and_new_children() {
        let red = names();
        red.insert("alice").unwrap();
        let blue = names();
        blue.insert("carol").unwrap();

        let teams = MutableSet::new(|t: &Team| t.id);
        let flattened = teams.handle().flat_map_set(|t| t.roster.clone());
        let probe = Probe::attach(&flattened);

        teams.insert(team(1, &red.handle())).unwrap();
        assert_eq!(probe.values_sorted(), vec!["alice"]);

        probe.take_batches();
        teams.update(team(1, &blue.handle())).unwrap();

        let batches = probe.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(probe.values_sorted(), vec!["carol"]);

        // Live child changes now flow from the new roster only.
        blue.insert("dave").unwrap();
        red.insert("mallory").unwrap();
        assert_eq!(probe.values_sorted(), vec!["carol", "dave"]);
    }

    #[test]
    fn parent_delete_retires_the_contribution() {
        let roster = names();
        roster.insert("alice").unwrap();
        roster.insert("bob").unwrap();
        let teams = MutableSet::new(|t: &Team| t.id);
        let flattened = teams.handle().flat_map_set(|t| t.roster.clone());
        let probe = Probe::attach(&flattened);

        teams.insert(team(1, &roster.handle())).unwrap();
        assert_eq!(probe.len(), 2);

        teams.remove(&1).unwrap();
        assert!(probe.is_empty());
        let last = probe.last_batch();
        assert_eq!(last.len(), 2);
        assert!(last.iter().all(|c| matches!(c, Change::Delete(_))));
    }

    #[test]
    fn grouping_then_flattening_reproduces_membership() {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
        struct Employee {
            id: u32,
            dept: &'static str,
        }
        let emp = |id, dept| Employee { id, dept };

        let source = MutableSet::new(|e: &Employee| e.id);
        let regrouped = source
            .handle()
            .group_by(|e| e.dept)
            .flat_map_set(|group| group.clone());
        let probe = Probe::attach(&regrouped);

        source.insert(emp(1, "Eng")).unwrap();
        source.insert(emp(2, "Eng")).unwrap();
        source.insert(emp(3, "Sales")).unwrap();
        assert_eq!(
            probe.values_sorted(),
            vec![emp(1, "Eng"), emp(2, "Eng"), emp(3, "Sales")]
        );

        source.update(emp(1, "Sales")).unwrap();
        assert_eq!(
            probe.values_sorted(),
            vec![emp(1, "Sales"), emp(2, "Eng"), emp(3, "Sales")]
        );

        source.remove(&2).unwrap();
        assert_eq!(
            probe.values_sorted(),
            vec![emp(1, "Sales"), emp(3, "Sales")]
        );
    }
}
