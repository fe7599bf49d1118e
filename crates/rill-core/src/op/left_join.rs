use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Batch, Change, Token};
use crate::error::SetError;
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::op::join::Side;
use crate::op::relay;
use crate::publisher::Publisher;

impl<L: Clone + Send + 'static> SetHandle<L> {
    /// Left-join this set against another by key, many-to-many, with a
    /// null-right lifetime for every unmatched left.
    ///
    /// Every left item always has at least one downstream representation:
    /// one lifetime per matching right, or a single lifetime carrying
    /// `project(left, None)` while no right matches. When the first match
    /// arrives, the null-right lifetime is *reassigned* to the pair -- the
    /// downstream observes an `Update`, not a churned Delete/Add. When the
    /// last match leaves, a fresh null-right lifetime is minted.
    pub fn left_join<R, K, O, LK, RK, P>(
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
        P: Fn(&L, Option<&R>) -> O + Send + Sync + 'static,
    {
        let node = Arc::new(LeftJoinNode {
            state: Mutex::new(LeftJoinState {
                left: Side::new(),
                right: Side::new(),
                pairs: HashMap::new(),
                null_right: HashMap::new(),
            }),
            output: Publisher::new(),
            left_key,
            right_key,
            project,
            inputs: Mutex::new(Vec::new()),
        });
        let left_sub = self.subscribe(relay(
            &node,
            LeftJoinNode::left_batch,
            LeftJoinNode::input_error,
            LeftJoinNode::input_complete,
        ));
        let right_sub = right.subscribe(relay(
            &node,
            LeftJoinNode::right_batch,
            LeftJoinNode::input_error,
            LeftJoinNode::input_complete,
        ));
        *node.inputs.lock() = vec![left_sub, right_sub];
        SetHandle::from_node(node)
    }
}

struct LeftJoinState<L, R, K> {
    left: Side<L, K>,
    right: Side<R, K>,
    /// (left token, right token) -> downstream token.
    pairs: HashMap<(Token, Token), Token>,
    /// left token -> downstream token carrying `project(left, None)`.
    null_right: HashMap<Token, Token>,
}

struct LeftJoinNode<L, R, K, O, LK, RK, P> {
    state: Mutex<LeftJoinState<L, R, K>>,
    output: Publisher<O>,
    left_key: LK,
    right_key: RK,
    project: P,
    inputs: Mutex<Vec<Subscription>>,
}

impl<L, R, K, O, LK, RK, P> LeftJoinNode<L, R, K, O, LK, RK, P>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    O: Clone + Send + 'static,
    LK: Fn(&L) -> K + Send + Sync + 'static,
    RK: Fn(&R) -> K + Send + Sync + 'static,
    P: Fn(&L, Option<&R>) -> O + Send + Sync + 'static,
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
                        if let Some(down) = state.null_right.get(token) {
                            out.push(Change::Update(*down, (self.project)(value, None)));
                        } else {
                            for right_token in state.right.matches(&key) {
                                let down = state.pairs[&(*token, right_token)];
                                let projected =
                                    (self.project)(value, Some(state.right.value(right_token)));
                                out.push(Change::Update(down, projected));
                            }
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
                            let projected =
                                (self.project)(state.left.value(left_token), Some(value));
                            out.push(Change::Update(down, projected));
                        }
                    } else {
                        // Removals first: lefts losing their last match get
                        // their null-right back before any new pairs form.
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
        state: &mut LeftJoinState<L, R, K>,
        token: Token,
        key: K,
        value: &L,
        out: &mut Batch<O>,
    ) {
        let matches = state.right.matches(&key);
        if matches.is_empty() {
            let down = Token::mint();
            state.null_right.insert(token, down);
            out.push(Change::Add(down, (self.project)(value, None)));
        } else {
            for right_token in matches {
                let down = Token::mint();
                state.pairs.insert((token, right_token), down);
                let projected = (self.project)(value, Some(state.right.value(right_token)));
                out.push(Change::Add(down, projected));
            }
        }
        state.left.insert(token, key, value.clone());
    }

    fn left_leave(&self, state: &mut LeftJoinState<L, R, K>, token: Token, out: &mut Batch<O>) {
        let (key, _) = state.left.remove(token);
        for right_token in state.right.matches(&key) {
            if let Some(down) = state.pairs.remove(&(token, right_token)) {
                out.push(Change::Delete(down));
            }
        }
        if let Some(down) = state.null_right.remove(&token) {
            out.push(Change::Delete(down));
        }
    }

    fn right_enter(
        &self,
        state: &mut LeftJoinState<L, R, K>,
        token: Token,
        key: K,
        value: &R,
        out: &mut Batch<O>,
    ) {
        for left_token in state.left.matches(&key) {
            let projected = (self.project)(state.left.value(left_token), Some(value));
            if let Some(down) = state.null_right.remove(&left_token) {
                // First match for this left: reassign its null-right
                // lifetime to the pair instead of churning Delete/Add.
                state.pairs.insert((left_token, token), down);
                out.push(Change::Update(down, projected));
            } else {
                let down = Token::mint();
                state.pairs.insert((left_token, token), down);
                out.push(Change::Add(down, projected));
            }
        }
        state.right.insert(token, key, value.clone());
    }

    fn right_leave(&self, state: &mut LeftJoinState<L, R, K>, token: Token, out: &mut Batch<O>) {
        let (key, _) = state.right.remove(token);
        let orphaned = state.right.matches(&key).is_empty();
        for left_token in state.left.matches(&key) {
            if let Some(down) = state.pairs.remove(&(left_token, token)) {
                out.push(Change::Delete(down));
            }
            if orphaned {
                let down = Token::mint();
                state.null_right.insert(left_token, down);
                let projected = (self.project)(state.left.value(left_token), None);
                out.push(Change::Add(down, projected));
            }
        }
    }

    fn input_error(&self, error: &Arc<SetError>) {
        {
            let mut state = self.state.lock();
            state.left.clear();
            state.right.clear();
            state.pairs.clear();
            state.null_right.clear();
        }
        self.inputs.lock().clear();
        self.output.fail(Arc::clone(error));
    }

    fn input_complete(&self) {
        self.output.complete();
    }
}

impl<L, R, K, O, LK, RK, P> Subscribable<O> for LeftJoinNode<L, R, K, O, LK, RK, P>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    O: Clone + Send + 'static,
    LK: Fn(&L) -> K + Send + Sync + 'static,
    RK: Fn(&R) -> K + Send + Sync + 'static,
    P: Fn(&L, Option<&R>) -> O + Send + Sync + 'static,
{
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<O>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MutableSet;
    use crate::testing::Probe;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Order {
        id: u32,
        customer: u32,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Customer {
        id: u32,
        key: u32,
        name: &'static str,
    }

    fn order(id: u32, customer: u32) -> Order {
        Order { id, customer }
    }

    fn customer(id: u32, key: u32, name: &'static str) -> Customer {
        Customer { id, key, name }
    }

    fn joined(
        orders: &MutableSet<Order, u32, impl Fn(&Order) -> u32>,
        customers: &MutableSet<Customer, u32, impl Fn(&Customer) -> u32>,
    ) -> SetHandle<String> {
        orders.handle().left_join(
            &customers.handle(),
            |o: &Order| o.customer,
            |c: &Customer| c.key,
            |o, c: Option<&Customer>| {
                format!("{}:{}", c.map(|c| c.name).unwrap_or("null"), o.id)
            },
        )
    }

    #[test]
    fn null_right_token_is_reassigned_on_first_match() {
        let orders = MutableSet::new(|o: &Order| o.id);
        let customers = MutableSet::new(|c: &Customer| c.id);
        let probe = Probe::attach(&joined(&orders, &customers));

        // Unmatched left: one null-right lifetime.
        orders.insert(order(1, 10)).unwrap();
        let batch = probe.last_batch();
        assert_eq!(batch.len(), 1);
        let null_token = batch[0].token();
        assert_eq!(batch[0].value(), Some(&"null:1".to_string()));

        // First match: same token, now an Update.
        customers.insert(customer(100, 10, "Alice")).unwrap();
        let batch = probe.last_batch();
        assert_eq!(batch, vec![Change::Update(null_token, "Alice:1".to_string())]);

        // Second right under the same key: an additional downstream.
        customers.insert(customer(101, 10, "Alicia")).unwrap();
        let batch = probe.last_batch();
        assert_eq!(batch.len(), 1);
        let second_token = batch[0].token();
        assert_ne!(second_token, null_token);
        assert_eq!(batch[0].value(), Some(&"Alicia:1".to_string()));
        assert_eq!(probe.len(), 2);

        // Dropping both rights restores a fresh null-right.
        customers.remove(&100).unwrap();
        customers.remove(&101).unwrap();
        assert_eq!(probe.len(), 1);
        let last = probe.last_batch();
        assert!(last.contains(&Change::Delete(second_token)));
        let restored = last
            .iter()
            .find_map(|change| match change {
                Change::Add(token, value) => Some((*token, value.clone())),
                _ => None,
            })
            .expect("expected a restored null-right");
        assert_ne!(restored.0, null_token);
        assert_eq!(restored.1, "null:1");
    }

    #[test]
    fn every_left_always_has_a_downstream() {
        let orders = MutableSet::new(|o: &Order| o.id);
        let customers = MutableSet::new(|c: &Customer| c.id);
        let probe = Probe::attach(&joined(&orders, &customers));

        orders.insert(order(1, 10)).unwrap();
        orders.insert(order(2, 20)).unwrap();
        assert_eq!(probe.len(), 2);

        customers.insert(customer(100, 10, "Alice")).unwrap();
        assert_eq!(probe.len(), 2);

        orders.remove(&1).unwrap();
        assert_eq!(probe.len(), 1);
        assert_eq!(probe.values_sorted(), vec!["null:2".to_string()]);
    }

    #[test]
    fn left_key_change_reevaluates_matches() {
        let orders = MutableSet::new(|o: &Order| o.id);
        let customers = MutableSet::new(|c: &Customer| c.id);
        let probe = Probe::attach(&joined(&orders, &customers));

        customers.insert(customer(100, 10, "Alice")).unwrap();
        orders.insert(order(1, 10)).unwrap();
        assert_eq!(probe.values_sorted(), vec!["Alice:1".to_string()]);

        probe.take_batches();
        orders.update(order(1, 30)).unwrap();

        let batches = probe.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(probe.values_sorted(), vec!["null:1".to_string()]);
    }

    #[test]
    fn right_key_change_restores_null_before_matching_elsewhere() {
        let orders = MutableSet::new(|o: &Order| o.id);
        let customers = MutableSet::new(|c: &Customer| c.id);
        let probe = Probe::attach(&joined(&orders, &customers));

        orders.insert(order(1, 10)).unwrap();
        orders.insert(order(2, 20)).unwrap();
        customers.insert(customer(100, 10, "Alice")).unwrap();
        assert_eq!(
            probe.values_sorted(),
            vec!["Alice:1".to_string(), "null:2".to_string()]
        );

        probe.take_batches();
        customers.update(customer(100, 20, "Alice")).unwrap();

        let batches = probe.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            probe.values_sorted(),
            vec!["Alice:2".to_string(), "null:1".to_string()]
        );

        // Order 2's null-right was reassigned, order 1 got a fresh null.
        let batch = &batches[0];
        let updates = batch
            .iter()
            .filter(|c| matches!(c, Change::Update(_, _)))
            .count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn key_preserving_left_update_refreshes_projections() {
        let orders = MutableSet::new(|o: &Order| o.id);
        let customers = MutableSet::new(|c: &Customer| c.id);
        let handle = orders.handle().left_join(
            &customers.handle(),
            |o: &Order| o.customer,
            |c: &Customer| c.key,
            |o, c: Option<&Customer>| {
                format!("{}:{}", c.map(|c| c.name).unwrap_or("null"), o.id)
            },
        );
        let probe = Probe::attach(&handle);

        orders.insert(order(7, 10)).unwrap();
        let token = probe.last_batch()[0].token();

        // Unmatched: the null-right projection refreshes in place.
        orders.update(order(7, 10)).unwrap();
        assert_eq!(
            probe.last_batch(),
            vec![Change::Update(token, "null:7".to_string())]
        );
    }
}
