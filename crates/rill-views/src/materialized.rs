use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use rill_core::{Change, SetError, SetHandle, SetObserver, Subscription, Token};

/// A synchronously queryable keyed mirror of a reactive set.
///
/// The view subscribes on construction (absorbing the replay batch) and then
/// follows the set exactly: after a mutation's processing returns on the
/// pipeline thread, the view reflects it. Queries from other threads see
/// some consistent recent state; coordinate through the pipeline for
/// read-your-writes.
///
/// Dropping (or [`dispose`](MaterializedView::dispose)-ing) the view
/// detaches it; later upstream changes are no longer reflected.
///
/// # Examples
///
/// ```
/// use rill_core::MutableSet;
/// use rill_views::MaterializedView;
///
/// let accounts = MutableSet::new(|balance: &(u32, i64)| balance.0);
/// let view = MaterializedView::new(&accounts.handle(), |balance| balance.0);
///
/// accounts.insert((7, 1200)).unwrap();
/// assert_eq!(view.get(&7), Some((7, 1200)));
/// assert_eq!(view.len(), 1);
/// ```
pub struct MaterializedView<K, T> {
    state: Arc<Mutex<ViewState<K, T>>>,
    _sub: Subscription,
}

struct ViewState<K, T> {
    by_key: HashMap<K, (Token, T)>,
    key_of: HashMap<Token, K>,
    error: Option<Arc<SetError>>,
}

struct ViewObserver<K, T, F> {
    state: Arc<Mutex<ViewState<K, T>>>,
    key_fn: F,
}

impl<K, T, F> SetObserver<T> for ViewObserver<K, T, F>
where
    K: Eq + Hash + Clone + Send,
    T: Clone + Send,
    F: Fn(&T) -> K + Send,
{
    fn on_batch(&mut self, batch: &[Change<T>]) {
        tracing::trace!(changes = batch.len(), "view refresh");
        let mut state = self.state.lock();
        for change in batch {
            match change {
                Change::Add(token, value) => {
                    let key = (self.key_fn)(value);
                    state.key_of.insert(*token, key.clone());
                    state.by_key.insert(key, (*token, value.clone()));
                }
                Change::Update(token, value) => {
                    let key = (self.key_fn)(value);
                    let previous = state
                        .key_of
                        .insert(*token, key.clone())
                        .unwrap_or_else(|| panic!("view saw unknown token {token:?}"));
                    if previous != key {
                        state.by_key.remove(&previous);
                    }
                    state.by_key.insert(key, (*token, value.clone()));
                }
                Change::Delete(token) => {
                    let key = state
                        .key_of
                        .remove(token)
                        .unwrap_or_else(|| panic!("view saw unknown token {token:?}"));
                    state.by_key.remove(&key);
                }
            }
        }
    }

    fn on_error(&mut self, error: &Arc<SetError>) {
        self.state.lock().error = Some(Arc::clone(error));
    }
}

impl<K, T> MaterializedView<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    /// Mirror `handle`, keying entries with `key_fn`.
    pub fn new<F>(handle: &SetHandle<T>, key_fn: F) -> MaterializedView<K, T>
    where
        F: Fn(&T) -> K + Send + 'static,
    {
        let state = Arc::new(Mutex::new(ViewState {
            by_key: HashMap::new(),
            key_of: HashMap::new(),
            error: None,
        }));
        let sub = handle.subscribe(ViewObserver {
            state: Arc::clone(&state),
            key_fn,
        });
        MaterializedView { state, _sub: sub }
    }

    /// Number of items currently in the set.
    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// Whether the set is currently empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().by_key.is_empty()
    }

    /// The item stored under `key`, if any.
    pub fn get(&self, key: &K) -> Option<T> {
        self.state
            .lock()
            .by_key
            .get(key)
            .map(|(_, value)| value.clone())
    }

    /// Whether an item is stored under `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.state.lock().by_key.contains_key(key)
    }

    /// All current items, in no particular order.
    pub fn items(&self) -> Vec<T> {
        self.state
            .lock()
            .by_key
            .values()
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// All current keys, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.state.lock().by_key.keys().cloned().collect()
    }

    /// The terminal error, if the mirrored set failed.
    pub fn error(&self) -> Option<Arc<SetError>> {
        self.state.lock().error.clone()
    }

    /// Detach from the set. Equivalent to dropping the view.
    pub fn dispose(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_core::MutableSet;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Employee {
        id: u32,
        name: &'static str,
    }

    fn emp(id: u32, name: &'static str) -> Employee {
        Employee { id, name }
    }

    #[test]
    fn follows_the_source() {
        let source = MutableSet::new(|e: &Employee| e.id);
        let view = MaterializedView::new(&source.handle(), |e: &Employee| e.id);

        source.insert(emp(1, "Alice")).unwrap();
        source.insert(emp(2, "Bob")).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(&1), Some(emp(1, "Alice")));

        source.update(emp(1, "Alicia")).unwrap();
        assert_eq!(view.get(&1), Some(emp(1, "Alicia")));

        source.remove(&2).unwrap();
        assert!(!view.contains_key(&2));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn absorbs_replay_of_existing_membership() {
        let source = MutableSet::new(|e: &Employee| e.id);
        source.insert(emp(1, "Alice")).unwrap();

        let view = MaterializedView::new(&source.handle(), |e: &Employee| e.id);
        assert_eq!(view.get(&1), Some(emp(1, "Alice")));
    }

    #[test]
    fn view_can_rekey_items() {
        // The view key need not be the source key.
        let source = MutableSet::new(|e: &Employee| e.id);
        let by_name = MaterializedView::new(&source.handle(), |e: &Employee| e.name);

        source.insert(emp(1, "Alice")).unwrap();
        source.update(emp(1, "Alicia")).unwrap();

        assert!(by_name.contains_key(&"Alicia"));
        assert!(!by_name.contains_key(&"Alice"));
    }

    #[test]
    fn disposed_view_releases_its_subscription() {
        let source = MutableSet::new(|e: &Employee| e.id);
        let view = MaterializedView::new(&source.handle(), |e: &Employee| e.id);
        source.insert(emp(1, "Alice")).unwrap();
        view.dispose();

        // Mutations after disposal succeed and reach fresh views.
        source.insert(emp(2, "Bob")).unwrap();
        let fresh = MaterializedView::new(&source.handle(), |e: &Employee| e.id);
        assert_eq!(fresh.len(), 2);
    }
}
