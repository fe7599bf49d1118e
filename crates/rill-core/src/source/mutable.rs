use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Change, Token};
use crate::error::SetError;
use crate::handle::SetHandle;
use crate::publisher::Publisher;

/// A keyed reactive set driven by imperative mutations.
///
/// Each item is identified by the key extracted with the function supplied to
/// [`new`](MutableSet::new); at most one item per key is active at a time.
/// Every successful mutation emits exactly one single-change batch to the
/// set's subscribers before the call returns. The set never completes and
/// never errors.
///
/// The `MutableSet` itself is the write half; [`handle`](MutableSet::handle)
/// returns the read half that observers and operators attach to. A handle
/// outlives the writer: dropping the `MutableSet` freezes the set at its last
/// membership.
///
/// # Examples
///
/// ```
/// use rill_core::MutableSet;
///
/// #[derive(Clone)]
/// struct Employee {
///     id: u32,
///     name: String,
/// }
///
/// let employees = MutableSet::new(|e: &Employee| e.id);
/// employees
///     .insert(Employee { id: 1, name: "Alice".into() })
///     .unwrap();
/// assert!(employees.contains_key(&1));
/// assert!(employees.insert(Employee { id: 1, name: "Alice".into() }).is_err());
/// ```
pub struct MutableSet<T, K, F> {
    keys: Mutex<HashMap<K, Token>>,
    publisher: Arc<Publisher<T>>,
    key_fn: F,
}

impl<T, K, F> MutableSet<T, K, F>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Clone + fmt::Debug,
    F: Fn(&T) -> K,
{
    /// Create an empty set keyed by `key_fn`.
    ///
    /// Key equality is the key type's own `Eq`/`Hash`; wrap the key in a
    /// newtype to customize how keys compare.
    pub fn new(key_fn: F) -> MutableSet<T, K, F> {
        MutableSet {
            keys: Mutex::new(HashMap::new()),
            publisher: Arc::new(Publisher::new()),
            key_fn,
        }
    }

    /// The read half of this set.
    pub fn handle(&self) -> SetHandle<T> {
        SetHandle::from_node(Arc::clone(&self.publisher))
    }

    /// Add an item under a fresh lifetime.
    ///
    /// Fails with [`SetError::DuplicateKey`] if the item's key is already
    /// active; nothing is emitted in that case.
    pub fn insert(&self, item: T) -> Result<(), SetError> {
        let key = (self.key_fn)(&item);
        let token = {
            let mut keys = self.keys.lock();
            if keys.contains_key(&key) {
                return Err(SetError::duplicate_key(&key));
            }
            let token = Token::mint();
            keys.insert(key.clone(), token);
            token
        };
        tracing::trace!(key = ?key, token = ?token, "insert");
        self.publisher.emit(vec![Change::Add(token, item)]);
        Ok(())
    }

    /// Replace the item carried by its key's active lifetime.
    ///
    /// The lifetime token is kept; subscribers see an `Update`. Updating to
    /// an equal value is allowed and still emits. Fails with
    /// [`SetError::AbsentKey`] if the key is not active.
    pub fn update(&self, item: T) -> Result<(), SetError> {
        let key = (self.key_fn)(&item);
        let token = {
            let keys = self.keys.lock();
            match keys.get(&key) {
                Some(token) => *token,
                None => return Err(SetError::absent_key(&key)),
            }
        };
        tracing::trace!(key = ?key, token = ?token, "update");
        self.publisher.emit(vec![Change::Update(token, item)]);
        Ok(())
    }

    /// End the lifetime active under `key`.
    ///
    /// Fails with [`SetError::AbsentKey`] if the key is not active.
    pub fn remove(&self, key: &K) -> Result<(), SetError> {
        let token = {
            let mut keys = self.keys.lock();
            match keys.remove(key) {
                Some(token) => token,
                None => return Err(SetError::absent_key(key)),
            }
        };
        tracing::trace!(key = ?key, token = ?token, "remove");
        self.publisher.emit(vec![Change::Delete(token)]);
        Ok(())
    }

    /// Whether `key` is currently active.
    pub fn contains_key(&self, key: &K) -> bool {
        self.keys.lock().contains_key(key)
    }

    /// Number of active items.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether the set has no active items.
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}
