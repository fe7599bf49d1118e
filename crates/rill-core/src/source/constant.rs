use std::sync::Arc;

use crate::change::Token;
use crate::handle::SetHandle;
use crate::publisher::Publisher;

/// Build a reactive set with fixed membership.
///
/// Lifetime tokens are minted once, here, so concurrent subscribers see the
/// same token for the same item. Subscribing to an empty constant set
/// delivers nothing at all (batches are never empty). The set never changes,
/// never completes.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use rill_core::constant;
///
/// let primes = constant(vec![2, 3, 5]);
/// let count = Arc::new(AtomicUsize::new(0));
/// let seen = Arc::clone(&count);
/// let _sub = primes.subscribe_fn(move |batch| {
///     seen.fetch_add(batch.len(), Ordering::SeqCst);
/// });
/// // The replay batch is delivered synchronously on subscribe.
/// assert_eq!(count.load(Ordering::SeqCst), 3);
/// ```
pub fn constant<T: Clone + Send + 'static>(items: impl IntoIterator<Item = T>) -> SetHandle<T> {
    let members = items.into_iter().map(|item| (Token::mint(), item));
    SetHandle::from_node(Arc::new(Publisher::with_members(members)))
}
