use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The identity of one item's presence in one change stream.
///
/// A token is minted by whichever stage introduces an item into its local
/// stream: sources mint one per inserted item, a join mints one per matched
/// pair, a bridge mints one per upstream lifetime. Tokens carry no ordering
/// and no meaning across stream boundaries -- two stages may use different
/// tokens for what a human would call "the same item". Compare tokens only
/// for identity.
///
/// Tokens are drawn from a process-wide counter, so tokens minted by
/// different stages are always distinct.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// Mint a fresh token, distinct from every other token in the process.
    pub fn mint() -> Token {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Token(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A single membership change on one stream.
///
/// For any token, the well-formed event sequence on its stream is one `Add`,
/// any number of `Update`s, and at most one `Delete`, in that order.
/// Producers are required to respect this; consumers may index their state by
/// token without defensive checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change<T> {
    /// The lifetime begins, carrying the given item.
    Add(Token, T),
    /// The active lifetime now carries the given item.
    Update(Token, T),
    /// The lifetime ends.
    Delete(Token),
}

impl<T> Change<T> {
    /// The token this change applies to.
    pub fn token(&self) -> Token {
        match self {
            Change::Add(token, _) | Change::Update(token, _) | Change::Delete(token) => *token,
        }
    }

    /// The carried item, if this change carries one.
    pub fn value(&self) -> Option<&T> {
        match self {
            Change::Add(_, value) | Change::Update(_, value) => Some(value),
            Change::Delete(_) => None,
        }
    }
}

/// An ordered run of changes delivered as a single notification.
///
/// Delivered batches are never empty: a stage that produces no downstream
/// changes for an upstream batch emits nothing at all.
pub type Batch<T> = Vec<Change<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_distinct() {
        let a = Token::mint();
        let b = Token::mint();
        assert_ne!(a, b);
    }

    #[test]
    fn token_debug_is_compact() {
        let token = Token::mint();
        assert!(format!("{token:?}").starts_with('t'));
    }

    #[test]
    fn change_accessors() {
        let token = Token::mint();
        let add = Change::Add(token, 7);
        assert_eq!(add.token(), token);
        assert_eq!(add.value(), Some(&7));

        let delete: Change<i32> = Change::Delete(token);
        assert_eq!(delete.token(), token);
        assert_eq!(delete.value(), None);
    }
}
