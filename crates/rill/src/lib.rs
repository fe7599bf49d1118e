//! **rill** -- incrementally maintained reactive collections.
//!
//! This is the umbrella crate that re-exports everything from a single
//! dependency:
//!
//! ```toml
//! [dependencies]
//! rill = "0.1"
//! ```
//!
//! # Re-exports
//!
//! * All public items from [`rill_core`] are available at the crate root
//!   ([`MutableSet`], [`SetHandle`], [`Subject`], [`Pipeline`], the bridge
//!   constructors, and the operator methods hanging off [`SetHandle`]).
//! * The [`views`] module re-exports everything from [`rill_views`]
//!   ([`MaterializedView`](views::MaterializedView),
//!   [`snapshots`](views::snapshots), [`counts`](views::counts)).
//!
//! # Quick start
//!
//! ```
//! use rill::MutableSet;
//! use rill::views::MaterializedView;
//!
//! #[derive(Clone)]
//! struct Order {
//!     id: u32,
//!     total: i64,
//! }
//!
//! let orders = MutableSet::new(|o: &Order| o.id);
//! let big = orders.handle().filter(|o| o.total >= 1000);
//! let view = MaterializedView::new(&big, |o: &Order| o.id);
//!
//! orders.insert(Order { id: 1, total: 250 }).unwrap();
//! orders.insert(Order { id: 2, total: 8_000 }).unwrap();
//! assert!(view.contains_key(&2));
//! assert!(!view.contains_key(&1));
//! ```

pub use rill_core::*;

pub mod views {
    pub use rill_views::*;
}
