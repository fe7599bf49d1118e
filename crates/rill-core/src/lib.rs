//! Core engine for **rill** -- incrementally maintained reactive collections.
//!
//! A producer emits per-item change events; a graph of operators transforms,
//! joins, groups, and flattens those events without ever recomputing a full
//! collection. Subscribers receive batched change notifications, starting
//! with a replay of the current membership.
//!
//! # Key types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Change`] / [`Token`] | The change-event algebra every stage speaks |
//! | [`SetHandle`] | Handle to a reactive set; operators hang off it |
//! | [`SetObserver`] | Batch/error/completion endpoint of a set |
//! | [`MutableSet`] | Imperative keyed source (insert / update / remove) |
//! | [`Subject`] | Raw push stream feeding the bridges |
//! | [`Pipeline`] | Dedicated thread that owns a graph |
//! | [`testing::Probe`] | Recording observer for tests |
//!
//! # Architecture
//!
//! 1. **Sources** ([`MutableSet`], [`constant`]) and **bridges**
//!    ([`single_lifetime`], [`multi_lifetime`], [`from_snapshots`]) introduce
//!    items into the graph, minting a lifetime [`Token`] per item.
//! 2. **Operators** ([`map`](SetHandle::map), [`filter`](SetHandle::filter),
//!    [`join`](SetHandle::join), [`left_join`](SetHandle::left_join),
//!    [`group_by`](SetHandle::group_by),
//!    [`flat_map_set`](SetHandle::flat_map_set),
//!    [`flat_map_array`](SetHandle::flat_map_array)) subscribe upstream,
//!    keep private state, and emit at most one downstream batch per upstream
//!    batch.
//! 3. **Observers** attach anywhere via [`SetHandle::subscribe`] and first
//!    receive a replay of the current membership, so building the graph and
//!    running it can be freely interleaved.
//!
//! Graphs are built synchronously and run event-driven. All processing of
//! one batch is a synchronous traversal on the calling thread; a
//! [`Pipeline`] serializes mutations from many threads onto one.
//!
//! # Quick example
//!
//! ```
//! use rill_core::{MutableSet, testing::Probe};
//!
//! #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
//! struct Employee {
//!     id: u32,
//!     dept: &'static str,
//! }
//!
//! let employees = MutableSet::new(|e: &Employee| e.id);
//! let engineering = employees.handle().filter(|e| e.dept == "Eng");
//! let probe = Probe::attach(&engineering);
//!
//! employees.insert(Employee { id: 1, dept: "Eng" }).unwrap();
//! employees.insert(Employee { id: 2, dept: "Sales" }).unwrap();
//! assert_eq!(probe.values_sorted(), vec![Employee { id: 1, dept: "Eng" }]);
//! ```

pub mod bridge;
pub mod change;
pub mod error;
pub mod handle;
pub mod observer;
pub mod pipeline;
pub mod source;
pub mod subject;
pub mod testing;

mod op;
mod publisher;

pub use bridge::{from_snapshots, multi_lifetime, single_lifetime};
pub use change::{Batch, Change, Token};
pub use error::{SetError, UpstreamError};
pub use handle::{SetHandle, Subscription};
pub use observer::SetObserver;
pub use pipeline::{Pipeline, PipelineHandle};
pub use source::{constant, MutableSet};
pub use subject::{pump, pump_results, PushObserver, PushStream, Subject};
