//! Terminal consumers for **rill** reactive sets.
//!
//! Everything here sits at the downstream edge of a graph:
//!
//! * [`MaterializedView`] -- a synchronously queryable keyed mirror of a set.
//! * [`snapshots`] -- a push stream of the full value collection after every
//!   batch.
//! * [`counts`] -- a push stream of the membership count after every batch.

mod count;
mod materialized;
mod snapshot;

pub use count::{counts, Counts};
pub use materialized::MaterializedView;
pub use snapshot::{snapshots, Snapshots};
