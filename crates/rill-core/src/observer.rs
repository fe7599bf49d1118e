use std::sync::Arc;

use crate::change::Change;
use crate::error::SetError;

/// Receives the batched change notifications of one reactive set.
///
/// The first delivery after subscribing is the replay batch: one
/// [`Change::Add`] per lifetime active at that moment (nothing if the set is
/// empty). Everything after that is live. `on_error` and `on_complete` are
/// terminal -- no further calls follow either one.
///
/// Observers must not mutate the sets they observe from within a callback;
/// route such feedback through a [`Pipeline`](crate::Pipeline) instead.
pub trait SetObserver<T>: Send {
    /// Called once per batch, replay included.
    fn on_batch(&mut self, batch: &[Change<T>]);

    /// Called when the set terminates with a failure.
    ///
    /// Every lifetime that was still active has already been deleted by the
    /// batch delivered immediately before this call.
    fn on_error(&mut self, error: &Arc<SetError>) {
        let _ = error;
    }

    /// Called when the set terminates normally.
    ///
    /// Built-in sources and operators never complete; this exists for custom
    /// endpoints layered on the same contract.
    fn on_complete(&mut self) {}
}

/// Closure adapter for observers that only care about batches.
pub(crate) struct FnObserver<F>(pub(crate) F);

impl<T, F> SetObserver<T> for FnObserver<F>
where
    F: FnMut(&[Change<T>]) + Send,
{
    fn on_batch(&mut self, batch: &[Change<T>]) {
        (self.0)(batch)
    }
}
