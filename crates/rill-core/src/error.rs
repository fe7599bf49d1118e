use std::fmt;
use std::sync::Arc;

/// A failure carried out of an external push stream.
///
/// Wrapped in an `Arc` so one failure can fan out to every observer.
pub type UpstreamError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by sources, bridges, and operators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SetError {
    /// [`MutableSet::insert`](crate::MutableSet::insert) was called while the
    /// key is already active.
    #[error("key {key} is already present")]
    DuplicateKey {
        /// Rendering of the offending key.
        key: String,
    },

    /// [`MutableSet::update`](crate::MutableSet::update) or
    /// [`MutableSet::remove`](crate::MutableSet::remove) was called for a key
    /// that is not active.
    #[error("key {key} is not present")]
    AbsentKey {
        /// Rendering of the offending key.
        key: String,
    },

    /// A change stream broke the add/update/delete lifetime contract.
    ///
    /// This always indicates a bug in the producing stage, never a runtime
    /// condition. The offending mutation is aborted with the subject state
    /// unchanged.
    #[error("lifetime contract violated: {detail}")]
    InvalidPrecondition {
        /// What the offending change was.
        detail: String,
    },

    /// A wrapped failure from an external push stream.
    #[error("upstream stream failed: {0}")]
    Upstream(UpstreamError),
}

impl SetError {
    pub(crate) fn duplicate_key(key: &dyn fmt::Debug) -> SetError {
        SetError::DuplicateKey {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn absent_key(key: &dyn fmt::Debug) -> SetError {
        SetError::AbsentKey {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn upstream(error: &UpstreamError) -> Arc<SetError> {
        Arc::new(SetError::Upstream(Arc::clone(error)))
    }
}
