//! The dedicated thread that owns a dataflow graph.
//!
//! Processing a batch is a synchronous traversal of the graph: sources push
//! into operators, operators push into their successors, all inline. The
//! [`Pipeline`] gives that traversal a single home thread. Mutations entered
//! through [`PipelineHandle::invoke`] run inline when the caller is already
//! on the pipeline thread; from any other thread they are dispatched over and
//! the caller blocks until processing finished, so when `invoke` returns,
//! every downstream view on the same pipeline reflects the change. Callers
//! are serialized: at most one batch is in flight at a time.

use std::sync::mpsc;
use std::thread::{self, ThreadId};

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// Owns the worker thread of one dataflow graph.
///
/// Dropping the `Pipeline` shuts the worker down after the jobs already
/// queued have run. Invoking through a leftover [`PipelineHandle`] after
/// that is a programming error and panics.
pub struct Pipeline {
    tx: mpsc::Sender<Job>,
    worker: Option<thread::JoinHandle<()>>,
    worker_id: ThreadId,
}

/// A cloneable entry point to a [`Pipeline`]'s thread.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Job>,
    worker_id: ThreadId,
}

impl Pipeline {
    /// Spawn the worker thread.
    ///
    /// Returns an error only if the thread cannot be spawned.
    pub fn new() -> std::io::Result<Pipeline> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("rill-pipeline".into())
            .spawn(move || {
                tracing::debug!("pipeline thread started");
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(run) => run(),
                        Job::Shutdown => break,
                    }
                }
                tracing::debug!("pipeline thread stopped");
            })?;
        let worker_id = worker.thread().id();
        Ok(Pipeline {
            tx,
            worker: Some(worker),
            worker_id,
        })
    }

    /// A handle that can be cloned into other threads.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            tx: self.tx.clone(),
            worker_id: self.worker_id,
        }
    }

    /// Run `f` on the pipeline thread and return its result. See
    /// [`PipelineHandle::invoke`].
    pub fn invoke<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        self.handle().invoke(f)
    }
}

impl PipelineHandle {
    /// Run `f` on the pipeline thread, blocking until it finished.
    ///
    /// Called from the pipeline thread itself, `f` runs inline. Called from
    /// anywhere else, it is queued behind in-flight work; concurrent callers
    /// are serialized. Either way, all downstream state of the graph reflects
    /// `f`'s effects when this returns.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline has been dropped.
    pub fn invoke<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        if thread::current().id() == self.worker_id {
            return f();
        }
        let (done_tx, done_rx) = mpsc::channel();
        let job = Job::Run(Box::new(move || {
            let _ = done_tx.send(f());
        }));
        tracing::trace!("dispatching to pipeline thread");
        if self.tx.send(job).is_err() {
            panic!("pipeline has shut down");
        }
        match done_rx.recv() {
            Ok(result) => result,
            Err(_) => panic!("pipeline has shut down"),
        }
    }

    /// Whether the current thread is the pipeline thread.
    pub fn on_pipeline(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
