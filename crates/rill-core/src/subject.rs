//! Raw push streams: plain next/error/complete multicast, with no membership
//! semantics. Bridges adapt these into reactive sets.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::UpstreamError;
use crate::handle::Subscription;

/// Receives the values of a raw push stream.
///
/// `on_error` and `on_complete` are terminal; no further calls follow either.
pub trait PushObserver<T>: Send {
    /// A new value was pushed.
    fn on_next(&mut self, value: T);

    /// The stream failed. Terminal.
    fn on_error(&mut self, error: &UpstreamError) {
        let _ = error;
    }

    /// The stream ended normally. Terminal.
    fn on_complete(&mut self) {}
}

/// A source of raw pushed values.
///
/// Unlike a [`SetHandle`](crate::SetHandle) there is no replay: an observer
/// only sees values pushed after it subscribed. A stream that already
/// terminated delivers its terminal notification immediately.
pub trait PushStream<T> {
    /// Attach an observer; the guard detaches it again.
    fn subscribe(&self, observer: Box<dyn PushObserver<T>>) -> Subscription;
}

type PushCell<T> = Arc<Mutex<Box<dyn PushObserver<T>>>>;

enum SubjectTerminal {
    Completed,
    Failed(UpstreamError),
}

struct SubjectState<T> {
    next_id: u64,
    observers: Vec<(u64, PushCell<T>)>,
    terminal: Option<SubjectTerminal>,
}

/// A multicast push stream fed imperatively.
///
/// The write half and the read half are the same value: clone it, keep one
/// clone as the producer, and hand the others out as [`PushStream`]s. After
/// [`error`](Subject::error) or [`complete`](Subject::complete) the subject
/// is terminated; later pushes are ignored and later subscribers get the
/// terminal notification immediately.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Subject {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Subject::new()
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// Create an open subject with no observers.
    pub fn new() -> Subject<T> {
        Subject {
            state: Arc::new(Mutex::new(SubjectState {
                next_id: 0,
                observers: Vec::new(),
                terminal: None,
            })),
        }
    }

    /// Push a value to every current observer.
    pub fn next(&self, value: T) {
        let observers = {
            let state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.observers.clone()
        };
        for (_, cell) in observers {
            cell.lock().on_next(value.clone());
        }
    }

    /// Fail the stream. Terminal and idempotent.
    pub fn error(&self, error: impl std::error::Error + Send + Sync + 'static) {
        self.error_arc(Arc::new(error));
    }

    /// Fail the stream with an already-shared error.
    pub fn error_arc(&self, error: UpstreamError) {
        let observers = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(SubjectTerminal::Failed(Arc::clone(&error)));
            std::mem::take(&mut state.observers)
        };
        for (_, cell) in &observers {
            cell.lock().on_error(&error);
        }
    }

    /// End the stream normally. Terminal and idempotent.
    pub fn complete(&self) {
        let observers = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(SubjectTerminal::Completed);
            std::mem::take(&mut state.observers)
        };
        for (_, cell) in &observers {
            cell.lock().on_complete();
        }
    }
}

impl<T: Clone + Send + 'static> PushStream<T> for Subject<T> {
    fn subscribe(&self, observer: Box<dyn PushObserver<T>>) -> Subscription {
        let mut state = self.state.lock();
        match &state.terminal {
            Some(SubjectTerminal::Failed(error)) => {
                let error = Arc::clone(error);
                drop(state);
                let mut observer = observer;
                observer.on_error(&error);
                return Subscription::settled();
            }
            Some(SubjectTerminal::Completed) => {
                drop(state);
                let mut observer = observer;
                observer.on_complete();
                return Subscription::settled();
            }
            None => {}
        }
        let id = state.next_id;
        state.next_id += 1;
        state.observers.push((id, Arc::new(Mutex::new(observer))));
        drop(state);

        let weak = Arc::downgrade(&self.state);
        let state_clone = Arc::clone(&self.state);
        let keep: Arc<dyn Any + Send + Sync> = state_clone;
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().observers.retain(|(sid, _)| *sid != id);
            }
        })
        .keeping(keep)
    }
}

/// Feed a [`futures::Stream`] into a fresh [`Subject`] from a dedicated
/// worker thread.
///
/// The thread blocks on the stream, pushes each item, and completes the
/// subject when the stream ends. Returns an error only if the worker thread
/// cannot be spawned.
pub fn pump<T, S>(stream: S) -> std::io::Result<Subject<T>>
where
    T: Clone + Send + 'static,
    S: futures::Stream<Item = T> + Send + 'static,
{
    let subject = Subject::new();
    let feed = subject.clone();
    std::thread::Builder::new()
        .name("rill-pump".into())
        .spawn(move || {
            for value in futures::executor::block_on_stream(Box::pin(stream)) {
                feed.next(value);
            }
            tracing::debug!("pumped stream ended");
            feed.complete();
        })?;
    Ok(subject)
}

/// Like [`pump`], for streams of results: the first `Err` fails the subject
/// and stops the pump.
pub fn pump_results<T, E, S>(stream: S) -> std::io::Result<Subject<T>>
where
    T: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    S: futures::Stream<Item = Result<T, E>> + Send + 'static,
{
    let subject = Subject::new();
    let feed = subject.clone();
    std::thread::Builder::new()
        .name("rill-pump".into())
        .spawn(move || {
            for result in futures::executor::block_on_stream(Box::pin(stream)) {
                match result {
                    Ok(value) => feed.next(value),
                    Err(error) => {
                        tracing::debug!(%error, "pumped stream failed");
                        feed.error(error);
                        return;
                    }
                }
            }
            feed.complete();
        })?;
    Ok(subject)
}
