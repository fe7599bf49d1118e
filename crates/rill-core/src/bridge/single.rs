use std::sync::Arc;

use parking_lot::Mutex;

use crate::change::{Change, Token};
use crate::error::{SetError, UpstreamError};
use crate::handle::{SetHandle, Subscribable, Subscription};
use crate::observer::SetObserver;
use crate::publisher::Publisher;
use crate::subject::PushStream;

use super::push_relay;

/// Adapt a raw push stream of values into a reactive set holding at most one
/// lifetime.
///
/// The first value begins the lifetime, later values update it. When the
/// stream completes the lifetime is deleted and the set stays open (a set
/// never completes on behalf of its upstream); if the stream fails, the
/// lifetime is deleted and the error propagates.
pub fn single_lifetime<T, S>(stream: &S) -> SetHandle<T>
where
    T: Clone + Send + 'static,
    S: PushStream<T> + ?Sized,
{
    let node = Arc::new(SingleNode {
        current: Mutex::new(None),
        output: Publisher::new(),
        upstream: Mutex::new(None),
    });
    let sub = stream.subscribe(Box::new(push_relay(
        &node,
        SingleNode::next,
        SingleNode::error,
        SingleNode::complete,
    )));
    *node.upstream.lock() = Some(sub);
    SetHandle::from_node(node)
}

struct SingleNode<T> {
    current: Mutex<Option<Token>>,
    output: Publisher<T>,
    upstream: Mutex<Option<Subscription>>,
}

impl<T: Clone + Send + 'static> SingleNode<T> {
    fn next(&self, value: T) {
        let mut current = self.current.lock();
        match *current {
            Some(token) => {
                drop(current);
                self.output.emit(vec![Change::Update(token, value)]);
            }
            None => {
                let token = Token::mint();
                *current = Some(token);
                drop(current);
                self.output.emit(vec![Change::Add(token, value)]);
            }
        }
    }

    fn complete(&self) {
        if let Some(token) = self.current.lock().take() {
            self.output.emit(vec![Change::Delete(token)]);
        }
        // The set stays open: completion of the upstream only ends the
        // lifetime it was carrying.
    }

    fn error(&self, error: &UpstreamError) {
        self.current.lock().take();
        self.output.fail(SetError::upstream(error));
    }
}

impl<T: Clone + Send + 'static> Subscribable<T> for SingleNode<T> {
    fn subscribe(self: Arc<Self>, observer: Box<dyn SetObserver<T>>) -> Subscription {
        self.output.attach(observer).keeping(self)
    }
}
