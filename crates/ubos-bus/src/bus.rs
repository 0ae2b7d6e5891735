use crate::envelope::{Envelope, ResultBody, TaskAssignment};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use ubos_core::{UbosError, UbosResult};

/// Request timeout used when the caller does not pass one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Receives messages published on a subscribed topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope);
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope) {
        (self.0)(envelope.clone()).await;
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type HandlerList = Vec<(u64, Arc<dyn MessageHandler>)>;

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<String, HandlerList>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut topics = self.topics.write();
        let Some(handlers) = topics.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// In-process publish/subscribe bus with exact-match topics and
/// correlated request/reply.
///
/// Cloning is cheap; clones share the same subscriptions.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`MessageBus::subscribe`].
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the handler. Returns false if the bus is gone or it was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(&self.topic, self.id),
            None => false,
        }
    }
}

/// Non-owning reference to a bus, used by handlers that publish back.
#[derive(Clone)]
pub struct WeakMessageBus(Weak<BusInner>);

impl WeakMessageBus {
    pub fn upgrade(&self) -> Option<MessageBus> {
        self.0.upgrade().map(|inner| MessageBus { inner })
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakMessageBus {
        WeakMessageBus(Arc::downgrade(&self.inner))
    }

    /// Register `handler` for messages published on exactly `topic`.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Subscription {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push((id, handler));
        debug!(topic = %topic, subscription = id, "Subscribed");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Number of handlers currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Deliver `envelope` to every current subscriber of `topic`, in
    /// subscription order, awaiting each. Returns how many were reached.
    ///
    /// Subscribers added or removed while delivery is running only see
    /// later publishes.
    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> usize {
        let handlers: Vec<Arc<dyn MessageHandler>> = match self.inner.topics.read().get(topic) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler.handle(envelope).await;
        }
        handlers.len()
    }

    /// Publish after checking the body is a well-formed task assignment.
    pub async fn publish_task(&self, topic: &str, envelope: &Envelope) -> UbosResult<usize> {
        TaskAssignment::from_body(&envelope.body)?;
        Ok(self.publish(topic, envelope).await)
    }

    /// Publish after checking the body is a well-formed result.
    pub async fn publish_result(&self, topic: &str, envelope: &Envelope) -> UbosResult<usize> {
        ResultBody::from_body(&envelope.body)?;
        Ok(self.publish(topic, envelope).await)
    }

    /// Publish `envelope` with a fresh correlation id and wait for the reply.
    ///
    /// Fails with `Bus` when `timeout` (default 15 s) elapses first.
    pub async fn request(
        &self,
        topic: &str,
        mut envelope: Envelope,
        timeout: Option<Duration>,
    ) -> UbosResult<Envelope> {
        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let correlation_id = uuid::Uuid::new_v4().to_string();
        envelope.header.correlation_id = Some(correlation_id.clone());

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(correlation_id.clone(), tx);

        let exchange = async {
            let reached = self.publish(topic, &envelope).await;
            debug!(topic = %topic, correlation_id = %correlation_id, reached, "Request published");
            rx.await
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        self.inner.pending.lock().remove(&correlation_id);

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(UbosError::Bus(format!(
                "reply channel for request on '{topic}' closed"
            ))),
            Err(_) => Err(UbosError::Bus(format!(
                "request on '{topic}' timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Route `envelope` to the request waiting on `correlation_id`.
    ///
    /// Returns false (and drops the message) when there is no id or nobody
    /// is waiting on it any more.
    pub fn reply(&self, correlation_id: Option<&str>, envelope: Envelope) -> bool {
        let Some(correlation_id) = correlation_id else {
            return false;
        };
        let waiter = self.inner.pending.lock().remove(correlation_id);
        match waiter {
            Some(tx) => tx.send(envelope).is_ok(),
            None => {
                debug!(correlation_id = %correlation_id, "Dropping reply with no waiting request");
                false
            }
        }
    }
}
