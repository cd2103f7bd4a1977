//! In-process request/response broker
//!
//! This module provides:
//! - One consumer slot per queue name, rejecting a second registration
//! - Typed requests with exactly-once ack/nack through [`Responder`]
//! - JSON copy-out of every payload and response at the queue boundary
//! - Optional per-request timeouts
//! - Per-queue counters

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Instrument};

use confer_core::Nack;

use crate::error::{BrokerError, Result};
use crate::queue::Queue;

type Reply = std::result::Result<Value, Nack>;

/// Consumer of a queue.
///
/// `handle` is invoked synchronously from [`Broker::dispatch`], in the order
/// requests were sent. Long-running work should be moved onto a task; the
/// responder must eventually be consumed by exactly one of `ack` or `nack`.
pub trait Handler<Q: Queue>: Send + Sync + 'static {
    fn handle(&self, payload: Q::Payload, responder: Responder<Q>);
}

/// Handler running an async closure per request on the tokio runtime
pub struct AsyncHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure returning `Result<Response, Nack>` as a queue handler
pub fn handler_fn<F, Fut>(f: F) -> AsyncHandler<F, Fut> {
    AsyncHandler {
        f,
        _fut: PhantomData,
    }
}

impl<Q, F, Fut> Handler<Q> for AsyncHandler<F, Fut>
where
    Q: Queue,
    F: Fn(Q::Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Q::Response, Nack>> + Send + 'static,
{
    fn handle(&self, payload: Q::Payload, responder: Responder<Q>) {
        let span = tracing::debug_span!("broker_request", queue = Q::NAME, request_id = responder.request_id());
        let fut = (self.f)(payload);
        tokio::spawn(
            async move {
                match fut.await {
                    Ok(response) => responder.ack(response),
                    Err(nack) => responder.nack(nack),
                }
            }
            .instrument(span),
        );
    }
}

/// Reply side of one request. Consumed by `ack` or `nack`.
pub struct Responder<Q: Queue> {
    reply: Option<oneshot::Sender<Reply>>,
    stats: Arc<QueueStats>,
    request_id: u64,
    _queue: PhantomData<fn() -> Q>,
}

impl<Q: Queue> Responder<Q> {
    fn new(reply: oneshot::Sender<Reply>, stats: Arc<QueueStats>, request_id: u64) -> Self {
        Self {
            reply: Some(reply),
            stats,
            request_id,
            _queue: PhantomData,
        }
    }

    #[must_use]
    pub const fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Positively acknowledge the request
    pub fn ack(mut self, response: Q::Response) {
        let reply = serde_json::to_value(&response).map_err(|e| {
            error!(queue = Q::NAME, request_id = self.request_id, error = %e, "Failed to encode response");
            Nack::protocol_violation(format!("unencodable response on {}: {e}", Q::NAME))
        });
        self.finish(reply);
    }

    /// Negatively acknowledge the request
    pub fn nack(mut self, nack: impl Into<Nack>) {
        self.finish(Err(nack.into()));
    }

    /// Ack on `Ok`, nack on `Err`
    pub fn respond<E: Into<Nack>>(self, result: std::result::Result<Q::Response, E>) {
        match result {
            Ok(response) => self.ack(response),
            Err(err) => self.nack(err),
        }
    }

    fn finish(&mut self, reply: Reply) {
        let Some(tx) = self.reply.take() else {
            return;
        };
        match &reply {
            Ok(_) => self.stats.acked.fetch_add(1, Ordering::Relaxed),
            Err(nack) => {
                debug!(queue = Q::NAME, request_id = self.request_id, code = %nack.code, "Request nacked");
                self.stats.nacked.fetch_add(1, Ordering::Relaxed)
            }
        };
        if tx.send(reply).is_err() {
            debug!(
                queue = Q::NAME,
                request_id = self.request_id,
                "Requester stopped waiting before the reply arrived"
            );
        }
    }
}

impl<Q: Queue> Drop for Responder<Q> {
    fn drop(&mut self) {
        if self.reply.is_some() {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            error!(
                queue = Q::NAME,
                request_id = self.request_id,
                "Handler dropped a request without ack or nack"
            );
        }
    }
}

/// An in-flight request
pub struct Pending<Q: Queue> {
    rx: oneshot::Receiver<Reply>,
    request_id: u64,
    stats: Arc<QueueStats>,
    _queue: PhantomData<fn() -> Q>,
}

impl<Q: Queue> Pending<Q> {
    #[must_use]
    pub const fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the consumer's ack or nack
    pub async fn response(self) -> Result<Q::Response> {
        match self.rx.await {
            Ok(Ok(value)) => {
                serde_json::from_value(value).map_err(|e| BrokerError::ProtocolViolation {
                    queue: Q::NAME,
                    reason: format!("malformed response: {e}"),
                })
            }
            Ok(Err(nack)) => Err(BrokerError::Nacked {
                queue: Q::NAME,
                nack,
            }),
            Err(_) => Err(BrokerError::ProtocolViolation {
                queue: Q::NAME,
                reason: "consumer dropped the request without ack or nack".to_string(),
            }),
        }
    }

    /// Wait for the reply, giving up after `timeout`
    pub async fn response_within(self, timeout: Duration) -> Result<Q::Response> {
        let stats = Arc::clone(&self.stats);
        let request_id = self.request_id;
        if let Ok(result) = tokio::time::timeout(timeout, self.response()).await {
            result
        } else {
            stats.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(queue = Q::NAME, request_id, ?timeout, "Request timed out");
            Err(BrokerError::Timeout {
                queue: Q::NAME,
                timeout,
            })
        }
    }
}

/// Per-queue counters
#[derive(Debug, Default)]
struct QueueStats {
    sent: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    abandoned: AtomicU64,
    no_consumer: AtomicU64,
    timed_out: AtomicU64,
}

/// Snapshot of one queue's counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub queue: String,
    pub has_consumer: bool,
    pub sent: u64,
    pub acked: u64,
    pub nacked: u64,
    /// Requests whose handler dropped the responder unanswered
    pub abandoned: u64,
    pub no_consumer: u64,
    pub timed_out: u64,
}

/// Type-erased consumer stored in a queue slot
trait ErasedHandler: Send + Sync {
    fn dispatch(&self, payload: Value, reply: oneshot::Sender<Reply>, stats: Arc<QueueStats>, request_id: u64);
}

struct TypedHandler<Q, H> {
    handler: H,
    _queue: PhantomData<fn() -> Q>,
}

impl<Q: Queue, H: Handler<Q>> ErasedHandler for TypedHandler<Q, H> {
    fn dispatch(&self, payload: Value, reply: oneshot::Sender<Reply>, stats: Arc<QueueStats>, request_id: u64) {
        let responder = Responder::<Q>::new(reply, stats, request_id);
        match serde_json::from_value::<Q::Payload>(payload) {
            Ok(payload) => self.handler.handle(payload, responder),
            Err(e) => {
                error!(queue = Q::NAME, request_id, error = %e, "Malformed payload");
                responder.nack(Nack::protocol_violation(format!("malformed payload on {}: {e}", Q::NAME)));
            }
        }
    }
}

struct Slot {
    registration_id: u64,
    payload_type: TypeId,
    response_type: TypeId,
    handler: Arc<dyn ErasedHandler>,
}

#[derive(Default)]
struct Inner {
    slots: DashMap<&'static str, Slot>,
    stats: DashMap<&'static str, Arc<QueueStats>>,
    next_registration: AtomicU64,
    next_request: AtomicU64,
}

impl Inner {
    fn stats_for(&self, queue: &'static str) -> Arc<QueueStats> {
        Arc::clone(self.stats.entry(queue).or_default().value())
    }
}

/// Named-queue request/response broker.
///
/// Cloning is cheap; all clones share the same queues.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the single consumer of queue `Q`.
    ///
    /// Fails if the queue already has a consumer. The returned handle
    /// deregisters the consumer when dropped.
    pub fn register<Q: Queue, H: Handler<Q>>(&self, handler: H) -> Result<Registration> {
        match self.inner.slots.entry(Q::NAME) {
            Entry::Occupied(_) => {
                warn!(queue = Q::NAME, "Rejected second consumer registration");
                Err(BrokerError::AlreadyRegistered { queue: Q::NAME })
            }
            Entry::Vacant(vacant) => {
                let registration_id = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot {
                    registration_id,
                    payload_type: TypeId::of::<Q::Payload>(),
                    response_type: TypeId::of::<Q::Response>(),
                    handler: Arc::new(TypedHandler::<Q, H> {
                        handler,
                        _queue: PhantomData,
                    }),
                });
                info!(queue = Q::NAME, registration_id, "Consumer registered");
                Ok(Registration {
                    inner: Arc::downgrade(&self.inner),
                    queue: Q::NAME,
                    registration_id,
                })
            }
        }
    }

    /// Register an async closure as the consumer of queue `Q`
    pub fn register_fn<Q, F, Fut>(&self, f: F) -> Result<Registration>
    where
        Q: Queue,
        F: Fn(Q::Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Q::Response, Nack>> + Send + 'static,
    {
        self.register::<Q, _>(handler_fn(f))
    }

    #[must_use]
    pub fn has_consumer(&self, queue: &str) -> bool {
        self.inner.slots.contains_key(queue)
    }

    /// Deliver `payload` to the consumer of `Q` and return the in-flight request.
    ///
    /// The consumer's `handle` runs before this returns, so sequential
    /// dispatches on one queue reach the consumer in order.
    pub fn dispatch<Q: Queue>(&self, payload: &Q::Payload) -> Result<Pending<Q>> {
        let stats = self.inner.stats_for(Q::NAME);

        // Clone the handler out so the slot is not locked while it runs
        let handler = {
            let Some(slot) = self.inner.slots.get(Q::NAME) else {
                stats.no_consumer.fetch_add(1, Ordering::Relaxed);
                warn!(queue = Q::NAME, "Request sent to a queue without consumer");
                return Err(BrokerError::NoConsumer { queue: Q::NAME });
            };
            if slot.payload_type != TypeId::of::<Q::Payload>()
                || slot.response_type != TypeId::of::<Q::Response>()
            {
                error!(queue = Q::NAME, "Request types differ from the registered consumer");
                return Err(BrokerError::ProtocolViolation {
                    queue: Q::NAME,
                    reason: "payload or response type differs from the registered consumer"
                        .to_string(),
                });
            }
            Arc::clone(&slot.handler)
        };

        let value = serde_json::to_value(payload).map_err(|e| BrokerError::ProtocolViolation {
            queue: Q::NAME,
            reason: format!("unencodable payload: {e}"),
        })?;

        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        stats.sent.fetch_add(1, Ordering::Relaxed);
        debug!(queue = Q::NAME, request_id, "Dispatching request");

        handler.dispatch(value, tx, Arc::clone(&stats), request_id);

        Ok(Pending {
            rx,
            request_id,
            stats,
            _queue: PhantomData,
        })
    }

    /// Send a request and wait for the reply
    pub async fn request<Q: Queue>(&self, payload: &Q::Payload) -> Result<Q::Response> {
        self.dispatch::<Q>(payload)?.response().await
    }

    /// Send a request and wait at most `timeout` for the reply
    pub async fn request_timeout<Q: Queue>(
        &self,
        payload: &Q::Payload,
        timeout: Duration,
    ) -> Result<Q::Response> {
        self.dispatch::<Q>(payload)?.response_within(timeout).await
    }

    /// Callback-style send: exactly one of `on_ack` or `on_nack` is called.
    ///
    /// Dispatch failures call `on_nack` before this returns; replies are
    /// delivered from a spawned task.
    pub fn send<Q, A, N>(&self, payload: &Q::Payload, on_ack: A, on_nack: N)
    where
        Q: Queue,
        A: FnOnce(Q::Response) + Send + 'static,
        N: FnOnce(BrokerError) + Send + 'static,
    {
        match self.dispatch::<Q>(payload) {
            Ok(pending) => {
                tokio::spawn(async move {
                    match pending.response().await {
                        Ok(response) => on_ack(response),
                        Err(err) => on_nack(err),
                    }
                });
            }
            Err(err) => on_nack(err),
        }
    }

    /// Counters for every queue that has seen traffic or a consumer
    #[must_use]
    pub fn queue_stats(&self) -> Vec<QueueStatsSnapshot> {
        let mut snapshots: Vec<QueueStatsSnapshot> = self
            .inner
            .stats
            .iter()
            .map(|entry| {
                let stats = entry.value();
                QueueStatsSnapshot {
                    queue: (*entry.key()).to_string(),
                    has_consumer: self.inner.slots.contains_key(entry.key()),
                    sent: stats.sent.load(Ordering::Relaxed),
                    acked: stats.acked.load(Ordering::Relaxed),
                    nacked: stats.nacked.load(Ordering::Relaxed),
                    abandoned: stats.abandoned.load(Ordering::Relaxed),
                    no_consumer: stats.no_consumer.load(Ordering::Relaxed),
                    timed_out: stats.timed_out.load(Ordering::Relaxed),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.queue.cmp(&b.queue));
        snapshots
    }
}

/// Handle for a queue consumer; dropping it frees the queue slot
#[must_use = "dropping a Registration deregisters the consumer"]
pub struct Registration {
    inner: Weak<Inner>,
    queue: &'static str,
    registration_id: u64,
}

impl Registration {
    #[must_use]
    pub const fn queue(&self) -> &'static str {
        self.queue
    }

    /// Deregister explicitly
    pub fn deregister(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        // Only free the slot if it still belongs to this registration
        let removed = inner
            .slots
            .remove_if(self.queue, |_, slot| slot.registration_id == self.registration_id);
        if removed.is_some() {
            info!(queue = self.queue, registration_id = self.registration_id, "Consumer deregistered");
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("queue", &self.queue)
            .field("registration_id", &self.registration_id)
            .finish()
    }
}
