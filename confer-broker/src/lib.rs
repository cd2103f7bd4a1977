//! Confer Broker
//!
//! Named-queue request/response abstraction connecting the coordinator, the
//! signaling gateway and media workers. It stands in for a bidirectional
//! streaming RPC channel, so nothing crossing it is shared by reference:
//! payloads and responses are encoded to JSON on the way in and decoded on
//! the way out.
//!
//! ## Contract
//!
//! - Each queue has exactly one consumer; a second `register` fails
//! - A queue's payload and response types are fixed by its [`Queue`] type
//! - A consumer answers every request exactly once with `ack` or `nack`
//! - Sending on a queue without consumer fails with [`BrokerError::NoConsumer`]
//! - No retries, no buffering, no ordering across different queues
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confer_broker::{Broker, queue::NewRouterRequest};
//!
//! let broker = Broker::new();
//! let _registration = broker.register_fn::<NewRouterRequest, _, _>(|payload| async move {
//!     create_router(payload.assigned_id).await.map_err(Nack::from)
//! })?;
//! broker.request::<NewRouterRequest>(&NewRouterPayload { assigned_id }).await?;
//! ```

mod broker;
pub mod error;
pub mod messages;
pub mod queue;

pub use broker::{
    handler_fn, AsyncHandler, Broker, Handler, Pending, QueueStatsSnapshot, Registration,
    Responder,
};
pub use error::{BrokerError, Result};
pub use queue::Queue;
