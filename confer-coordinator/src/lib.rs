//! Confer Coordinator
//!
//! Control-plane service of the conferencing system. It keeps the
//! authoritative registry of spaces, members, routers and transports, asks
//! media workers to create and release resources, and answers the signaling
//! gateway. All interaction happens over broker queues.
//!
//! ## Mesh
//!
//! Every member of a space owns one producer transport plus one consumer
//! transport per other member. A space of N members therefore holds
//! N + N(N-1) live transports.
//!
//! ## Ordering
//!
//! Requests touching the same space are applied strictly in arrival order;
//! different spaces proceed concurrently.

pub mod coordinator;
pub mod ids;
pub mod placement;
pub mod registry;
mod serial;

pub use coordinator::{Coordinator, CoordinatorHandle};
pub use placement::{PlacementPolicy, PrimaryRouterPolicy};
pub use registry::{Registry, RegistryStats};
