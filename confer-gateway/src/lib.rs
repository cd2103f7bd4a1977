//! Confer Signaling Gateway
//!
//! Client-facing side of the control plane. Each client connection joins one
//! space; the gateway translates its intent into coordinator requests over
//! the broker and fans space-wide events out to the other members.
//!
//! ## Events
//!
//! - `connectionSuccessful`, `connectionFailed { code }`: join outcome
//! - `spaceInit { data, memberId, members }`: first event after joining
//! - `memberJoin`, `memberLeave`, `memberStateUpdate`: space-wide updates
//!
//! Client-visible failures only ever carry a stable [`confer_core::ErrorCode`].

pub mod error;
pub mod events;
mod gateway;
pub mod hub;

pub use error::{GatewayError, Result};
pub use events::ClientEvent;
pub use gateway::{Connection, GatewayStats, SignalingGateway};
pub use hub::{ConnectionId, SpaceHub};
