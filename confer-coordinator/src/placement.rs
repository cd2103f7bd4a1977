//! Router placement
//!
//! Decides which router serves a joining member. Today every space has a
//! single primary router on the only worker; a load-aware policy spreading
//! members over several workers plugs in here.

use confer_core::{MemberId, RouterId};

use crate::registry::SpaceRecord;

/// Chooses the router a member's transports are created on
#[cfg_attr(test, mockall::automock)]
pub trait PlacementPolicy: Send + Sync {
    fn choose_router(&self, space: &SpaceRecord, member_id: MemberId) -> RouterId;

    /// Policy name for logs
    fn name(&self) -> &'static str;
}

/// Every member uses the space's primary router
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryRouterPolicy;

impl PlacementPolicy for PrimaryRouterPolicy {
    fn choose_router(&self, space: &SpaceRecord, _member_id: MemberId) -> RouterId {
        space.primary_router
    }

    fn name(&self) -> &'static str {
        "primary_router"
    }
}
