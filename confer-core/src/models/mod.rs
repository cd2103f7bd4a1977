pub mod id;

pub use id::{MemberId, RouterId, SpaceId, TransportId};
