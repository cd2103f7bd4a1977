//! Named queues and their fixed payload/response pairing
//!
//! Every queue is a type implementing [`Queue`]; the broker never accepts a
//! payload or response of any other type on that queue name.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::messages::{
    AddMemberPayload, AddMemberResponse, CloseRouterPayload, CloseTransportPayload,
    MemberTransportsPayload, MemberTransportsResponse, NewRouterPayload,
    NewWebRtcTransportPayload, RemoveMemberPayload, SpaceMembersPayload, SpaceMembersResponse,
    SubscribeToSpacePayload, SubscribeToSpaceResponse, TransportOptions, TransportUpdatePayload,
    UnsubscribeFromSpacePayload, UpdateMemberStatePayload, UpdateMemberStateResponse,
};

/// A named request/response queue
pub trait Queue: Send + Sync + 'static {
    /// Queue name on the wire
    const NAME: &'static str;

    type Payload: Serialize + DeserializeOwned + Send + 'static;

    /// Success response; `()` for acknowledgement-only queues
    type Response: Serialize + DeserializeOwned + Send + 'static;
}

macro_rules! queue {
    ($(#[$meta:meta])* $ty:ident, $name:literal, $payload:ty => $response:ty) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $ty {}

        impl Queue for $ty {
            const NAME: &'static str = $name;
            type Payload = $payload;
            type Response = $response;
        }
    };
}

queue!(
    /// Coordinator -> worker: create a router under the assigned id
    NewRouterRequest, "newRouterRequest", NewRouterPayload => ()
);

queue!(
    /// Coordinator -> worker: allocate a WebRTC transport on a router
    NewWebRtcTransportRequest, "newWebRtcTransportRequest",
    NewWebRtcTransportPayload => TransportOptions
);

queue!(
    /// Coordinator -> worker: release a transport
    CloseTransportRequest, "closeTransportRequest", CloseTransportPayload => ()
);

queue!(
    /// Coordinator -> worker: release a router and everything on it
    CloseRouterRequest, "closeRouterRequest", CloseRouterPayload => ()
);

queue!(
    /// Gateway -> coordinator
    SubscribeToSpace, "subscribeToSpace",
    SubscribeToSpacePayload => SubscribeToSpaceResponse
);

queue!(
    /// Gateway -> coordinator
    AddMember, "addMember", AddMemberPayload => AddMemberResponse
);

queue!(
    /// Gateway -> coordinator
    RemoveMember, "removeMember", RemoveMemberPayload => ()
);

queue!(
    /// Gateway -> coordinator
    UnsubscribeFromSpace, "unsubscribeFromSpace", UnsubscribeFromSpacePayload => ()
);

queue!(
    /// Gateway -> coordinator
    UpdateMemberState, "updateMemberState",
    UpdateMemberStatePayload => UpdateMemberStateResponse
);

queue!(
    /// Gateway -> coordinator
    MemberTransports, "memberTransports",
    MemberTransportsPayload => MemberTransportsResponse
);

queue!(
    /// Gateway -> coordinator
    SpaceMembers, "spaceMembers", SpaceMembersPayload => SpaceMembersResponse
);

queue!(
    /// Worker -> coordinator: negotiated metadata / status change
    TransportUpdate, "transportUpdate", TransportUpdatePayload => ()
);
