//! Payload and response shapes carried on the broker queues
//!
//! Field names are camelCase on the wire; acknowledgement-only queues use `()`.

use confer_core::{MemberId, RouterId, SpaceId, TransportId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Space configuration handed to clients when they subscribe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceData {
    pub space_id: SpaceId,
    pub router_id: RouterId,
    /// Parameters every transport in the space must be compatible with
    pub capabilities: Value,
}

/// Arbitrary client-supplied member profile (display name, avatar, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberProfile(pub Value);

impl MemberProfile {
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }
}

/// Mutable member state. Unknown keys are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberState {
    #[serde(default)]
    pub audio_muted: bool,
    #[serde(default)]
    pub video_muted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemberState {
    /// Apply a partial update; absent fields keep their value
    pub fn merge(&mut self, patch: MemberStatePatch) {
        if let Some(audio_muted) = patch.audio_muted {
            self.audio_muted = audio_muted;
        }
        if let Some(video_muted) = patch.video_muted {
            self.video_muted = video_muted;
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }
}

/// Partial member state; a `null` extra key removes it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_muted: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lifecycle of a transport. Status only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Unallocated,
    Allocated,
    Connected,
    /// Owner torn down, worker-side teardown not yet acknowledged
    Closed,
}

impl TransportStatus {
    /// Whether `self -> next` is a legal transition (staying put is allowed)
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next >= self && (self != Self::Closed || next == Self::Closed)
    }
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unallocated => "unallocated",
            Self::Allocated => "allocated",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Connection-negotiation parameters produced by the worker, opaque to the coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportOptions(pub Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRouterPayload {
    pub assigned_id: RouterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWebRtcTransportPayload {
    pub router_id: RouterId,
    pub is_producer: bool,
    pub assigned_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransportPayload {
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRouterPayload {
    pub router_id: RouterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeToSpacePayload {
    pub space_id: SpaceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeToSpaceResponse {
    pub data: SpaceData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberPayload {
    pub space_id: SpaceId,
    #[serde(default)]
    pub member_profile: MemberProfile,
    #[serde(default)]
    pub member_state: MemberState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberResponse {
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberPayload {
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeFromSpacePayload {
    pub space_id: SpaceId,
}

/// Negotiated metadata reported for a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportUpdatePayload {
    pub transport_id: TransportId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransportStatus>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberStatePayload {
    pub member_id: MemberId,
    pub state: MemberStatePatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMemberStateResponse {
    pub state: MemberState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberTransportsPayload {
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub transport_id: TransportId,
    pub is_producer: bool,
    /// Member whose media this consumer transport receives
    pub peer_member_id: Option<MemberId>,
    pub status: TransportStatus,
    pub options: Option<TransportOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberTransportsResponse {
    pub transports: Vec<TransportInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceMembersPayload {
    pub space_id: SpaceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub member_id: MemberId,
    pub profile: MemberProfile,
    pub state: MemberState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceMembersResponse {
    pub members: Vec<MemberInfo>,
}
