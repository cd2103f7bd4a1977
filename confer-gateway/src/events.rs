use chrono::{DateTime, Utc};
use confer_broker::messages::{MemberInfo, MemberState, SpaceData};
use confer_core::{ErrorCode, MemberId};
use serde::{Deserialize, Serialize};

/// Events pushed from the gateway to a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// The space is open on the coordinator
    ConnectionSuccessful { timestamp: DateTime<Utc> },

    /// Joining failed; only a stable code is exposed to the client
    ConnectionFailed {
        code: ErrorCode,
        timestamp: DateTime<Utc>,
    },

    /// Sent once to the joining member before any space-wide event
    SpaceInit {
        data: SpaceData,
        member_id: MemberId,
        members: Vec<MemberInfo>,
        timestamp: DateTime<Utc>,
    },

    MemberJoin {
        member: MemberInfo,
        timestamp: DateTime<Utc>,
    },

    MemberLeave {
        member_id: MemberId,
        timestamp: DateTime<Utc>,
    },

    MemberStateUpdate {
        member_id: MemberId,
        new_state: MemberState,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// Get event type as string
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionSuccessful { .. } => "connectionSuccessful",
            Self::ConnectionFailed { .. } => "connectionFailed",
            Self::SpaceInit { .. } => "spaceInit",
            Self::MemberJoin { .. } => "memberJoin",
            Self::MemberLeave { .. } => "memberLeave",
            Self::MemberStateUpdate { .. } => "memberStateUpdate",
        }
    }

    /// Whether the event is fanned out to a whole space
    #[must_use]
    pub const fn is_space_wide(&self) -> bool {
        matches!(
            self,
            Self::MemberJoin { .. } | Self::MemberLeave { .. } | Self::MemberStateUpdate { .. }
        )
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ConnectionSuccessful { timestamp }
            | Self::ConnectionFailed { timestamp, .. }
            | Self::SpaceInit { timestamp, .. }
            | Self::MemberJoin { timestamp, .. }
            | Self::MemberLeave { timestamp, .. }
            | Self::MemberStateUpdate { timestamp, .. } => *timestamp,
        }
    }
}
