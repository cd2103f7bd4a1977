//! Signaling Gateway - client sessions on top of the coordinator queues
//!
//! This module provides:
//! - Connection sessions bound to one space and one member profile
//! - The join handshake (`connectionSuccessful`, `spaceInit`, `memberJoin`)
//! - Member departure with space teardown when the last session leaves
//! - Member state updates fanned out to the whole space
//! - Per-space connection limits

use std::sync::Arc;

use chrono::Utc;
use confer_broker::messages::{
    AddMemberPayload, MemberInfo, MemberProfile, MemberState, MemberStatePatch,
    MemberTransportsPayload, RemoveMemberPayload, SpaceMembersPayload, SubscribeToSpacePayload,
    TransportInfo, UnsubscribeFromSpacePayload, UpdateMemberStatePayload,
};
use confer_broker::queue::{
    AddMember, MemberTransports, RemoveMember, SpaceMembers, SubscribeToSpace,
    UnsubscribeFromSpace, UpdateMemberState,
};
use confer_broker::Broker;
use confer_core::config::GatewayConfig;
use confer_core::{ErrorCode, MemberId, SpaceId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::events::ClientEvent;
use crate::hub::{ConnectionId, EventSender, SpaceHub};

/// An open client connection and its event stream
pub struct Connection {
    pub id: ConnectionId,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

#[derive(Debug, Clone)]
struct Session {
    space_id: SpaceId,
    profile: MemberProfile,
    member_id: Option<MemberId>,
    sender: EventSender,
}

/// Gateway statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub connections: usize,
    pub joined_members: usize,
    pub spaces: usize,
}

struct Inner {
    broker: Broker,
    config: GatewayConfig,
    hub: SpaceHub,
    sessions: DashMap<ConnectionId, Session>,
    /// Joined or joining sessions per space
    occupancy: DashMap<SpaceId, usize>,
    /// Orders joins, leaves and state updates within a space
    space_locks: DashMap<SpaceId, Arc<Mutex<()>>>,
}

#[derive(Clone)]
pub struct SignalingGateway {
    inner: Arc<Inner>,
}

impl SignalingGateway {
    #[must_use]
    pub fn new(broker: Broker, config: GatewayConfig) -> Self {
        info!(
            max_connections_per_space = config.max_connections_per_space,
            "Signaling gateway initialized"
        );
        Self {
            inner: Arc::new(Inner {
                broker,
                config,
                hub: SpaceHub::new(),
                sessions: DashMap::new(),
                occupancy: DashMap::new(),
                space_locks: DashMap::new(),
            }),
        }
    }

    /// Open a connection for a client wanting to enter `space_id`
    #[must_use]
    pub fn open(&self, space_id: SpaceId, profile: MemberProfile) -> Connection {
        let (sender, events) = mpsc::unbounded_channel();
        let id: ConnectionId = nanoid::nanoid!(16);
        self.inner.sessions.insert(
            id.clone(),
            Session {
                space_id: space_id.clone(),
                profile,
                member_id: None,
                sender,
            },
        );
        debug!(connection_id = %id, space_id = %space_id, "Connection opened");
        Connection { id, events }
    }

    /// Open a connection and run the join handshake
    pub async fn connect(&self, space_id: SpaceId, profile: MemberProfile) -> (Connection, Result<MemberId>) {
        let connection = self.open(space_id, profile);
        let joined = self.join(&connection.id).await;
        (connection, joined)
    }

    /// Join the connection's space.
    ///
    /// On failure the client receives `connectionFailed` with a stable code
    /// and the connection stays open without a member.
    pub async fn join(&self, connection_id: &str) -> Result<MemberId> {
        let session = self.session(connection_id)?;
        if let Some(member_id) = session.member_id {
            return Ok(member_id);
        }

        let lock = self.space_lock(&session.space_id);
        let _guard = lock.lock().await;

        // A concurrent join on this connection may have finished meanwhile
        let session = self.session(connection_id)?;
        if let Some(member_id) = session.member_id {
            return Ok(member_id);
        }

        let result = self.join_locked(connection_id, &session).await;
        if let Err(err) = &result {
            warn!(
                connection_id = %connection_id,
                space_id = %session.space_id,
                error = %err,
                "Join failed"
            );
            let _ = session.sender.send(ClientEvent::ConnectionFailed {
                code: err.code(),
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn join_locked(&self, connection_id: &str, session: &Session) -> Result<MemberId> {
        let space_id = &session.space_id;
        self.reserve_slot(space_id)?;

        let member_id = match self.enter_space(session).await {
            Ok(member_id) => member_id,
            Err(err) => {
                self.release_slot(space_id).await;
                return Err(err);
            }
        };

        // A disconnect may have raced the handshake
        let still_open = self
            .inner
            .sessions
            .get_mut(connection_id)
            .map(|mut s| s.member_id = Some(member_id))
            .is_some();
        if !still_open {
            self.leave_space(space_id, member_id, connection_id).await;
            return Err(GatewayError::UnknownConnection(connection_id.to_string()));
        }

        // Registered only after spaceInit went out, so no update is missed
        self.inner.hub.subscribe(
            space_id.clone(),
            member_id,
            connection_id.to_string(),
            session.sender.clone(),
        );
        self.inner.hub.broadcast(
            space_id,
            &ClientEvent::MemberJoin {
                member: MemberInfo {
                    member_id,
                    profile: session.profile.clone(),
                    state: MemberState::default(),
                },
                timestamp: Utc::now(),
            },
            Some(connection_id),
        );

        info!(connection_id = %connection_id, space_id = %space_id, member_id = %member_id, "Member connected");
        Ok(member_id)
    }

    /// Subscribe, add the member and send `spaceInit`
    async fn enter_space(&self, session: &Session) -> Result<MemberId> {
        let broker = &self.inner.broker;
        let space_id = &session.space_id;

        let data = broker
            .request::<SubscribeToSpace>(&SubscribeToSpacePayload {
                space_id: space_id.clone(),
            })
            .await?
            .data;
        let _ = session.sender.send(ClientEvent::ConnectionSuccessful {
            timestamp: Utc::now(),
        });

        let member_id = broker
            .request::<AddMember>(&AddMemberPayload {
                space_id: space_id.clone(),
                member_profile: session.profile.clone(),
                member_state: MemberState::default(),
            })
            .await?
            .member_id;

        let members = match broker
            .request::<SpaceMembers>(&SpaceMembersPayload {
                space_id: space_id.clone(),
            })
            .await
        {
            Ok(response) => response.members,
            Err(err) => {
                self.remove_member(member_id).await;
                return Err(err.into());
            }
        };

        let _ = session.sender.send(ClientEvent::SpaceInit {
            data,
            member_id,
            members,
            timestamp: Utc::now(),
        });
        Ok(member_id)
    }

    /// Close a connection, removing its member from the space
    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let (_, session) = self
            .inner
            .sessions
            .remove(connection_id)
            .ok_or_else(|| GatewayError::UnknownConnection(connection_id.to_string()))?;

        let Some(member_id) = session.member_id else {
            debug!(connection_id = %connection_id, "Connection closed before joining");
            return Ok(());
        };

        let lock = self.space_lock(&session.space_id);
        {
            let _guard = lock.lock().await;
            self.leave_space(&session.space_id, member_id, connection_id).await;
        }
        drop(lock);
        self.inner
            .space_locks
            .remove_if(&session.space_id, |_, l| Arc::strong_count(l) == 1);

        info!(connection_id = %connection_id, member_id = %member_id, "Member disconnected");
        Ok(())
    }

    async fn leave_space(&self, space_id: &SpaceId, member_id: MemberId, connection_id: &str) {
        self.inner.hub.unsubscribe(connection_id);
        self.remove_member(member_id).await;
        self.inner.hub.broadcast(
            space_id,
            &ClientEvent::MemberLeave {
                member_id,
                timestamp: Utc::now(),
            },
            None,
        );
        self.release_slot(space_id).await;
    }

    async fn remove_member(&self, member_id: MemberId) {
        if let Err(err) = self
            .inner
            .broker
            .request::<RemoveMember>(&RemoveMemberPayload { member_id })
            .await
        {
            warn!(member_id = %member_id, error = %err, "Failed to remove member");
        }
    }

    /// Merge a state patch and fan the result out to the whole space
    pub async fn update_member_state(&self, connection_id: &str, patch: MemberStatePatch) -> Result<MemberState> {
        let session = self.session(connection_id)?;
        let member_id = session
            .member_id
            .ok_or_else(|| GatewayError::NotJoined(connection_id.to_string()))?;

        let lock = self.space_lock(&session.space_id);
        let _guard = lock.lock().await;

        let state = self
            .inner
            .broker
            .request::<UpdateMemberState>(&UpdateMemberStatePayload {
                member_id,
                state: patch,
            })
            .await?
            .state;

        self.inner.hub.broadcast(
            &session.space_id,
            &ClientEvent::MemberStateUpdate {
                member_id,
                new_state: state.clone(),
                timestamp: Utc::now(),
            },
            None,
        );
        Ok(state)
    }

    /// Transport options of the connection's member
    pub async fn transports(&self, connection_id: &str) -> Result<Vec<TransportInfo>> {
        let session = self.session(connection_id)?;
        let member_id = session
            .member_id
            .ok_or_else(|| GatewayError::NotJoined(connection_id.to_string()))?;
        let response = self
            .inner
            .broker
            .request::<MemberTransports>(&MemberTransportsPayload { member_id })
            .await?;
        Ok(response.transports)
    }

    #[must_use]
    pub fn member_id(&self, connection_id: &str) -> Option<MemberId> {
        self.inner.sessions.get(connection_id).and_then(|s| s.member_id)
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.inner.sessions.len(),
            joined_members: self
                .inner
                .sessions
                .iter()
                .filter(|s| s.member_id.is_some())
                .count(),
            spaces: self.inner.hub.space_count(),
        }
    }

    fn session(&self, connection_id: &str) -> Result<Session> {
        self.inner
            .sessions
            .get(connection_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| GatewayError::UnknownConnection(connection_id.to_string()))
    }

    fn space_lock(&self, space_id: &SpaceId) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.space_locks.entry(space_id.clone()).or_default().value())
    }

    fn reserve_slot(&self, space_id: &SpaceId) -> Result<()> {
        let limit = self.inner.config.max_connections_per_space;
        let mut count = self.inner.occupancy.entry(space_id.clone()).or_insert(0);
        if limit > 0 && *count >= limit {
            return Err(GatewayError::SpaceFull {
                space_id: space_id.clone(),
                limit,
            });
        }
        *count += 1;
        Ok(())
    }

    /// Give a slot back; the last one out closes the space on the coordinator
    async fn release_slot(&self, space_id: &SpaceId) {
        let remaining = match self.inner.occupancy.get_mut(space_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return;
        }
        self.inner.occupancy.remove_if(space_id, |_, count| *count == 0);

        let result = self
            .inner
            .broker
            .request::<UnsubscribeFromSpace>(&UnsubscribeFromSpacePayload {
                space_id: space_id.clone(),
            })
            .await;
        match result {
            Ok(()) => info!(space_id = %space_id, "Space released"),
            Err(err) if matches!(err.code(), ErrorCode::Conflict | ErrorCode::NotFound) => {
                debug!(space_id = %space_id, error = %err, "Space still in use elsewhere");
            }
            Err(err) => warn!(space_id = %space_id, error = %err, "Failed to release space"),
        }
    }
}
