//! Resource registry
//!
//! Authoritative in-memory tables of spaces, members, routers and transports.
//! Every method takes the table lock for the duration of one call only; the
//! lock is never held across an await point. Values handed out are copies.
//!
//! Invariants kept by every mutation:
//! - a space has exactly one primary router while it exists
//! - each member holds one consumer transport per other member of its space
//! - a transport's status only moves forward

use std::collections::{HashMap, HashSet};

use confer_broker::messages::{
    MemberInfo, MemberProfile, MemberState, MemberStatePatch, SpaceData, TransportInfo,
    TransportOptions, TransportStatus,
};
use confer_core::{Error, MemberId, Result, RouterId, SpaceId, TransportId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SpaceRecord {
    pub id: SpaceId,
    pub primary_router: RouterId,
    pub data: SpaceData,
    pub members: HashSet<MemberId>,
}

#[derive(Debug, Clone)]
pub struct RouterRecord {
    pub id: RouterId,
    pub space: SpaceId,
}

#[derive(Debug, Clone)]
pub struct MemberRecord {
    pub id: MemberId,
    pub space: SpaceId,
    pub router: RouterId,
    pub profile: MemberProfile,
    pub state: MemberState,
    pub producer: TransportId,
    /// Other member id -> consumer transport receiving that member's media
    pub consumers: HashMap<MemberId, TransportId>,
}

#[derive(Debug, Clone)]
pub struct TransportRecord {
    pub id: TransportId,
    pub router: RouterId,
    pub owner: MemberId,
    /// For consumers, the member whose media is received
    pub peer: Option<MemberId>,
    pub is_producer: bool,
    pub status: TransportStatus,
    pub options: Option<TransportOptions>,
    pub metadata: Map<String, Value>,
}

impl TransportRecord {
    #[must_use]
    pub fn producer(id: TransportId, router: RouterId, owner: MemberId) -> Self {
        Self {
            id,
            router,
            owner,
            peer: None,
            is_producer: true,
            status: TransportStatus::Unallocated,
            options: None,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn consumer(id: TransportId, router: RouterId, owner: MemberId, peer: MemberId) -> Self {
        Self {
            peer: Some(peer),
            is_producer: false,
            ..Self::producer(id, router, owner)
        }
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            transport_id: self.id,
            is_producer: self.is_producer,
            peer_member_id: self.peer,
            status: self.status,
            options: self.options.clone(),
        }
    }
}

/// A transport detached from its owner, awaiting worker-side teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedTransport {
    pub id: TransportId,
    /// Status before closing; `Unallocated` transports never reached the worker
    pub previous: TransportStatus,
}

/// Everything needed to insert a joining member in one step
#[derive(Debug, Clone)]
pub struct MemberJoin {
    pub member: MemberRecord,
    /// The member's producer and its own consumers
    pub transports: Vec<TransportRecord>,
    /// Consumers owned by existing members, receiving the new member's media
    pub reverse: Vec<TransportRecord>,
}

impl MemberJoin {
    pub fn all_transports(&self) -> impl Iterator<Item = &TransportRecord> {
        self.transports.iter().chain(self.reverse.iter())
    }
}

/// Result of removing a space
#[derive(Debug, Clone)]
pub struct RemovedSpace {
    pub router: RouterId,
    pub closed: Vec<ClosedTransport>,
}

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub spaces: usize,
    pub members: usize,
    pub routers: usize,
    /// Transports not yet closed
    pub live_transports: usize,
    /// Closed transports awaiting worker confirmation
    pub closing_transports: usize,
}

#[derive(Default)]
struct Tables {
    spaces: HashMap<SpaceId, SpaceRecord>,
    members: HashMap<MemberId, MemberRecord>,
    routers: HashMap<RouterId, RouterRecord>,
    transports: HashMap<TransportId, TransportRecord>,
    /// Transports per router id, closing ones included
    router_transports: HashMap<RouterId, usize>,
}

impl Tables {
    fn insert_transport(&mut self, transport: TransportRecord) {
        *self.router_transports.entry(transport.router).or_insert(0) += 1;
        self.transports.insert(transport.id, transport);
    }

    fn remove_transport(&mut self, id: TransportId) -> Option<TransportRecord> {
        let transport = self.transports.remove(&id)?;
        if let Some(count) = self.router_transports.get_mut(&transport.router) {
            *count -= 1;
            if *count == 0 {
                self.router_transports.remove(&transport.router);
            }
        }
        Some(transport)
    }

    fn close_transport(&mut self, id: TransportId) -> Option<ClosedTransport> {
        let transport = self.transports.get_mut(&id)?;
        if transport.status == TransportStatus::Closed {
            return None;
        }
        let previous = transport.status;
        transport.status = TransportStatus::Closed;
        Some(ClosedTransport { id, previous })
    }

    /// Verify the full-mesh invariant for one space
    fn mesh_is_complete(&self, space_id: &SpaceId) -> bool {
        let Some(space) = self.spaces.get(space_id) else {
            return true;
        };
        space.members.iter().all(|member_id| {
            let Some(member) = self.members.get(member_id) else {
                return false;
            };
            let expected: HashSet<&MemberId> =
                space.members.iter().filter(|other| *other != member_id).collect();
            let actual: HashSet<&MemberId> = member.consumers.keys().collect();
            expected == actual
                && member.consumers.values().all(|tid| {
                    self.transports
                        .get(tid)
                        .is_some_and(|t| t.status != TransportStatus::Closed)
                })
        })
    }
}

/// The coordinator's resource tables
#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ----- lookups -----

    #[must_use]
    pub fn contains_space(&self, space_id: &SpaceId) -> bool {
        self.tables.read().spaces.contains_key(space_id)
    }

    #[must_use]
    pub fn space(&self, space_id: &SpaceId) -> Option<SpaceRecord> {
        self.tables.read().spaces.get(space_id).cloned()
    }

    #[must_use]
    pub fn space_data(&self, space_id: &SpaceId) -> Option<SpaceData> {
        self.tables.read().spaces.get(space_id).map(|s| s.data.clone())
    }

    #[must_use]
    pub fn member(&self, member_id: MemberId) -> Option<MemberRecord> {
        self.tables.read().members.get(&member_id).cloned()
    }

    #[must_use]
    pub fn transport(&self, transport_id: TransportId) -> Option<TransportRecord> {
        self.tables.read().transports.get(&transport_id).cloned()
    }

    #[must_use]
    pub fn member_space(&self, member_id: MemberId) -> Option<SpaceId> {
        self.tables.read().members.get(&member_id).map(|m| m.space.clone())
    }

    /// Space owning a live transport, through its router.
    ///
    /// A closed transport is a conflict whether or not its space still exists.
    pub fn transport_space(&self, transport_id: TransportId) -> Result<SpaceId> {
        let tables = self.tables.read();
        let transport = tables
            .transports
            .get(&transport_id)
            .ok_or_else(|| Error::NotFound(format!("transport {transport_id} not found")))?;
        if transport.status == TransportStatus::Closed {
            return Err(Error::Conflict(format!("transport {transport_id} is closed")));
        }
        tables
            .routers
            .get(&transport.router)
            .map(|r| r.space.clone())
            .ok_or_else(|| Error::NotFound(format!("router {} not found", transport.router)))
    }

    #[must_use]
    pub fn is_member_live(&self, member_id: MemberId) -> bool {
        self.tables.read().members.contains_key(&member_id)
    }

    /// A router id stays live while its space, a member or a transport uses it
    #[must_use]
    pub fn is_router_live(&self, router_id: RouterId) -> bool {
        let tables = self.tables.read();
        tables.routers.contains_key(&router_id) || tables.router_transports.contains_key(&router_id)
    }

    #[must_use]
    pub fn is_transport_live(&self, transport_id: TransportId) -> bool {
        self.tables.read().transports.contains_key(&transport_id)
    }

    #[must_use]
    pub fn consumer_count(&self, member_id: MemberId) -> Option<usize> {
        self.tables.read().members.get(&member_id).map(|m| m.consumers.len())
    }

    pub fn space_members(&self, space_id: &SpaceId) -> Result<Vec<MemberInfo>> {
        let tables = self.tables.read();
        let space = tables
            .spaces
            .get(space_id)
            .ok_or_else(|| Error::NotFound(format!("space {space_id} not found")))?;

        let mut members: Vec<MemberInfo> = space
            .members
            .iter()
            .filter_map(|id| tables.members.get(id))
            .map(|m| MemberInfo {
                member_id: m.id,
                profile: m.profile.clone(),
                state: m.state.clone(),
            })
            .collect();
        members.sort_by_key(|m| m.member_id);
        Ok(members)
    }

    pub fn member_transports(&self, member_id: MemberId) -> Result<Vec<TransportInfo>> {
        let tables = self.tables.read();
        let member = tables
            .members
            .get(&member_id)
            .ok_or_else(|| Error::NotFound(format!("member {member_id} not found")))?;

        let mut infos = Vec::with_capacity(member.consumers.len() + 1);
        if let Some(producer) = tables.transports.get(&member.producer) {
            infos.push(producer.info());
        }
        let mut consumers: Vec<&TransportRecord> = member
            .consumers
            .values()
            .filter_map(|tid| tables.transports.get(tid))
            .collect();
        consumers.sort_by_key(|t| t.peer);
        infos.extend(consumers.into_iter().map(TransportRecord::info));
        Ok(infos)
    }

    #[must_use]
    pub fn mesh_is_complete(&self, space_id: &SpaceId) -> bool {
        self.tables.read().mesh_is_complete(space_id)
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let tables = self.tables.read();
        let closing = tables
            .transports
            .values()
            .filter(|t| t.status == TransportStatus::Closed)
            .count();
        RegistryStats {
            spaces: tables.spaces.len(),
            members: tables.members.len(),
            routers: tables.routers.len(),
            live_transports: tables.transports.len() - closing,
            closing_transports: closing,
        }
    }

    // ----- mutations -----

    /// Create a space together with its primary router
    pub fn insert_space(&self, data: SpaceData) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.spaces.contains_key(&data.space_id) {
            return Err(Error::Conflict(format!("space {} already exists", data.space_id)));
        }
        if tables.routers.contains_key(&data.router_id) {
            return Err(Error::IdCollision {
                kind: RouterId::KIND,
                id: data.router_id.get(),
            });
        }

        tables.routers.insert(
            data.router_id,
            RouterRecord {
                id: data.router_id,
                space: data.space_id.clone(),
            },
        );
        tables.spaces.insert(
            data.space_id.clone(),
            SpaceRecord {
                id: data.space_id.clone(),
                primary_router: data.router_id,
                data,
                members: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Remove an empty space and its router
    pub fn remove_space(&self, space_id: &SpaceId) -> Result<RemovedSpace> {
        let mut tables = self.tables.write();
        let space = tables
            .spaces
            .get(space_id)
            .ok_or_else(|| Error::NotFound(format!("space {space_id} not found")))?;
        if !space.members.is_empty() {
            return Err(Error::Conflict(format!(
                "space {space_id} still not empty ({} members)",
                space.members.len()
            )));
        }

        let router = space.primary_router;
        tables.spaces.remove(space_id);
        tables.routers.remove(&router);

        // Transports still on the vacated router are reclaimed with it
        let leftover: Vec<TransportId> = tables
            .transports
            .values()
            .filter(|t| t.router == router)
            .map(|t| t.id)
            .collect();
        let closed = leftover
            .into_iter()
            .filter_map(|id| tables.close_transport(id))
            .collect();

        Ok(RemovedSpace { router, closed })
    }

    /// Insert a joining member, its transports and the reverse consumers of
    /// existing members in one step.
    pub fn insert_member(&self, join: MemberJoin) -> Result<()> {
        let mut tables = self.tables.write();
        let member = &join.member;

        let space = tables
            .spaces
            .get(&member.space)
            .ok_or_else(|| Error::NotFound(format!("space {} not found", member.space)))?;
        if tables.members.contains_key(&member.id) {
            return Err(Error::IdCollision {
                kind: MemberId::KIND,
                id: member.id.get(),
            });
        }
        match tables.routers.get(&member.router) {
            Some(router) if router.space == member.space => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "router {} does not serve space {}",
                    member.router, member.space
                )))
            }
        }

        // The planned mesh must match the current membership exactly
        let planned: HashSet<MemberId> = member.consumers.keys().copied().collect();
        if planned != space.members {
            return Err(Error::Conflict(format!(
                "membership of space {} changed while member {} was joining",
                member.space, member.id
            )));
        }
        for transport in join.all_transports() {
            if tables.transports.contains_key(&transport.id) {
                return Err(Error::IdCollision {
                    kind: TransportId::KIND,
                    id: transport.id.get(),
                });
            }
        }

        let space_id = member.space.clone();
        let member_id = member.id;
        let MemberJoin {
            member,
            transports,
            reverse,
        } = join;

        for transport in reverse {
            if let Some(existing) = tables.members.get_mut(&transport.owner) {
                existing.consumers.insert(member_id, transport.id);
            }
            tables.insert_transport(transport);
        }
        for transport in transports {
            tables.insert_transport(transport);
        }
        tables.members.insert(member_id, member);
        if let Some(space) = tables.spaces.get_mut(&space_id) {
            space.members.insert(member_id);
        }

        debug_assert!(tables.mesh_is_complete(&space_id));
        Ok(())
    }

    /// Remove a member, detaching its transports and every other member's
    /// consumer of its media. Returns the transports that were closed.
    pub fn remove_member(&self, member_id: MemberId) -> Result<Vec<ClosedTransport>> {
        let mut tables = self.tables.write();
        let member = tables
            .members
            .remove(&member_id)
            .ok_or_else(|| Error::NotFound(format!("member {member_id} not found")))?;

        let mut retired = Vec::with_capacity(member.consumers.len() * 2 + 1);
        retired.push(member.producer);
        retired.extend(member.consumers.values().copied());

        if let Some(space) = tables.spaces.get_mut(&member.space) {
            space.members.remove(&member_id);
        }
        for other in tables.members.values_mut() {
            if other.space == member.space {
                if let Some(tid) = other.consumers.remove(&member_id) {
                    retired.push(tid);
                }
            }
        }

        let closed = retired
            .into_iter()
            .filter_map(|tid| tables.close_transport(tid))
            .collect();

        debug_assert!(tables.mesh_is_complete(&member.space));
        Ok(closed)
    }

    /// Record the worker's allocation of a transport
    pub fn mark_allocated(&self, transport_id: TransportId, options: TransportOptions) -> Result<()> {
        let mut tables = self.tables.write();
        let transport = tables
            .transports
            .get_mut(&transport_id)
            .ok_or_else(|| Error::NotFound(format!("transport {transport_id} not found")))?;
        if !transport.status.can_advance_to(TransportStatus::Allocated) {
            return Err(Error::Conflict(format!(
                "transport {transport_id} cannot move from {} to allocated",
                transport.status
            )));
        }
        transport.status = TransportStatus::Allocated;
        transport.options = Some(options);
        Ok(())
    }

    /// Apply a transport update reported by the worker
    pub fn update_transport(
        &self,
        transport_id: TransportId,
        status: Option<TransportStatus>,
        metadata: Map<String, Value>,
    ) -> Result<TransportStatus> {
        let mut tables = self.tables.write();
        let transport = tables
            .transports
            .get_mut(&transport_id)
            .ok_or_else(|| Error::NotFound(format!("transport {transport_id} not found")))?;

        if transport.status == TransportStatus::Closed {
            return Err(Error::Conflict(format!("transport {transport_id} is closed")));
        }
        if let Some(next) = status {
            if next == TransportStatus::Closed || !transport.status.can_advance_to(next) {
                return Err(Error::Conflict(format!(
                    "transport {transport_id} cannot move from {} to {next}",
                    transport.status
                )));
            }
            transport.status = next;
        }
        transport.metadata.extend(metadata);
        Ok(transport.status)
    }

    /// Drop a closed transport once the worker has released it
    pub fn forget_transport(&self, transport_id: TransportId) -> bool {
        let mut tables = self.tables.write();
        match tables.transports.get(&transport_id) {
            Some(t) if t.status == TransportStatus::Closed => {
                tables.remove_transport(transport_id);
                debug!(transport_id = %transport_id, "Transport forgotten");
                true
            }
            _ => false,
        }
    }

    pub fn update_member_state(&self, member_id: MemberId, patch: MemberStatePatch) -> Result<MemberState> {
        let mut tables = self.tables.write();
        let member = tables
            .members
            .get_mut(&member_id)
            .ok_or_else(|| Error::NotFound(format!("member {member_id} not found")))?;
        member.state.merge(patch);
        Ok(member.state.clone())
    }
}
