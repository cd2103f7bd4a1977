//! Coordinator - orchestration of spaces, members and media resources
//!
//! This module provides:
//! - Broker consumers for every gateway- and worker-facing coordinator queue
//! - Router creation on first subscription, teardown on unsubscription
//! - Full-mesh transport allocation on join, narrow teardown on leave
//! - Per-space ordering of every mutating request
//! - Timeouts on every request sent to a worker

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use confer_broker::messages::{
    AddMemberPayload, AddMemberResponse, CloseRouterPayload, CloseTransportPayload,
    MemberTransportsPayload, MemberTransportsResponse, NewRouterPayload,
    NewWebRtcTransportPayload, RemoveMemberPayload, SpaceData, SpaceMembersPayload,
    SpaceMembersResponse, SubscribeToSpacePayload, SubscribeToSpaceResponse, TransportStatus,
    TransportUpdatePayload, UnsubscribeFromSpacePayload, UpdateMemberStatePayload,
    UpdateMemberStateResponse,
};
use confer_broker::queue::{
    AddMember, CloseRouterRequest, CloseTransportRequest, MemberTransports, NewRouterRequest,
    NewWebRtcTransportRequest, RemoveMember, SpaceMembers, SubscribeToSpace, TransportUpdate,
    UnsubscribeFromSpace, UpdateMemberState,
};
use confer_broker::{Broker, BrokerError, Handler, Queue, Registration, Responder};
use confer_core::config::CoordinatorConfig;
use confer_core::{Error, MemberId, Nack, Result, RouterId, SpaceId, TransportId};
use futures::future::join_all;
use tracing::{debug, info, warn, Instrument};

use crate::ids::IdAllocators;
use crate::placement::{PlacementPolicy, PrimaryRouterPolicy};
use crate::registry::{
    ClosedTransport, MemberJoin, MemberRecord, Registry, RegistryStats, TransportRecord,
};
use crate::serial::SpaceSerializer;

struct Inner {
    broker: Broker,
    registry: Registry,
    ids: IdAllocators,
    placement: Arc<dyn PlacementPolicy>,
    serializer: SpaceSerializer,
    config: CoordinatorConfig,
}

/// The control-plane coordinator.
///
/// Owns the registry exclusively; collaborators reach it only through the
/// broker queues installed by [`Coordinator::start`].
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

/// Consumer registrations of a running coordinator; dropping stops it
#[must_use = "dropping the handle deregisters the coordinator"]
pub struct CoordinatorHandle {
    registrations: Vec<Registration>,
}

impl CoordinatorHandle {
    #[must_use]
    pub fn queues(&self) -> Vec<&'static str> {
        self.registrations.iter().map(Registration::queue).collect()
    }
}

impl Coordinator {
    /// Create a coordinator placing every member on its space's primary router
    #[must_use]
    pub fn new(broker: Broker, config: CoordinatorConfig) -> Self {
        Self::with_placement(broker, config, Arc::new(PrimaryRouterPolicy))
    }

    #[must_use]
    pub fn with_placement(
        broker: Broker,
        config: CoordinatorConfig,
        placement: Arc<dyn PlacementPolicy>,
    ) -> Self {
        info!(
            request_timeout_ms = config.request_timeout_ms,
            id_modulus = config.id_modulus,
            placement = placement.name(),
            "Coordinator initialized"
        );
        Self {
            inner: Arc::new(Inner {
                broker,
                registry: Registry::new(),
                ids: IdAllocators::new(config.id_modulus),
                placement,
                serializer: SpaceSerializer::new(),
                config,
            }),
        }
    }

    /// Install the coordinator as consumer of its queues
    pub fn start(&self) -> std::result::Result<CoordinatorHandle, BrokerError> {
        let broker = &self.inner.broker;
        let consumer = || QueueConsumer {
            inner: Arc::clone(&self.inner),
        };

        let registrations = vec![
            broker.register::<SubscribeToSpace, _>(consumer())?,
            broker.register::<AddMember, _>(consumer())?,
            broker.register::<RemoveMember, _>(consumer())?,
            broker.register::<UnsubscribeFromSpace, _>(consumer())?,
            broker.register::<TransportUpdate, _>(consumer())?,
            broker.register::<UpdateMemberState, _>(consumer())?,
            broker.register::<MemberTransports, _>(consumer())?,
            broker.register::<SpaceMembers, _>(consumer())?,
        ];

        info!(queues = registrations.len(), "Coordinator started");
        Ok(CoordinatorHandle { registrations })
    }

    /// Read access for diagnostics and tests
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }

    /// Spaces with a running serialization task
    #[must_use]
    pub fn active_spaces(&self) -> usize {
        self.inner.serializer.active_spaces()
    }
}

/// Broker consumer; routes each request onto its space's queue
struct QueueConsumer {
    inner: Arc<Inner>,
}

impl QueueConsumer {
    /// Run `work` serialized with every other request of `space_id`
    fn serialize<Q, F, Fut>(&self, space_id: SpaceId, responder: Responder<Q>, work: F)
    where
        Q: Queue,
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Q::Response>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!(
            "coordinator",
            queue = Q::NAME,
            request_id = responder.request_id(),
            space_id = %space_id
        );
        self.inner.serializer.submit(
            &space_id,
            async move {
                let result = work(inner).await;
                if let Err(err) = &result {
                    warn!(error = %err, "Request failed");
                }
                responder.respond(result.map_err(Nack::from));
            }
            .instrument(span),
        );
    }
}

impl Handler<SubscribeToSpace> for QueueConsumer {
    fn handle(&self, payload: SubscribeToSpacePayload, responder: Responder<SubscribeToSpace>) {
        let space_id = payload.space_id.clone();
        self.serialize(space_id, responder, move |inner| async move {
            inner.subscribe_to_space(payload).await
        });
    }
}

impl Handler<AddMember> for QueueConsumer {
    fn handle(&self, payload: AddMemberPayload, responder: Responder<AddMember>) {
        let space_id = payload.space_id.clone();
        self.serialize(space_id, responder, move |inner| async move {
            inner.add_member(payload).await
        });
    }
}

impl Handler<RemoveMember> for QueueConsumer {
    fn handle(&self, payload: RemoveMemberPayload, responder: Responder<RemoveMember>) {
        let Some(space_id) = self.inner.registry.member_space(payload.member_id) else {
            responder.nack(Nack::not_found(format!("member {} not found", payload.member_id)));
            return;
        };
        self.serialize(space_id, responder, move |inner| async move {
            inner.remove_member(payload.member_id)
        });
    }
}

impl Handler<UnsubscribeFromSpace> for QueueConsumer {
    fn handle(&self, payload: UnsubscribeFromSpacePayload, responder: Responder<UnsubscribeFromSpace>) {
        let space_id = payload.space_id.clone();
        self.serialize(space_id, responder, move |inner| async move {
            inner.unsubscribe_from_space(&payload.space_id)
        });
    }
}

impl Handler<TransportUpdate> for QueueConsumer {
    fn handle(&self, payload: TransportUpdatePayload, responder: Responder<TransportUpdate>) {
        let space_id = match self.inner.registry.transport_space(payload.transport_id) {
            Ok(space_id) => space_id,
            Err(err) => {
                responder.nack(Nack::from(err));
                return;
            }
        };
        self.serialize(space_id, responder, move |inner| async move {
            inner.transport_update(payload)
        });
    }
}

impl Handler<UpdateMemberState> for QueueConsumer {
    fn handle(&self, payload: UpdateMemberStatePayload, responder: Responder<UpdateMemberState>) {
        let Some(space_id) = self.inner.registry.member_space(payload.member_id) else {
            responder.nack(Nack::not_found(format!("member {} not found", payload.member_id)));
            return;
        };
        self.serialize(space_id, responder, move |inner| async move {
            inner.update_member_state(payload)
        });
    }
}

impl Handler<MemberTransports> for QueueConsumer {
    fn handle(&self, payload: MemberTransportsPayload, responder: Responder<MemberTransports>) {
        let result = self
            .inner
            .registry
            .member_transports(payload.member_id)
            .map(|transports| MemberTransportsResponse { transports });
        responder.respond(result.map_err(Nack::from));
    }
}

impl Handler<SpaceMembers> for QueueConsumer {
    fn handle(&self, payload: SpaceMembersPayload, responder: Responder<SpaceMembers>) {
        let result = self
            .inner
            .registry
            .space_members(&payload.space_id)
            .map(|members| SpaceMembersResponse { members });
        responder.respond(result.map_err(Nack::from));
    }
}

impl Inner {
    async fn subscribe_to_space(self: &Arc<Self>, payload: SubscribeToSpacePayload) -> Result<SubscribeToSpaceResponse> {
        let space_id = payload.space_id;
        if let Some(data) = self.registry.space_data(&space_id) {
            debug!("Space already open");
            return Ok(SubscribeToSpaceResponse { data });
        }

        let router_id = self.ids.router(|id| self.registry.is_router_live(id))?;
        let created = self
            .broker
            .request_timeout::<NewRouterRequest>(
                &NewRouterPayload {
                    assigned_id: router_id,
                },
                self.config.request_timeout(),
            )
            .await;
        if let Err(err) = created {
            // A late answer means the router exists on the worker after all
            if err.is_timeout() {
                self.release_router(router_id, true);
            }
            return Err(err.into_upstream());
        }

        let data = SpaceData {
            space_id: space_id.clone(),
            router_id,
            capabilities: self.config.space_capabilities.clone(),
        };
        if let Err(err) = self.registry.insert_space(data.clone()) {
            self.release_router(router_id, false);
            return Err(err);
        }

        info!(router_id = %router_id, "Space opened");
        Ok(SubscribeToSpaceResponse { data })
    }

    async fn add_member(self: &Arc<Self>, payload: AddMemberPayload) -> Result<AddMemberResponse> {
        let space = self
            .registry
            .space(&payload.space_id)
            .ok_or_else(|| Error::NotFound(format!("space {} not found", payload.space_id)))?;

        let member_id = self.ids.member(|id| self.registry.is_member_live(id))?;
        let router = self.placement.choose_router(&space, member_id);
        let next_transport = || self.ids.transport(|id| self.registry.is_transport_live(id));

        // Producer, one consumer per existing member, and the mirror consumer
        // each existing member needs for the newcomer
        let producer = TransportRecord::producer(next_transport()?, router, member_id);
        let mut transports = vec![producer.clone()];
        let mut reverse = Vec::with_capacity(space.members.len());
        let mut consumers = HashMap::with_capacity(space.members.len());
        for existing in &space.members {
            let own = TransportRecord::consumer(next_transport()?, router, member_id, *existing);
            consumers.insert(*existing, own.id);
            transports.push(own);
            reverse.push(TransportRecord::consumer(
                next_transport()?,
                router,
                *existing,
                member_id,
            ));
        }

        let join = MemberJoin {
            member: MemberRecord {
                id: member_id,
                space: space.id.clone(),
                router,
                profile: payload.member_profile,
                state: payload.member_state,
                producer: producer.id,
                consumers,
            },
            transports,
            reverse,
        };
        let planned: Vec<(TransportId, bool)> =
            join.all_transports().map(|t| (t.id, t.is_producer)).collect();
        self.registry.insert_member(join)?;

        // Allocate every transport on the worker concurrently
        let timeout = self.config.request_timeout();
        let results = join_all(planned.iter().map(|&(transport_id, is_producer)| async move {
            self.broker
                .request_timeout::<NewWebRtcTransportRequest>(
                    &NewWebRtcTransportPayload {
                        router_id: router,
                        is_producer,
                        assigned_id: transport_id,
                    },
                    timeout,
                )
                .await
        }))
        .await;

        let mut failure: Option<Error> = None;
        // Allocated on the worker, or possibly so, without being recorded
        let mut unconfirmed = HashSet::new();
        for (&(transport_id, _), result) in planned.iter().zip(results) {
            let allocated = match result {
                Ok(options) => self.registry.mark_allocated(transport_id, options).inspect_err(|_| {
                    unconfirmed.insert(transport_id);
                }),
                Err(err) => {
                    if err.is_timeout() {
                        unconfirmed.insert(transport_id);
                    }
                    Err(err.into_upstream())
                }
            };
            if let Err(err) = allocated {
                warn!(member_id = %member_id, transport_id = %transport_id, error = %err, "Transport allocation failed");
                failure.get_or_insert(err);
            }
        }

        if let Some(err) = failure {
            // Roll the whole join back; the mesh stays as it was
            let closed = self.registry.remove_member(member_id)?;
            self.retire_transports(closed, &unconfirmed);
            return Err(err);
        }

        info!(
            member_id = %member_id,
            router_id = %router,
            transports = planned.len(),
            "Member joined"
        );
        Ok(AddMemberResponse { member_id })
    }

    fn remove_member(self: &Arc<Self>, member_id: MemberId) -> Result<()> {
        let closed = self.registry.remove_member(member_id)?;
        info!(member_id = %member_id, transports = closed.len(), "Member left");
        self.retire_transports(closed, &HashSet::new());
        Ok(())
    }

    fn unsubscribe_from_space(self: &Arc<Self>, space_id: &SpaceId) -> Result<()> {
        let removed = self.registry.remove_space(space_id)?;
        info!(router_id = %removed.router, "Space closed");

        self.retire_transports(removed.closed, &HashSet::new());
        self.release_router(removed.router, false);
        Ok(())
    }

    fn transport_update(&self, payload: TransportUpdatePayload) -> Result<()> {
        let status = self.registry.update_transport(
            payload.transport_id,
            payload.status,
            payload.metadata,
        )?;
        debug!(transport_id = %payload.transport_id, status = %status, "Transport updated");
        Ok(())
    }

    fn update_member_state(&self, payload: UpdateMemberStatePayload) -> Result<UpdateMemberStateResponse> {
        let state = self
            .registry
            .update_member_state(payload.member_id, payload.state)?;
        debug!(member_id = %payload.member_id, "Member state updated");
        Ok(UpdateMemberStateResponse { state })
    }

    /// Release closed transports on the worker in the background, forgetting
    /// each once the worker answers.
    ///
    /// Transports that never reached the worker are forgotten right away,
    /// unless listed in `unconfirmed`.
    fn retire_transports(self: &Arc<Self>, closed: Vec<ClosedTransport>, unconfirmed: &HashSet<TransportId>) {
        let (never_allocated, on_worker): (Vec<_>, Vec<_>) = closed.into_iter().partition(|c| {
            c.previous == TransportStatus::Unallocated && !unconfirmed.contains(&c.id)
        });
        for transport in never_allocated {
            self.registry.forget_transport(transport.id);
        }
        if on_worker.is_empty() {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let timeout = inner.config.request_timeout();
            join_all(on_worker.into_iter().map(|transport| {
                let inner = Arc::clone(&inner);
                async move {
                    let result = inner
                        .broker
                        .request_timeout::<CloseTransportRequest>(
                            &CloseTransportPayload {
                                transport_id: transport.id,
                            },
                            timeout,
                        )
                        .await;
                    match result {
                        Ok(()) => {}
                        Err(err) if transport.previous == TransportStatus::Unallocated => {
                            debug!(transport_id = %transport.id, error = %err, "Unconfirmed transport not released");
                        }
                        Err(err) => {
                            warn!(transport_id = %transport.id, error = %err, "Worker did not confirm transport teardown");
                        }
                    }
                    inner.registry.forget_transport(transport.id);
                }
            }))
            .await;
        });
    }

    /// Close a router on the worker in the background. `unconfirmed` routers
    /// may not exist there, so a refusal is expected.
    fn release_router(self: &Arc<Self>, router_id: RouterId, unconfirmed: bool) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner
                .broker
                .request_timeout::<CloseRouterRequest>(
                    &CloseRouterPayload { router_id },
                    inner.config.request_timeout(),
                )
                .await;
            match result {
                Ok(()) => debug!(router_id = %router_id, "Router released"),
                Err(err) if unconfirmed => {
                    debug!(router_id = %router_id, error = %err, "Unconfirmed router not released");
                }
                Err(err) => warn!(router_id = %router_id, error = %err, "Worker did not confirm router teardown"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::MockPlacementPolicy;
    use confer_broker::messages::TransportOptions;
    use confer_core::ErrorCode;
    use serde_json::json;
    use std::time::Duration;

    fn fake_worker(broker: &Broker) -> Vec<Registration> {
        vec![
            broker
                .register_fn::<NewRouterRequest, _, _>(|_p: NewRouterPayload| async move { Ok(()) })
                .unwrap(),
            broker
                .register_fn::<NewWebRtcTransportRequest, _, _>(|p: NewWebRtcTransportPayload| async move {
                    Ok(TransportOptions(json!({ "id": p.assigned_id })))
                })
                .unwrap(),
            broker
                .register_fn::<CloseTransportRequest, _, _>(|_p: CloseTransportPayload| async move { Ok(()) })
                .unwrap(),
            broker
                .register_fn::<CloseRouterRequest, _, _>(|_p: CloseRouterPayload| async move { Ok(()) })
                .unwrap(),
        ]
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            request_timeout_ms: 200,
            ..CoordinatorConfig::default()
        }
    }

    async fn subscribe(broker: &Broker, space: &str) -> SpaceData {
        broker
            .request::<SubscribeToSpace>(&SubscribeToSpacePayload {
                space_id: SpaceId::from(space),
            })
            .await
            .unwrap()
            .data
    }

    async fn join(broker: &Broker, space: &str) -> MemberId {
        broker
            .request::<AddMember>(&AddMemberPayload {
                space_id: SpaceId::from(space),
                member_profile: Default::default(),
                member_state: Default::default(),
            })
            .await
            .unwrap()
            .member_id
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = Broker::new();
        let _worker = fake_worker(&broker);
        let coordinator = Coordinator::new(broker.clone(), config());
        let _handle = coordinator.start().unwrap();

        let first = subscribe(&broker, "room").await;
        let second = subscribe(&broker, "room").await;
        assert_eq!(first, second);
        assert_eq!(coordinator.stats().routers, 1);
        assert_eq!(coordinator.active_spaces(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let broker = Broker::new();
        let coordinator = Coordinator::new(broker.clone(), config());
        let handle = coordinator.start().unwrap();
        assert_eq!(handle.queues().len(), 8);

        let other = Coordinator::new(broker, config());
        assert!(matches!(
            other.start(),
            Err(BrokerError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_placement_policy_is_consulted_per_member() {
        let broker = Broker::new();
        let _worker = fake_worker(&broker);

        let mut policy = MockPlacementPolicy::new();
        policy.expect_name().return_const("mock");
        policy
            .expect_choose_router()
            .times(2)
            .returning(|space, _member| space.primary_router);

        let coordinator = Coordinator::with_placement(broker.clone(), config(), Arc::new(policy));
        let _handle = coordinator.start().unwrap();

        subscribe(&broker, "room").await;
        assert_eq!(join(&broker, "room").await, MemberId::new(0));
        assert_eq!(join(&broker, "room").await, MemberId::new(1));
    }

    #[tokio::test]
    async fn test_unknown_member_is_not_found() {
        let broker = Broker::new();
        let coordinator = Coordinator::new(broker.clone(), config());
        let _handle = coordinator.start().unwrap();

        let err = broker
            .request::<RemoveMember>(&RemoveMemberPayload {
                member_id: MemberId::new(42),
            })
            .await
            .unwrap_err();
        assert_eq!(err.nack().map(|n| n.code), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_failed_allocation_rolls_back_join() {
        let broker = Broker::new();
        let _router = broker
            .register_fn::<NewRouterRequest, _, _>(|_p: NewRouterPayload| async move { Ok(()) })
            .unwrap();
        let _transports = broker
            .register_fn::<NewWebRtcTransportRequest, _, _>(|p: NewWebRtcTransportPayload| async move {
                if p.is_producer {
                    Ok(TransportOptions(json!({})))
                } else {
                    Err(Nack::upstream_rejected("no ports"))
                }
            })
            .unwrap();
        let _close = broker
            .register_fn::<CloseTransportRequest, _, _>(|_p: CloseTransportPayload| async move { Ok(()) })
            .unwrap();

        let coordinator = Coordinator::new(broker.clone(), config());
        let _handle = coordinator.start().unwrap();
        subscribe(&broker, "room").await;
        let first = join(&broker, "room").await;

        // The second member needs consumers, which the worker refuses
        let err = broker
            .request::<AddMember>(&AddMemberPayload {
                space_id: SpaceId::from("room"),
                member_profile: Default::default(),
                member_state: Default::default(),
            })
            .await
            .unwrap_err();
        let nack = err.nack().cloned().unwrap();
        assert_eq!(nack.code, ErrorCode::UpstreamRejected);
        assert!(nack.retryable);

        let space = SpaceId::from("room");
        let members = coordinator.registry().space_members(&space).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].member_id, first);
        assert!(coordinator.registry().mesh_is_complete(&space));
        assert_eq!(coordinator.registry().consumer_count(first), Some(0));

        // Closed transports are forgotten once the worker confirms
        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.stats().closing_transports > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_transport_update_for_closed_transport_conflicts() {
        let broker = Broker::new();
        let _worker = fake_worker(&broker);
        let coordinator = Coordinator::new(broker.clone(), config());
        let _handle = coordinator.start().unwrap();

        subscribe(&broker, "room").await;
        let member = join(&broker, "room").await;
        let producer = coordinator.registry().member(member).unwrap().producer;

        broker
            .request::<TransportUpdate>(&TransportUpdatePayload {
                transport_id: producer,
                status: Some(TransportStatus::Connected),
                metadata: serde_json::Map::new(),
            })
            .await
            .unwrap();
        assert_eq!(
            coordinator.registry().transport(producer).unwrap().status,
            TransportStatus::Connected
        );

        let err = broker
            .request::<TransportUpdate>(&TransportUpdatePayload {
                transport_id: producer,
                status: Some(TransportStatus::Allocated),
                metadata: serde_json::Map::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.nack().map(|n| n.code), Some(ErrorCode::Conflict));
    }

    #[tokio::test]
    async fn test_closed_transport_of_closed_space_conflicts() {
        let broker = Broker::new();
        let _router = broker
            .register_fn::<NewRouterRequest, _, _>(|_p: NewRouterPayload| async move { Ok(()) })
            .unwrap();
        let _transports = broker
            .register_fn::<NewWebRtcTransportRequest, _, _>(|_p: NewWebRtcTransportPayload| async move {
                Ok(TransportOptions(json!({})))
            })
            .unwrap();
        // Teardown is never confirmed, so closed records stay around
        let _close = broker
            .register_fn::<CloseTransportRequest, _, _>(|_p: CloseTransportPayload| std::future::pending())
            .unwrap();

        let coordinator = Coordinator::new(
            broker.clone(),
            CoordinatorConfig {
                request_timeout_ms: 60_000,
                ..CoordinatorConfig::default()
            },
        );
        let _handle = coordinator.start().unwrap();

        subscribe(&broker, "room").await;
        let member = join(&broker, "room").await;
        let producer = coordinator.registry().member(member).unwrap().producer;
        broker
            .request::<RemoveMember>(&RemoveMemberPayload { member_id: member })
            .await
            .unwrap();
        broker
            .request::<UnsubscribeFromSpace>(&UnsubscribeFromSpacePayload {
                space_id: SpaceId::from("room"),
            })
            .await
            .unwrap();
        assert_eq!(coordinator.stats().closing_transports, 1);

        let err = broker
            .request::<TransportUpdate>(&TransportUpdatePayload {
                transport_id: producer,
                status: None,
                metadata: serde_json::Map::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.nack().map(|n| n.code), Some(ErrorCode::Conflict));
    }
}
