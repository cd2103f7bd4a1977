//! Media Worker - router and transport hosting
//!
//! This module provides:
//! - Router creation under coordinator-assigned ids, with an optional limit
//! - WebRTC transport allocation from a bounded RTC port pool
//! - Teardown of single transports and whole routers
//! - Connection reporting back to the coordinator via `transportUpdate`
//! - Worker statistics

use std::collections::HashSet;
use std::sync::Arc;

use confer_broker::messages::{
    CloseRouterPayload, CloseTransportPayload, NewRouterPayload, NewWebRtcTransportPayload,
    TransportOptions, TransportStatus, TransportUpdatePayload,
};
use confer_broker::queue::{
    CloseRouterRequest, CloseTransportRequest, NewRouterRequest, NewWebRtcTransportRequest,
    TransportUpdate,
};
use confer_broker::{Broker, BrokerError, Handler, Registration, Responder};
use confer_core::config::SfuConfig;
use confer_core::{RouterId, TransportId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, SfuError};
use crate::ports::PortPool;
use crate::transport::WorkerTransport;

/// Worker statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub routers: usize,
    pub transports: usize,
    pub connected_transports: usize,
    pub ports_in_use: usize,
    pub port_capacity: usize,
}

struct Inner {
    config: SfuConfig,
    broker: Broker,
    /// Router -> transports hosted on it
    routers: DashMap<RouterId, HashSet<TransportId>>,
    transports: DashMap<TransportId, WorkerTransport>,
    ports: PortPool,
}

/// In-process media worker
#[derive(Clone)]
pub struct MediaWorker {
    inner: Arc<Inner>,
}

/// Queue registrations of a running worker; dropping stops it
#[must_use = "dropping the handle deregisters the worker"]
pub struct WorkerHandle {
    registrations: Vec<Registration>,
}

impl WorkerHandle {
    #[must_use]
    pub fn queues(&self) -> Vec<&'static str> {
        self.registrations.iter().map(Registration::queue).collect()
    }
}

impl MediaWorker {
    #[must_use]
    pub fn new(broker: Broker, config: SfuConfig) -> Self {
        let ports = PortPool::new(config.rtc_min_port, config.rtc_max_port);
        info!(
            rtc_min_port = config.rtc_min_port,
            rtc_max_port = config.rtc_max_port,
            announced_ip = %config.announced_ip,
            max_routers = config.max_routers,
            "Media worker initialized"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                broker,
                routers: DashMap::new(),
                transports: DashMap::new(),
                ports,
            }),
        }
    }

    /// Install the worker as consumer of the router and transport queues
    pub fn start(&self) -> std::result::Result<WorkerHandle, BrokerError> {
        let broker = &self.inner.broker;
        let consumer = || WorkerConsumer {
            worker: self.clone(),
        };
        let registrations = vec![
            broker.register::<NewRouterRequest, _>(consumer())?,
            broker.register::<NewWebRtcTransportRequest, _>(consumer())?,
            broker.register::<CloseTransportRequest, _>(consumer())?,
            broker.register::<CloseRouterRequest, _>(consumer())?,
        ];
        info!(queues = registrations.len(), "Media worker started");
        Ok(WorkerHandle { registrations })
    }

    pub fn create_router(&self, router_id: RouterId) -> Result<()> {
        let max_routers = self.inner.config.max_routers;
        if max_routers > 0 && self.inner.routers.len() >= max_routers {
            warn!(
                current_routers = self.inner.routers.len(),
                max_routers,
                "Router limit reached"
            );
            return Err(SfuError::RouterLimit(max_routers));
        }

        match self.inner.routers.entry(router_id) {
            Entry::Occupied(_) => Err(SfuError::DuplicateRouter(router_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(HashSet::new());
                info!(router_id = %router_id, total_routers = self.inner.routers.len(), "Created router");
                Ok(())
            }
        }
    }

    pub fn create_transport(
        &self,
        router_id: RouterId,
        transport_id: TransportId,
        is_producer: bool,
    ) -> Result<TransportOptions> {
        let mut router = self
            .inner
            .routers
            .get_mut(&router_id)
            .ok_or(SfuError::RouterNotFound(router_id))?;

        let Entry::Vacant(vacant) = self.inner.transports.entry(transport_id) else {
            return Err(SfuError::DuplicateTransport(transport_id));
        };
        let port = self.inner.ports.acquire().ok_or_else(|| {
            warn!(capacity = self.inner.ports.capacity(), "RTC port pool exhausted");
            SfuError::PortsExhausted
        })?;

        let transport = WorkerTransport::new(transport_id, router_id, is_producer, port);
        let options = transport.options(&self.inner.config.announced_ip);
        vacant.insert(transport);
        router.insert(transport_id);

        debug!(
            router_id = %router_id,
            transport_id = %transport_id,
            is_producer,
            port,
            "Created transport"
        );
        Ok(options)
    }

    pub fn close_transport(&self, transport_id: TransportId) -> Result<()> {
        let (_, transport) = self
            .inner
            .transports
            .remove(&transport_id)
            .ok_or(SfuError::TransportNotFound(transport_id))?;
        self.inner.ports.release(transport.port);
        if let Some(mut router) = self.inner.routers.get_mut(&transport.router) {
            router.remove(&transport_id);
        }
        debug!(transport_id = %transport_id, port = transport.port, "Closed transport");
        Ok(())
    }

    /// Close a router together with every transport still on it
    pub fn close_router(&self, router_id: RouterId) -> Result<()> {
        let (_, transports) = self
            .inner
            .routers
            .remove(&router_id)
            .ok_or(SfuError::RouterNotFound(router_id))?;
        for transport_id in &transports {
            if let Some((_, transport)) = self.inner.transports.remove(transport_id) {
                self.inner.ports.release(transport.port);
            }
        }
        info!(router_id = %router_id, closed_transports = transports.len(), "Closed router");
        Ok(())
    }

    /// Complete the client handshake of a transport and report it as connected
    pub async fn connect_transport(&self, transport_id: TransportId, dtls_parameters: Value) -> Result<()> {
        {
            let mut transport = self
                .inner
                .transports
                .get_mut(&transport_id)
                .ok_or(SfuError::TransportNotFound(transport_id))?;
            transport.connected = true;
        }

        let mut metadata = Map::new();
        metadata.insert("dtlsParameters".to_string(), dtls_parameters);
        self.inner
            .broker
            .request::<TransportUpdate>(&TransportUpdatePayload {
                transport_id,
                status: Some(TransportStatus::Connected),
                metadata,
            })
            .await?;

        info!(transport_id = %transport_id, "Transport connected");
        Ok(())
    }

    #[must_use]
    pub fn has_router(&self, router_id: RouterId) -> bool {
        self.inner.routers.contains_key(&router_id)
    }

    #[must_use]
    pub fn has_transport(&self, transport_id: TransportId) -> bool {
        self.inner.transports.contains_key(&transport_id)
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            routers: self.inner.routers.len(),
            transports: self.inner.transports.len(),
            connected_transports: self
                .inner
                .transports
                .iter()
                .filter(|entry| entry.value().connected)
                .count(),
            ports_in_use: self.inner.ports.in_use(),
            port_capacity: self.inner.ports.capacity(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.inner.config
    }
}

/// Broker consumer answering worker queues synchronously, in arrival order
struct WorkerConsumer {
    worker: MediaWorker,
}

impl Handler<NewRouterRequest> for WorkerConsumer {
    fn handle(&self, payload: NewRouterPayload, responder: Responder<NewRouterRequest>) {
        responder.respond(self.worker.create_router(payload.assigned_id));
    }
}

impl Handler<NewWebRtcTransportRequest> for WorkerConsumer {
    fn handle(&self, payload: NewWebRtcTransportPayload, responder: Responder<NewWebRtcTransportRequest>) {
        responder.respond(self.worker.create_transport(
            payload.router_id,
            payload.assigned_id,
            payload.is_producer,
        ));
    }
}

impl Handler<CloseTransportRequest> for WorkerConsumer {
    fn handle(&self, payload: CloseTransportPayload, responder: Responder<CloseTransportRequest>) {
        responder.respond(self.worker.close_transport(payload.transport_id));
    }
}

impl Handler<CloseRouterRequest> for WorkerConsumer {
    fn handle(&self, payload: CloseRouterPayload, responder: Responder<CloseRouterRequest>) {
        responder.respond(self.worker.close_router(payload.router_id));
    }
}
