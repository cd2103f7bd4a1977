//! Gateway sessions against the real coordinator and media worker

use std::time::Duration;

use confer_broker::messages::{MemberProfile, MemberStatePatch, NewRouterPayload};
use confer_broker::queue::NewRouterRequest;
use confer_broker::Broker;
use confer_coordinator::{Coordinator, CoordinatorHandle};
use confer_core::config::{CoordinatorConfig, GatewayConfig, SfuConfig};
use confer_core::{ErrorCode, MemberId, Nack, SpaceId};
use confer_gateway::{ClientEvent, Connection, GatewayError, SignalingGateway};
use confer_sfu::{MediaWorker, WorkerHandle};
use serde_json::json;
use tokio::sync::mpsc::error::TryRecvError;

struct Stack {
    gateway: SignalingGateway,
    coordinator: Coordinator,
    worker: MediaWorker,
    _handles: (CoordinatorHandle, WorkerHandle),
}

fn stack(max_connections_per_space: usize) -> Stack {
    let broker = Broker::new();
    let worker = MediaWorker::new(broker.clone(), SfuConfig::default());
    let worker_handle = worker.start().unwrap();
    let coordinator = Coordinator::new(broker.clone(), CoordinatorConfig::default());
    let coordinator_handle = coordinator.start().unwrap();
    let gateway = SignalingGateway::new(
        broker,
        GatewayConfig {
            max_connections_per_space,
        },
    );
    Stack {
        gateway,
        coordinator,
        worker,
        _handles: (coordinator_handle, worker_handle),
    }
}

fn profile(name: &str) -> MemberProfile {
    MemberProfile(json!({ "name": name }))
}

async fn next(connection: &mut Connection) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(1), connection.events.recv())
        .await
        .expect("no event")
        .expect("channel closed")
}

#[tokio::test]
async fn test_join_handshake_order() {
    let s = stack(0);
    let (mut alice, joined) = s.gateway.connect(SpaceId::from("room"), profile("alice")).await;
    let alice_id = joined.unwrap();

    assert_eq!(next(&mut alice).await.event_type(), "connectionSuccessful");
    match next(&mut alice).await {
        ClientEvent::SpaceInit {
            data,
            member_id,
            members,
            ..
        } => {
            assert_eq!(data.space_id, SpaceId::from("room"));
            assert_eq!(member_id, alice_id);
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].profile.display_name(), Some("alice"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let (mut bob, joined) = s.gateway.connect(SpaceId::from("room"), profile("bob")).await;
    let bob_id = joined.unwrap();
    match next(&mut alice).await {
        ClientEvent::MemberJoin { member, .. } => {
            assert_eq!(member.member_id, bob_id);
            assert_eq!(member.profile.display_name(), Some("bob"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Bob sees alice in spaceInit, not as a memberJoin
    assert_eq!(next(&mut bob).await.event_type(), "connectionSuccessful");
    match next(&mut bob).await {
        ClientEvent::SpaceInit { members, .. } => assert_eq!(members.len(), 2),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(bob.events.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(s.gateway.transports(&alice.id).await.unwrap().len(), 2);
    assert_eq!(s.gateway.stats().joined_members, 2);
}

#[tokio::test]
async fn test_state_update_reaches_everyone() {
    let s = stack(0);
    let (mut alice, _) = s.gateway.connect(SpaceId::from("room"), profile("alice")).await;
    let (mut bob, _) = s.gateway.connect(SpaceId::from("room"), profile("bob")).await;
    let alice_id = s.gateway.member_id(&alice.id).unwrap();

    // Drain the handshake
    for _ in 0..3 {
        next(&mut alice).await;
    }
    for _ in 0..2 {
        next(&mut bob).await;
    }

    let state = s
        .gateway
        .update_member_state(
            &alice.id,
            MemberStatePatch {
                audio_muted: Some(true),
                ..MemberStatePatch::default()
            },
        )
        .await
        .unwrap();
    assert!(state.audio_muted);

    for connection in [&mut alice, &mut bob] {
        match next(connection).await {
            ClientEvent::MemberStateUpdate {
                member_id,
                new_state,
                ..
            } => {
                assert_eq!(member_id, alice_id);
                assert!(new_state.audio_muted);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_last_disconnect_closes_space() {
    let s = stack(0);
    let (alice, _) = s.gateway.connect(SpaceId::from("room"), profile("alice")).await;
    let (mut bob, _) = s.gateway.connect(SpaceId::from("room"), profile("bob")).await;
    let alice_id = s.gateway.member_id(&alice.id).unwrap();
    for _ in 0..2 {
        next(&mut bob).await;
    }

    s.gateway.disconnect(&alice.id).await.unwrap();
    match next(&mut bob).await {
        ClientEvent::MemberLeave { member_id, .. } => assert_eq!(member_id, alice_id),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(s.coordinator.registry().contains_space(&SpaceId::from("room")));

    s.gateway.disconnect(&bob.id).await.unwrap();
    assert!(!s.coordinator.registry().contains_space(&SpaceId::from("room")));

    tokio::time::timeout(Duration::from_secs(2), async {
        while s.worker.stats().routers > 0 || s.worker.stats().transports > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker resources were not released");

    assert!(matches!(
        s.gateway.disconnect(&bob.id).await,
        Err(GatewayError::UnknownConnection(_))
    ));
}

#[tokio::test]
async fn test_space_capacity() {
    let s = stack(1);
    let (_alice, joined) = s.gateway.connect(SpaceId::from("room"), profile("alice")).await;
    joined.unwrap();

    let (mut bob, joined) = s.gateway.connect(SpaceId::from("room"), profile("bob")).await;
    let err = joined.unwrap_err();
    assert!(matches!(err, GatewayError::SpaceFull { limit: 1, .. }));
    match next(&mut bob).await {
        ClientEvent::ConnectionFailed { code, .. } => assert_eq!(code, ErrorCode::Conflict),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(s.coordinator.stats().members, 1);

    // Other spaces are unaffected
    let (_carol, joined) = s.gateway.connect(SpaceId::from("other"), profile("carol")).await;
    assert_eq!(joined.unwrap(), MemberId::new(1));
}

#[tokio::test]
async fn test_failed_join_reports_stable_code() {
    let broker = Broker::new();
    let _worker = broker
        .register_fn::<NewRouterRequest, _, _>(|_p: NewRouterPayload| async move {
            Err(Nack::upstream_rejected("internal detail that must not leak"))
        })
        .unwrap();
    let coordinator = Coordinator::new(broker.clone(), CoordinatorConfig::default());
    let _handle = coordinator.start().unwrap();
    let gateway = SignalingGateway::new(broker, GatewayConfig::default());

    let (mut connection, joined) = gateway.connect(SpaceId::from("room"), profile("alice")).await;
    assert_eq!(joined.unwrap_err().code(), ErrorCode::UpstreamRejected);

    let event = next(&mut connection).await;
    let wire = serde_json::to_string(&event).unwrap();
    assert!(!wire.contains("internal detail"));
    assert!(matches!(
        event,
        ClientEvent::ConnectionFailed {
            code: ErrorCode::UpstreamRejected,
            ..
        }
    ));
    assert!(gateway.member_id(&connection.id).is_none());
}

#[tokio::test]
async fn test_requests_before_join_are_rejected() {
    let s = stack(0);
    let connection = s.gateway.open(SpaceId::from("room"), profile("alice"));
    assert!(matches!(
        s.gateway.transports(&connection.id).await,
        Err(GatewayError::NotJoined(_))
    ));
    assert!(matches!(
        s.gateway.transports("missing").await,
        Err(GatewayError::UnknownConnection(_))
    ));
    s.gateway.disconnect(&connection.id).await.unwrap();
    assert_eq!(s.gateway.stats().connections, 0);
}

#[tokio::test]
async fn test_concurrent_joins_on_one_connection_add_one_member() {
    let s = stack(0);
    let mut alice = s.gateway.open(SpaceId::from("room"), profile("alice"));

    let (first, second) = tokio::join!(s.gateway.join(&alice.id), s.gateway.join(&alice.id));
    let member_id = first.unwrap();
    assert_eq!(second.unwrap(), member_id);
    assert_eq!(s.coordinator.stats().members, 1);

    // One handshake only
    assert_eq!(next(&mut alice).await.event_type(), "connectionSuccessful");
    assert_eq!(next(&mut alice).await.event_type(), "spaceInit");
    assert!(matches!(alice.events.try_recv(), Err(TryRecvError::Empty)));

    s.gateway.disconnect(&alice.id).await.unwrap();
    let stats = s.coordinator.stats();
    assert_eq!((stats.members, stats.spaces), (0, 0));
}
