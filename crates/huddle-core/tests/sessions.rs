//! Multi-participant scenarios driven through `SessionManager`.

use huddle_core::engine::{EngineError, LoopbackEngine};
use huddle_core::{SessionConfig, SessionError, SessionManager};
use huddle_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, MediaKind, Request, Response, RtpCapabilities,
    RtpCodecParameters, RtpParameters, ServerEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Client {
    id: String,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    rtp_capabilities: RtpCapabilities,
}

impl Client {
    /// Next event, skipping nothing. Fails after one second.
    async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event sink closed")
    }
}

fn setup() -> (LoopbackEngine, SessionManager) {
    let engine = LoopbackEngine::default();
    let manager = SessionManager::new(Arc::new(engine.clone()), SessionConfig::default());
    (engine, manager)
}

async fn join(manager: &SessionManager, room: &str) -> Client {
    let (tx, mut events) = mpsc::unbounded_channel();
    let id = manager.on_connect(tx);
    assert_eq!(
        events.recv().await.unwrap(),
        ServerEvent::ConnectionSuccess {
            socket_id: id.clone()
        }
    );

    let response = manager
        .dispatch(
            &id,
            Request::JoinRoom {
                room_name: room.to_string(),
            },
        )
        .await
        .unwrap();
    let Response::JoinRoom { rtp_capabilities } = response else {
        panic!("unexpected response: {:?}", response);
    };

    Client {
        id,
        events,
        rtp_capabilities,
    }
}

fn dtls() -> DtlsParameters {
    DtlsParameters {
        role: Some(DtlsRole::Client),
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "0A:1B:2C".into(),
        }],
    }
}

fn vp8() -> RtpParameters {
    RtpParameters {
        mid: Some("0".into()),
        codecs: vec![RtpCodecParameters {
            mime_type: "video/VP8".into(),
            payload_type: 96,
            clock_rate: 90_000,
            channels: None,
            parameters: Default::default(),
            rtcp_feedback: Vec::new(),
        }],
        ..Default::default()
    }
}

async fn create_transport(manager: &SessionManager, client: &Client, consumer: bool) -> String {
    match manager
        .dispatch(&client.id, Request::CreateWebRtcTransport { consumer })
        .await
        .unwrap()
    {
        Response::CreateWebRtcTransport { params } => params.id,
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Create and connect a send transport, then produce VP8.
async fn publish(manager: &SessionManager, client: &Client) -> (String, bool) {
    create_transport(manager, client, false).await;
    manager
        .dispatch(
            &client.id,
            Request::TransportConnect {
                dtls_parameters: dtls(),
            },
        )
        .await
        .unwrap();
    match manager
        .dispatch(
            &client.id,
            Request::TransportProduce {
                kind: MediaKind::Video,
                rtp_parameters: vp8(),
                app_data: None,
            },
        )
        .await
        .unwrap()
    {
        Response::TransportProduce {
            id,
            producers_exist,
        } => (id, producers_exist),
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Create and connect a receive transport, then consume `producer_id`.
async fn subscribe(
    manager: &SessionManager,
    client: &Client,
    producer_id: &str,
) -> (String, String) {
    let transport_id = create_transport(manager, client, true).await;
    manager
        .dispatch(
            &client.id,
            Request::TransportRecvConnect {
                dtls_parameters: dtls(),
                server_consumer_transport_id: transport_id.clone(),
            },
        )
        .await
        .unwrap();
    let consumer_id = match manager
        .dispatch(
            &client.id,
            Request::Consume {
                rtp_capabilities: client.rtp_capabilities.clone(),
                remote_producer_id: producer_id.to_string(),
                server_consumer_transport_id: transport_id.clone(),
            },
        )
        .await
        .unwrap()
    {
        Response::Consume { params } => params.server_consumer_id,
        other => panic!("unexpected response: {:?}", other),
    };
    (transport_id, consumer_id)
}

async fn list_producers(manager: &SessionManager, client: &Client) -> Vec<String> {
    match manager
        .dispatch(&client.id, Request::GetProducers)
        .await
        .unwrap()
    {
        Response::GetProducers { producer_ids } => producer_ids,
        other => panic!("unexpected response: {:?}", other),
    }
}

async fn settle(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("state did not settle");
}

#[tokio::test]
async fn test_same_room_shares_one_router() {
    let (engine, manager) = setup();

    let a = join(&manager, "r1").await;
    let b = join(&manager, "r1").await;

    assert_eq!(a.rtp_capabilities, b.rtp_capabilities);
    assert_eq!(engine.router_count(), 1);
    assert_eq!(manager.rooms().participants("r1"), vec![a.id, b.id]);
}

#[tokio::test]
async fn test_publish_notifies_room_only() {
    let (_, manager) = setup();
    let a = join(&manager, "r1").await;
    let mut b = join(&manager, "r1").await;
    let mut c = join(&manager, "r1").await;
    let mut d = join(&manager, "r2").await;

    let (producer_id, producers_exist) = publish(&manager, &a).await;
    assert!(!producers_exist);

    for client in [&mut b, &mut c] {
        assert_eq!(
            client.next_event().await,
            ServerEvent::NewProducer {
                producer_id: producer_id.clone()
            }
        );
        assert!(client.events.try_recv().is_err());
    }
    assert!(d.events.try_recv().is_err());

    assert_eq!(list_producers(&manager, &b).await, vec![producer_id.clone()]);
    assert!(list_producers(&manager, &a).await.is_empty());
    assert!(list_producers(&manager, &d).await.is_empty());

    let (_, producers_exist) = publish(&manager, &b).await;
    assert!(producers_exist);
}

#[tokio::test]
async fn test_consume_then_publisher_disconnects() {
    let (engine, manager) = setup();
    let a = join(&manager, "r1").await;
    let mut b = join(&manager, "r1").await;

    let (producer_id, _) = publish(&manager, &a).await;
    assert!(matches!(b.next_event().await, ServerEvent::NewProducer { .. }));
    assert_eq!(list_producers(&manager, &b).await, vec![producer_id.clone()]);

    let (transport_id, consumer_id) = subscribe(&manager, &b, &producer_id).await;
    let consumer = manager.ledgers().consumers.get(&consumer_id).unwrap().consumer;
    assert!(consumer.paused());

    manager
        .dispatch(
            &b.id,
            Request::ConsumerResume {
                server_consumer_id: consumer_id.clone(),
            },
        )
        .await
        .unwrap();
    assert!(!consumer.paused());

    manager.on_disconnect(&a.id);

    assert_eq!(
        b.next_event().await,
        ServerEvent::ProducerClosed {
            remote_producer_id: producer_id.clone()
        }
    );
    assert!(consumer.is_closed());
    assert!(!manager.ledgers().consumers.contains(&consumer_id));
    assert!(!manager.ledgers().transports.contains(&transport_id));
    assert!(!manager.ledgers().references(&a.id));
    assert!(!manager.ledgers().references(&b.id));
    assert!(list_producers(&manager, &b).await.is_empty());
    assert_eq!(manager.rooms().participants("r1"), vec![b.id.clone()]);

    let stats = manager.stats();
    assert_eq!(stats.participants, 1);
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);
    assert_eq!(stats.transports, 0);
    assert_eq!(engine.ports_in_use(), 0);
}

#[tokio::test]
async fn test_disconnect_removes_everything() {
    let (_, manager) = setup();
    let a = join(&manager, "r1").await;
    let b = join(&manager, "r1").await;

    let (from_a, _) = publish(&manager, &a).await;
    let (from_b, _) = publish(&manager, &b).await;
    let (_, consumer_id) = subscribe(&manager, &a, &from_b).await;

    manager.on_disconnect(&a.id);

    assert!(!manager.ledgers().references(&a.id));
    assert!(!manager.ledgers().peers.contains(&a.id));
    assert!(!manager.ledgers().producers.contains(&from_a));
    assert!(!manager.rooms().participants("r1").contains(&a.id));

    // Later lookups on behalf of the departed participant fail.
    let err = manager
        .dispatch(
            &a.id,
            Request::ConsumerResume {
                server_consumer_id: consumer_id,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_lookup_failure());
    assert!(matches!(
        manager.dispatch(&a.id, Request::GetProducers).await,
        Err(SessionError::NotJoined(_))
    ));

    // B's producer is untouched.
    assert!(manager.ledgers().producers.contains(&from_b));
}

#[tokio::test]
async fn test_empty_room_is_recreated() {
    let (engine, manager) = setup();
    let a = join(&manager, "r1").await;
    let first_caps = a.rtp_capabilities.clone();

    manager.on_disconnect(&a.id);
    assert!(!manager.rooms().contains("r1"));
    assert_eq!(engine.router_count(), 0);

    let b = join(&manager, "r1").await;
    assert_eq!(b.rtp_capabilities, first_caps);
    assert_eq!(engine.router_count(), 1);
    assert_eq!(manager.stats().rooms, 1);
}

#[tokio::test]
async fn test_consume_errors_are_explicit() {
    let (_, manager) = setup();
    let a = join(&manager, "r1").await;
    let b = join(&manager, "r1").await;
    let (producer_id, _) = publish(&manager, &a).await;
    let transport_id = create_transport(&manager, &b, true).await;

    let no_video = RtpCapabilities {
        codecs: b
            .rtp_capabilities
            .codecs
            .iter()
            .filter(|c| c.kind == MediaKind::Audio)
            .cloned()
            .collect(),
        header_extensions: Vec::new(),
    };
    let err = manager
        .dispatch(
            &b.id,
            Request::Consume {
                rtp_capabilities: no_video,
                remote_producer_id: producer_id.clone(),
                server_consumer_transport_id: transport_id.clone(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CapabilityMismatch(ref id) if *id == producer_id));

    let err = manager
        .dispatch(
            &b.id,
            Request::Consume {
                rtp_capabilities: b.rtp_capabilities.clone(),
                remote_producer_id: "unknown".into(),
                server_consumer_transport_id: transport_id,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_lookup_failure());

    let err = manager
        .dispatch(
            &b.id,
            Request::ConsumerResume {
                server_consumer_id: "unknown".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_lookup_failure());
}

#[tokio::test]
async fn test_recv_connect_unknown_transport() {
    let (_, manager) = setup();
    let a = join(&manager, "r1").await;

    let err = manager
        .dispatch(
            &a.id,
            Request::TransportRecvConnect {
                dtls_parameters: dtls(),
                server_consumer_transport_id: "unknown".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_lookup_failure());

    let err = manager
        .dispatch(
            &a.id,
            Request::TransportConnect {
                dtls_parameters: dtls(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_lookup_failure());
}

#[tokio::test]
async fn test_second_connect_is_engine_error() {
    let (_, manager) = setup();
    let a = join(&manager, "r1").await;
    create_transport(&manager, &a, false).await;

    let connect = || Request::TransportConnect {
        dtls_parameters: dtls(),
    };
    manager.dispatch(&a.id, connect()).await.unwrap();
    assert!(matches!(
        manager.dispatch(&a.id, connect()).await,
        Err(SessionError::Engine(EngineError::AlreadyConnected(_)))
    ));
}

#[tokio::test]
async fn test_dtls_closed_drops_transport() {
    let (engine, manager) = setup();
    let a = join(&manager, "r1").await;
    let transport_id = create_transport(&manager, &a, false).await;

    assert!(engine.close_dtls(&transport_id));
    settle(|| !manager.ledgers().transports.contains(&transport_id)).await;

    assert!(manager
        .ledgers()
        .peers
        .get(&a.id)
        .unwrap()
        .transports
        .is_empty());
}

#[tokio::test]
async fn test_concurrent_joins_and_disconnects() {
    let (engine, manager) = setup();
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let room = format!("room-{}", i % 4);
                let client = join(&manager, &room).await;
                publish(&manager, &client).await;
                manager.on_disconnect(&client.id);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = manager.stats();
    assert_eq!(stats.participants, 0);
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.transports, 0);
    assert_eq!(stats.rooms, 0);
    assert_eq!(engine.router_count(), 0);
}
