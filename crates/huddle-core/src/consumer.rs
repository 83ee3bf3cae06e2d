//! Consumer registration and the remote-producer-closed cascade.

use crate::engine::ConsumerEvent;
use crate::error::{ResourceKind, SessionError};
use crate::fanout::NotificationFanout;
use crate::ledger::{ConsumerEntry, ConsumerId, ProducerId, ResourceLedgers};
use crate::room::RoomDirectory;
use huddle_protocol::{ConsumerParams, RtpCapabilities, ServerEvent};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Registers incoming media streams.
pub struct ConsumerService {
    ledgers: Arc<ResourceLedgers>,
    rooms: Arc<RoomDirectory>,
    fanout: Arc<NotificationFanout>,
}

impl ConsumerService {
    #[must_use]
    pub fn new(
        ledgers: Arc<ResourceLedgers>,
        rooms: Arc<RoomDirectory>,
        fanout: Arc<NotificationFanout>,
    ) -> Self {
        Self {
            ledgers,
            rooms,
            fanout,
        }
    }

    /// Producers of other participants in the caller's room.
    ///
    /// # Errors
    ///
    /// Fails if the participant has not joined a room.
    pub fn list_producers(&self, participant_id: &str) -> Result<Vec<ProducerId>, SessionError> {
        let peer = self
            .ledgers
            .peers
            .get(participant_id)
            .ok_or_else(|| SessionError::NotJoined(participant_id.to_string()))?;

        Ok(self
            .ledgers
            .producers
            .filter(|p| p.room_name == peer.room_name && p.participant_id != participant_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Subscribe the caller to a remote producer. The consumer starts paused.
    ///
    /// # Errors
    ///
    /// - `LookupFailure` if the receive transport is not the caller's or the
    ///   producer is not in the caller's room
    /// - `OwnProducer` if the caller produces it
    /// - `CapabilityMismatch` if the router cannot serve the capabilities
    pub async fn consume(
        &self,
        participant_id: &str,
        remote_producer_id: &str,
        transport_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerParams, SessionError> {
        let peer = self
            .ledgers
            .peers
            .get(participant_id)
            .ok_or_else(|| SessionError::NotJoined(participant_id.to_string()))?;
        let transport = self
            .ledgers
            .transports
            .get(transport_id)
            .filter(|t| t.participant_id == participant_id && t.consumer_side)
            .ok_or_else(|| SessionError::lookup(ResourceKind::Transport, transport_id))?;
        let producer = self
            .ledgers
            .producers
            .get(remote_producer_id)
            .filter(|p| p.room_name == peer.room_name)
            .ok_or_else(|| SessionError::lookup(ResourceKind::Producer, remote_producer_id))?;
        if producer.participant_id == participant_id {
            return Err(SessionError::OwnProducer(remote_producer_id.to_string()));
        }
        let router = self
            .rooms
            .router(&peer.room_name)
            .ok_or_else(|| SessionError::lookup(ResourceKind::Room, &peer.room_name))?;

        if !router.can_consume(remote_producer_id, &rtp_capabilities) {
            warn!(
                participant = %participant_id,
                producer = %remote_producer_id,
                "Cannot consume with the given RTP capabilities"
            );
            return Err(SessionError::CapabilityMismatch(
                remote_producer_id.to_string(),
            ));
        }

        let consumer = transport
            .transport
            .consume(remote_producer_id, &rtp_capabilities, true)
            .await?;
        let consumer_id = consumer.id().to_string();
        let events = consumer.subscribe();

        self.ledgers.consumers.insert(
            consumer_id.clone(),
            ConsumerEntry {
                participant_id: participant_id.to_string(),
                room_name: peer.room_name.clone(),
                remote_producer_id: remote_producer_id.to_string(),
                transport_id: transport_id.to_string(),
                consumer: Arc::clone(&consumer),
            },
        );
        let owned = self.ledgers.peers.update(participant_id, |peer| {
            peer.consumers.push(consumer_id.clone());
        });
        if !owned || consumer.is_closed() || !self.ledgers.producers.contains(remote_producer_id)
        {
            // The producer or the caller went away while the engine was busy.
            self.ledgers.remove_consumer(&consumer_id);
            consumer.close();
            return Err(SessionError::lookup(
                ResourceKind::Producer,
                remote_producer_id,
            ));
        }

        tokio::spawn(watch_consumer(
            Arc::clone(&self.ledgers),
            Arc::clone(&self.fanout),
            consumer_id.clone(),
            events,
        ));

        info!(
            participant = %participant_id,
            room = %peer.room_name,
            consumer = %consumer_id,
            producer = %remote_producer_id,
            "Consumer created"
        );

        Ok(ConsumerParams {
            id: consumer_id.clone(),
            producer_id: remote_producer_id.to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
            server_consumer_id: consumer_id,
        })
    }

    /// Resume one of the caller's consumers.
    ///
    /// # Errors
    ///
    /// Returns a lookup failure for unknown or foreign consumers.
    pub async fn resume(&self, participant_id: &str, consumer_id: &str) -> Result<(), SessionError> {
        let entry = self
            .ledgers
            .consumers
            .get(consumer_id)
            .filter(|c| c.participant_id == participant_id)
            .ok_or_else(|| SessionError::lookup(ResourceKind::Consumer, consumer_id))?;

        entry.consumer.resume().await?;
        debug!(participant = %participant_id, consumer = %consumer_id, "Consumer resumed");
        Ok(())
    }
}

/// Tear down a consumer when its remote producer closes.
///
/// The consumer's receive transport goes with it and the owner is told
/// `producer-closed` once the ledgers no longer hold either.
async fn watch_consumer(
    ledgers: Arc<ResourceLedgers>,
    fanout: Arc<NotificationFanout>,
    consumer_id: ConsumerId,
    mut events: broadcast::Receiver<ConsumerEvent>,
) {
    loop {
        match events.recv().await {
            Ok(ConsumerEvent::ProducerClosed) => {
                let Some(entry) = ledgers.remove_consumer(&consumer_id) else {
                    return;
                };
                if let Some(transport) = ledgers.remove_transport(&entry.transport_id) {
                    transport.transport.close();
                }
                entry.consumer.close();

                info!(
                    participant = %entry.participant_id,
                    consumer = %consumer_id,
                    producer = %entry.remote_producer_id,
                    "Remote producer closed"
                );
                fanout.send(
                    &entry.participant_id,
                    ServerEvent::ProducerClosed {
                        remote_producer_id: entry.remote_producer_id,
                    },
                );
                return;
            }
            Ok(ConsumerEvent::TransportClosed | ConsumerEvent::Closed) => {
                ledgers.remove_consumer(&consumer_id);
                return;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(consumer = %consumer_id, skipped, "Consumer events lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        DtlsState, EngineConsumer, EngineError, EngineProducer, EngineRouter, EngineTransport,
        LoopbackEngine, TransportEvent, WebRtcTransportOptions,
    };
    use crate::ledger::PeerEntry;
    use async_trait::async_trait;
    use huddle_protocol::{DtlsParameters, IceCandidate, IceParameters};
    use crate::producer::ProducerService;
    use crate::transport::TransportNegotiator;
    use huddle_protocol::{MediaKind, RtpCodecCapability, RtpCodecParameters, RtpParameters};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        ledgers: Arc<ResourceLedgers>,
        router: Arc<dyn EngineRouter>,
        transports: TransportNegotiator,
        producers: ProducerService,
        consumers: ConsumerService,
        events_b: mpsc::UnboundedReceiver<ServerEvent>,
    }

    /// "a" and "b" in r1, "c" in r2.
    async fn fixture() -> Fixture {
        let engine = LoopbackEngine::default();
        let rooms = Arc::new(RoomDirectory::new(
            Arc::new(engine),
            vec![
                RtpCodecCapability::new(MediaKind::Audio, "audio/opus", 48_000).with_channels(2),
                RtpCodecCapability::new(MediaKind::Video, "video/VP8", 90_000),
            ],
            true,
        ));
        let ledgers = Arc::new(ResourceLedgers::new());
        let fanout = Arc::new(NotificationFanout::new(Arc::clone(&rooms)));

        let mut events_b = None;
        for (participant, room) in [("a", "r1"), ("b", "r1"), ("c", "r2")] {
            rooms.join_or_create(room, participant).await.unwrap();
            ledgers
                .peers
                .insert(participant.to_string(), PeerEntry::new(participant, room));
            let (tx, rx) = mpsc::unbounded_channel();
            fanout.register(participant, tx);
            if participant == "b" {
                events_b = Some(rx);
            }
        }

        Fixture {
            router: rooms.router("r1").unwrap(),
            transports: TransportNegotiator::new(
                Arc::clone(&ledgers),
                Arc::clone(&rooms),
                WebRtcTransportOptions::default(),
            ),
            producers: ProducerService::new(Arc::clone(&ledgers), Arc::clone(&fanout)),
            consumers: ConsumerService::new(Arc::clone(&ledgers), rooms, fanout),
            ledgers,
            events_b: events_b.unwrap(),
        }
    }

    fn vp8() -> RtpParameters {
        RtpParameters {
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

    /// Receive transport whose publisher leaves while the engine builds the consumer.
    #[derive(Debug)]
    struct LeavingPublisher {
        inner: Arc<dyn EngineTransport>,
        ledgers: Arc<ResourceLedgers>,
    }

    #[async_trait]
    impl EngineTransport for LeavingPublisher {
        fn id(&self) -> &str {
            self.inner.id()
        }

        fn ice_parameters(&self) -> IceParameters {
            self.inner.ice_parameters()
        }

        fn ice_candidates(&self) -> Vec<IceCandidate> {
            self.inner.ice_candidates()
        }

        fn dtls_parameters(&self) -> DtlsParameters {
            self.inner.dtls_parameters()
        }

        fn dtls_state(&self) -> DtlsState {
            self.inner.dtls_state()
        }

        async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), EngineError> {
            self.inner.connect(dtls_parameters).await
        }

        async fn produce(
            &self,
            kind: MediaKind,
            rtp_parameters: RtpParameters,
        ) -> Result<Arc<dyn EngineProducer>, EngineError> {
            self.inner.produce(kind, rtp_parameters).await
        }

        async fn consume(
            &self,
            producer_id: &str,
            rtp_capabilities: &RtpCapabilities,
            paused: bool,
        ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
            let consumer = self
                .inner
                .consume(producer_id, rtp_capabilities, paused)
                .await?;
            // Unregistered, engine close still pending.
            self.ledgers.remove_producer(producer_id);
            Ok(consumer)
        }

        fn close(&self) {
            self.inner.close();
        }

        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }

        fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
            self.inner.subscribe()
        }
    }

    async fn publish(f: &Fixture, participant: &str) -> ProducerId {
        f.transports.create_transport(participant, false).await.unwrap();
        f.producers
            .produce(participant, MediaKind::Video, vp8(), None)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_list_producers_excludes_own_and_other_rooms() {
        let f = fixture().await;
        let from_a = publish(&f, "a").await;
        let from_b = publish(&f, "b").await;
        publish(&f, "c").await;

        assert_eq!(f.consumers.list_producers("a").unwrap(), vec![from_b]);
        assert_eq!(f.consumers.list_producers("b").unwrap(), vec![from_a]);
        assert!(matches!(
            f.consumers.list_producers("nobody"),
            Err(SessionError::NotJoined(_))
        ));
    }

    #[tokio::test]
    async fn test_consume_starts_paused_and_resumes() {
        let f = fixture().await;
        let producer_id = publish(&f, "a").await;
        let recv = f.transports.create_transport("b", true).await.unwrap();

        let params = f
            .consumers
            .consume("b", &producer_id, &recv.id, f.router.rtp_capabilities())
            .await
            .unwrap();
        assert_eq!(params.producer_id, producer_id);
        assert_eq!(params.id, params.server_consumer_id);
        assert_eq!(params.kind, MediaKind::Video);

        let entry = f.ledgers.consumers.get(&params.id).unwrap();
        assert!(entry.consumer.paused());
        assert_eq!(entry.transport_id, recv.id);

        f.consumers.resume("b", &params.id).await.unwrap();
        assert!(!entry.consumer.paused());

        assert!(f.consumers.resume("b", "missing").await.unwrap_err().is_lookup_failure());
        assert!(f.consumers.resume("a", &params.id).await.unwrap_err().is_lookup_failure());
    }

    #[tokio::test]
    async fn test_consume_rejections() {
        let f = fixture().await;
        let from_a = publish(&f, "a").await;
        let from_c = publish(&f, "c").await;
        let recv_a = f.transports.create_transport("a", true).await.unwrap();
        let recv_b = f.transports.create_transport("b", true).await.unwrap();
        let caps = f.router.rtp_capabilities();

        // Foreign transport.
        let err = f
            .consumers
            .consume("b", &from_a, &recv_a.id, caps.clone())
            .await
            .unwrap_err();
        assert!(err.is_lookup_failure());

        // Producer from another room.
        let err = f
            .consumers
            .consume("b", &from_c, &recv_b.id, caps.clone())
            .await
            .unwrap_err();
        assert!(err.is_lookup_failure());

        // Own producer.
        assert!(matches!(
            f.consumers.consume("a", &from_a, &recv_a.id, caps).await,
            Err(SessionError::OwnProducer(_))
        ));

        // Capabilities without VP8.
        let audio_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::new(MediaKind::Audio, "audio/opus", 48_000)
                .with_channels(2)],
            header_extensions: Vec::new(),
        };
        assert!(matches!(
            f.consumers.consume("b", &from_a, &recv_b.id, audio_only).await,
            Err(SessionError::CapabilityMismatch(_))
        ));

        assert!(f.ledgers.consumers.is_empty());
    }

    #[tokio::test]
    async fn test_producer_close_cascades_to_consumer_owner() {
        let mut f = fixture().await;
        let producer_id = publish(&f, "a").await;
        // Drain the new-producer announcement.
        f.events_b.recv().await.unwrap();

        let recv = f.transports.create_transport("b", true).await.unwrap();
        let params = f
            .consumers
            .consume("b", &producer_id, &recv.id, f.router.rtp_capabilities())
            .await
            .unwrap();

        f.ledgers.producers.get(&producer_id).unwrap().producer.close();

        let event = tokio::time::timeout(Duration::from_secs(1), f.events_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::ProducerClosed {
                remote_producer_id: producer_id
            }
        );
        assert!(!f.ledgers.consumers.contains(&params.id));
        assert!(!f.ledgers.transports.contains(&recv.id));
        let peer = f.ledgers.peers.get("b").unwrap();
        assert!(peer.consumers.is_empty());
        assert!(peer.transports.is_empty());
    }

    #[tokio::test]
    async fn test_consume_fails_when_producer_unregistered_mid_flight() {
        let f = fixture().await;
        let producer_id = publish(&f, "a").await;
        let recv = f.transports.create_transport("b", true).await.unwrap();

        let mut entry = f.ledgers.transports.get(&recv.id).unwrap();
        entry.transport = Arc::new(LeavingPublisher {
            inner: Arc::clone(&entry.transport),
            ledgers: Arc::clone(&f.ledgers),
        });
        f.ledgers.transports.insert(recv.id.clone(), entry);

        let err = f
            .consumers
            .consume("b", &producer_id, &recv.id, f.router.rtp_capabilities())
            .await
            .unwrap_err();
        assert!(err.is_lookup_failure());
        assert!(f.ledgers.consumers.is_empty());
        assert!(f.ledgers.peers.get("b").unwrap().consumers.is_empty());
    }
}
