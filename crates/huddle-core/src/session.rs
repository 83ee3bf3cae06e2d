//! Session lifecycle.
//!
//! [`SessionManager`] is the per-server entry point: it allocates participant
//! identifiers on connect, dispatches typed requests to the transport,
//! producer and consumer services, and tears everything down on disconnect.

use crate::consumer::ConsumerService;
use crate::engine::{MediaEngine, WebRtcTransportOptions};
use crate::error::SessionError;
use crate::fanout::{EventSink, NotificationFanout};
use crate::ledger::{ParticipantId, PeerEntry, ResourceLedgers};
use crate::producer::ProducerService;
use crate::room::RoomDirectory;
use crate::transport::TransportNegotiator;
use huddle_protocol::{
    MediaKind, Request, Response, RtpCapabilities, RtpCodecCapability, ServerEvent,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// The codecs every router is created with: Opus audio and VP8 video.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::new(MediaKind::Audio, "audio/opus", 48_000).with_channels(2),
        RtpCodecCapability::new(MediaKind::Video, "video/VP8", 90_000)
            .with_parameter("x-google-start-bitrate", json!(1000)),
    ]
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Codecs handed to every new router.
    pub media_codecs: Vec<RtpCodecCapability>,
    /// Options for every WebRTC transport.
    pub webrtc_transport: WebRtcTransportOptions,
    /// Delete a room once its last participant leaves.
    pub delete_empty_rooms: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            media_codecs: default_media_codecs(),
            webrtc_transport: WebRtcTransportOptions::default(),
            delete_empty_rooms: true,
        }
    }
}

/// Session statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub rooms: usize,
    pub participants: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Connection lifecycle and request dispatch.
pub struct SessionManager {
    ledgers: Arc<ResourceLedgers>,
    rooms: Arc<RoomDirectory>,
    fanout: Arc<NotificationFanout>,
    transports: TransportNegotiator,
    producers: ProducerService,
    consumers: ConsumerService,
}

impl SessionManager {
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, config: SessionConfig) -> Self {
        let ledgers = Arc::new(ResourceLedgers::new());
        let rooms = Arc::new(RoomDirectory::new(
            engine,
            config.media_codecs,
            config.delete_empty_rooms,
        ));
        let fanout = Arc::new(NotificationFanout::new(Arc::clone(&rooms)));

        Self {
            transports: TransportNegotiator::new(
                Arc::clone(&ledgers),
                Arc::clone(&rooms),
                config.webrtc_transport,
            ),
            producers: ProducerService::new(Arc::clone(&ledgers), Arc::clone(&fanout)),
            consumers: ConsumerService::new(
                Arc::clone(&ledgers),
                Arc::clone(&rooms),
                Arc::clone(&fanout),
            ),
            ledgers,
            rooms,
            fanout,
        }
    }

    /// Accept a connection. The sink receives `connection-success` right away.
    pub fn on_connect(&self, sink: EventSink) -> ParticipantId {
        let participant_id = Uuid::new_v4().to_string();
        self.fanout.register(&participant_id, sink);
        self.fanout.send(
            &participant_id,
            ServerEvent::ConnectionSuccess {
                socket_id: participant_id.clone(),
            },
        );
        info!(participant = %participant_id, "Participant connected");
        participant_id
    }

    /// Join (or create) a room and return its router's RTP capabilities.
    ///
    /// # Errors
    ///
    /// Fails if the connection already joined a room, the room name is
    /// invalid, or the router cannot be created.
    pub async fn on_join_room(
        &self,
        participant_id: &str,
        room_name: &str,
    ) -> Result<RtpCapabilities, SessionError> {
        if let Some(peer) = self.ledgers.peers.get(participant_id) {
            return Err(SessionError::AlreadyJoined(
                participant_id.to_string(),
                peer.room_name,
            ));
        }

        let router = self.rooms.join_or_create(room_name, participant_id).await?;
        self.ledgers.peers.insert(
            participant_id.to_string(),
            PeerEntry::new(participant_id, room_name),
        );

        info!(participant = %participant_id, room = %room_name, "Participant joined room");
        Ok(router.rtp_capabilities())
    }

    /// Release everything the participant owns.
    ///
    /// Safe to call for participants that never joined, own nothing, or were
    /// already disconnected.
    pub fn on_disconnect(&self, participant_id: &str) {
        let consumers = self
            .ledgers
            .consumers
            .filter(|c| c.participant_id == participant_id);
        for (id, entry) in &consumers {
            entry.consumer.close();
            self.ledgers.consumers.remove(id);
        }

        let producers = self
            .ledgers
            .producers
            .filter(|p| p.participant_id == participant_id);
        for (id, entry) in &producers {
            entry.producer.close();
            self.ledgers.producers.remove(id);
        }

        let transports = self
            .ledgers
            .transports
            .filter(|t| t.participant_id == participant_id);
        for (id, entry) in &transports {
            entry.transport.close();
            self.ledgers.transports.remove(id);
        }

        let room = self
            .ledgers
            .peers
            .remove(participant_id)
            .map(|peer| peer.room_name);
        if let Some(room) = &room {
            self.rooms.leave(room, participant_id);
        }
        self.fanout.unregister(participant_id);

        info!(
            participant = %participant_id,
            room = room.as_deref().unwrap_or("-"),
            consumers = consumers.len(),
            producers = producers.len(),
            transports = transports.len(),
            "Participant disconnected"
        );
    }

    /// Handle one request from a participant.
    ///
    /// # Errors
    ///
    /// Returns the [`SessionError`] of the failed operation; the connection
    /// stays usable.
    pub async fn dispatch(
        &self,
        participant_id: &str,
        request: Request,
    ) -> Result<Response, SessionError> {
        debug!(participant = %participant_id, event = request.event_name(), "Request");

        match request {
            Request::JoinRoom { room_name } => {
                let rtp_capabilities = self.on_join_room(participant_id, &room_name).await?;
                Ok(Response::JoinRoom { rtp_capabilities })
            }
            Request::CreateWebRtcTransport { consumer } => {
                let params = self
                    .transports
                    .create_transport(participant_id, consumer)
                    .await?;
                Ok(Response::CreateWebRtcTransport { params })
            }
            Request::TransportConnect { dtls_parameters } => {
                self.transports
                    .connect(participant_id, dtls_parameters, false, None)
                    .await?;
                Ok(Response::TransportConnect)
            }
            Request::TransportProduce {
                kind,
                rtp_parameters,
                app_data,
            } => {
                let produced = self
                    .producers
                    .produce(participant_id, kind, rtp_parameters, app_data)
                    .await?;
                Ok(Response::TransportProduce {
                    id: produced.id,
                    producers_exist: produced.producers_exist,
                })
            }
            Request::TransportRecvConnect {
                dtls_parameters,
                server_consumer_transport_id,
            } => {
                self.transports
                    .connect(
                        participant_id,
                        dtls_parameters,
                        true,
                        Some(&server_consumer_transport_id),
                    )
                    .await?;
                Ok(Response::TransportRecvConnect)
            }
            Request::Consume {
                rtp_capabilities,
                remote_producer_id,
                server_consumer_transport_id,
            } => {
                let params = self
                    .consumers
                    .consume(
                        participant_id,
                        &remote_producer_id,
                        &server_consumer_transport_id,
                        rtp_capabilities,
                    )
                    .await?;
                Ok(Response::Consume { params })
            }
            Request::ConsumerResume { server_consumer_id } => {
                self.consumers
                    .resume(participant_id, &server_consumer_id)
                    .await?;
                Ok(Response::ConsumerResume)
            }
            Request::GetProducers => {
                let producer_ids = self.consumers.list_producers(participant_id)?;
                Ok(Response::GetProducers { producer_ids })
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            rooms: self.rooms.stats().room_count,
            participants: self.ledgers.peers.len(),
            transports: self.ledgers.transports.len(),
            producers: self.ledgers.producers.len(),
            consumers: self.ledgers.consumers.len(),
        }
    }

    /// The resource ledgers.
    #[must_use]
    pub fn ledgers(&self) -> &ResourceLedgers {
        &self.ledgers
    }

    /// The room directory.
    #[must_use]
    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoopbackEngine;
    use tokio::sync::mpsc;

    fn manager() -> (LoopbackEngine, SessionManager) {
        let engine = LoopbackEngine::default();
        let manager = SessionManager::new(Arc::new(engine.clone()), SessionConfig::default());
        (engine, manager)
    }

    #[tokio::test]
    async fn test_connect_sends_connection_success() {
        let (_, manager) = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = manager.on_connect(tx);
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::ConnectionSuccess { socket_id: id }
        );
    }

    #[tokio::test]
    async fn test_join_twice_fails() {
        let (_, manager) = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.on_connect(tx);

        let caps = manager.on_join_room(&id, "r1").await.unwrap();
        assert_eq!(caps.codecs.len(), 2);
        assert!(matches!(
            manager.on_join_room(&id, "r2").await,
            Err(SessionError::AlreadyJoined(_, room)) if room == "r1"
        ));
        assert!(!manager.rooms().contains("r2"));
    }

    #[tokio::test]
    async fn test_requests_before_join() {
        let (_, manager) = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.on_connect(tx);

        for request in [
            Request::GetProducers,
            Request::CreateWebRtcTransport { consumer: false },
        ] {
            assert!(matches!(
                manager.dispatch(&id, request).await,
                Err(SessionError::NotJoined(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_failed_join_leaves_no_state() {
        let (engine, manager) = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.on_connect(tx);
        engine.kill_worker("test");

        assert!(matches!(
            manager.on_join_room(&id, "r1").await,
            Err(SessionError::Engine(_))
        ));
        assert_eq!(manager.stats(), SessionStats::default());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (_, manager) = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.on_connect(tx);

        manager.on_disconnect(&id);
        manager.on_disconnect(&id);
        manager.on_disconnect("never-connected");

        manager.on_join_room(&id, "r1").await.unwrap();
        manager.on_disconnect(&id);
        manager.on_disconnect(&id);
        assert_eq!(manager.stats(), SessionStats::default());
    }
}
