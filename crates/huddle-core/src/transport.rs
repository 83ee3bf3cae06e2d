//! Transport negotiation.
//!
//! Creates and connects the WebRTC transports each participant uses to send
//! and receive media. A transport whose DTLS state reaches `closed` is closed
//! and dropped from the ledger.

use crate::engine::{DtlsState, TransportEvent, WebRtcTransportOptions};
use crate::error::{ResourceKind, SessionError};
use crate::ledger::{ResourceLedgers, TransportEntry, TransportId};
use crate::room::RoomDirectory;
use huddle_protocol::{DtlsParameters, TransportParams};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Creates and connects participant transports.
pub struct TransportNegotiator {
    ledgers: Arc<ResourceLedgers>,
    rooms: Arc<RoomDirectory>,
    options: WebRtcTransportOptions,
}

impl TransportNegotiator {
    #[must_use]
    pub fn new(
        ledgers: Arc<ResourceLedgers>,
        rooms: Arc<RoomDirectory>,
        options: WebRtcTransportOptions,
    ) -> Self {
        Self {
            ledgers,
            rooms,
            options,
        }
    }

    /// Create a send-side or receive-side transport on the participant's room router.
    ///
    /// # Errors
    ///
    /// Fails if the participant has not joined, the room has no router, or the
    /// engine rejects the transport.
    pub async fn create_transport(
        &self,
        participant_id: &str,
        consumer_side: bool,
    ) -> Result<TransportParams, SessionError> {
        let peer = self
            .ledgers
            .peers
            .get(participant_id)
            .ok_or_else(|| SessionError::NotJoined(participant_id.to_string()))?;
        let router = self
            .rooms
            .router(&peer.room_name)
            .ok_or_else(|| SessionError::lookup(ResourceKind::Room, &peer.room_name))?;

        let transport = router.create_webrtc_transport(&self.options).await?;
        let transport_id = transport.id().to_string();
        let events = transport.subscribe();

        self.ledgers.transports.insert(
            transport_id.clone(),
            TransportEntry {
                participant_id: participant_id.to_string(),
                room_name: peer.room_name.clone(),
                consumer_side,
                transport: Arc::clone(&transport),
            },
        );
        let owned = self.ledgers.peers.update(participant_id, |peer| {
            peer.transports.push(transport_id.clone());
        });
        if !owned {
            // The participant left while the engine was busy.
            self.ledgers.transports.remove(&transport_id);
            transport.close();
            return Err(SessionError::lookup(ResourceKind::Participant, participant_id));
        }

        tokio::spawn(watch_transport(
            Arc::clone(&self.ledgers),
            transport_id.clone(),
            events,
        ));

        info!(
            participant = %participant_id,
            room = %peer.room_name,
            transport = %transport_id,
            consumer_side,
            "Transport created"
        );

        Ok(TransportParams {
            id: transport_id,
            ice_parameters: transport.ice_parameters(),
            ice_candidates: transport.ice_candidates(),
            dtls_parameters: transport.dtls_parameters(),
        })
    }

    /// Complete the DTLS handshake of one of the participant's transports.
    ///
    /// The send side connects the participant's send transport; the receive
    /// side connects the named receive transport.
    ///
    /// # Errors
    ///
    /// Returns a lookup failure if the transport does not exist or belongs to
    /// someone else, and engine errors from the handshake.
    pub async fn connect(
        &self,
        participant_id: &str,
        dtls_parameters: DtlsParameters,
        consumer_side: bool,
        transport_id: Option<&str>,
    ) -> Result<(), SessionError> {
        let (transport_id, entry) = if consumer_side {
            let id = transport_id.unwrap_or_default();
            let entry = self
                .ledgers
                .transports
                .get(id)
                .filter(|t| t.participant_id == participant_id && t.consumer_side)
                .ok_or_else(|| SessionError::lookup(ResourceKind::Transport, id))?;
            (id.to_string(), entry)
        } else {
            self.ledgers
                .send_transport(participant_id)
                .ok_or_else(|| SessionError::lookup(ResourceKind::Transport, participant_id))?
        };

        entry.transport.connect(dtls_parameters).await?;
        debug!(
            participant = %participant_id,
            transport = %transport_id,
            consumer_side,
            "Transport connected"
        );
        Ok(())
    }
}

/// Drop a transport from the ledger once DTLS closes or the engine closes it.
async fn watch_transport(
    ledgers: Arc<ResourceLedgers>,
    transport_id: TransportId,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        match events.recv().await {
            Ok(TransportEvent::DtlsStateChanged(DtlsState::Closed)) => {
                if let Some(entry) = ledgers.remove_transport(&transport_id) {
                    entry.transport.close();
                    info!(
                        participant = %entry.participant_id,
                        transport = %transport_id,
                        "Transport closed after DTLS closed"
                    );
                }
                return;
            }
            Ok(TransportEvent::Closed) => {
                if ledgers.remove_transport(&transport_id).is_some() {
                    debug!(transport = %transport_id, "Closed transport removed");
                }
                return;
            }
            Ok(TransportEvent::DtlsStateChanged(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(transport = %transport_id, skipped, "Transport events lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
