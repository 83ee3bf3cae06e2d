//! Producer registration.

use crate::engine::ProducerEvent;
use crate::error::{ResourceKind, SessionError};
use crate::fanout::NotificationFanout;
use crate::ledger::{ProducerEntry, ProducerId, ResourceLedgers};
use huddle_protocol::{MediaKind, RtpParameters};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Registers outgoing media streams and announces them to the room.
pub struct ProducerService {
    ledgers: Arc<ResourceLedgers>,
    fanout: Arc<NotificationFanout>,
}

/// Result of a successful `produce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Produced {
    pub id: ProducerId,
    /// Whether other participants of the room already produce.
    pub producers_exist: bool,
}

impl ProducerService {
    #[must_use]
    pub fn new(ledgers: Arc<ResourceLedgers>, fanout: Arc<NotificationFanout>) -> Self {
        Self { ledgers, fanout }
    }

    /// Start producing on the participant's send transport.
    ///
    /// Every other participant of the room is sent `new-producer` once the
    /// producer is registered.
    ///
    /// # Errors
    ///
    /// Fails if the participant has not joined, owns no send transport, or the
    /// engine rejects the RTP parameters.
    pub async fn produce(
        &self,
        participant_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Option<serde_json::Value>,
    ) -> Result<Produced, SessionError> {
        let peer = self
            .ledgers
            .peers
            .get(participant_id)
            .ok_or_else(|| SessionError::NotJoined(participant_id.to_string()))?;
        let (transport_id, transport) = self
            .ledgers
            .send_transport(participant_id)
            .ok_or_else(|| SessionError::lookup(ResourceKind::Transport, participant_id))?;

        let producer = transport.transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id().to_string();
        let events = producer.subscribe();

        self.ledgers.producers.insert(
            producer_id.clone(),
            ProducerEntry {
                participant_id: participant_id.to_string(),
                room_name: peer.room_name.clone(),
                kind,
                app_data,
                producer: Arc::clone(&producer),
            },
        );
        let owned = self.ledgers.peers.update(participant_id, |peer| {
            peer.producers.push(producer_id.clone());
        });
        if !owned || producer.is_closed() {
            self.ledgers.remove_producer(&producer_id);
            producer.close();
            return Err(SessionError::lookup(ResourceKind::Transport, transport_id));
        }

        tokio::spawn(watch_producer(
            Arc::clone(&self.ledgers),
            producer_id.clone(),
            events,
        ));

        let producers_exist = self
            .ledgers
            .producers
            .any(|p| p.room_name == peer.room_name && p.participant_id != participant_id);

        info!(
            participant = %participant_id,
            room = %peer.room_name,
            transport = %transport_id,
            producer = %producer_id,
            %kind,
            "Producer created"
        );

        self.fanout
            .notify_new_producer(&peer.room_name, participant_id, &producer_id);

        Ok(Produced {
            id: producer_id,
            producers_exist,
        })
    }
}

/// Close a producer when its transport goes away.
async fn watch_producer(
    ledgers: Arc<ResourceLedgers>,
    producer_id: ProducerId,
    mut events: broadcast::Receiver<ProducerEvent>,
) {
    loop {
        match events.recv().await {
            Ok(ProducerEvent::TransportClosed) => {
                debug!(producer = %producer_id, "Transport for this producer closed");
                if let Some(entry) = ledgers.remove_producer(&producer_id) {
                    entry.producer.close();
                }
                return;
            }
            Ok(ProducerEvent::Closed) => {
                ledgers.remove_producer(&producer_id);
                return;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(producer = %producer_id, skipped, "Producer events lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
