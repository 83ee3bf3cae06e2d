//! Notification fanout.
//!
//! Owns each participant's outbound event sink and broadcasts server events
//! to the other participants of a room. Delivery is fire-and-forget.

use crate::ledger::ParticipantId;
use crate::room::RoomDirectory;
use dashmap::DashMap;
use huddle_protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Sender half of a participant's event sink.
pub type EventSink = mpsc::UnboundedSender<ServerEvent>;

/// Per-participant event sinks.
pub struct NotificationFanout {
    sinks: DashMap<ParticipantId, EventSink>,
    rooms: Arc<RoomDirectory>,
}

impl NotificationFanout {
    #[must_use]
    pub fn new(rooms: Arc<RoomDirectory>) -> Self {
        Self {
            sinks: DashMap::new(),
            rooms,
        }
    }

    /// Register a participant's sink, replacing any previous one.
    pub fn register(&self, participant_id: &str, sink: EventSink) {
        self.sinks.insert(participant_id.to_string(), sink);
    }

    /// Drop a participant's sink. Returns `false` if none was registered.
    pub fn unregister(&self, participant_id: &str) -> bool {
        self.sinks.remove(participant_id).is_some()
    }

    /// Send an event to one participant.
    ///
    /// Returns `true` if the event was queued on a live sink.
    pub fn send(&self, participant_id: &str, event: ServerEvent) -> bool {
        let Some(sink) = self.sinks.get(participant_id).map(|s| s.value().clone()) else {
            debug!(participant = %participant_id, "No event sink registered");
            return false;
        };
        match sink.send(event) {
            Ok(()) => {
                trace!(participant = %participant_id, "Event queued");
                true
            }
            Err(_) => {
                debug!(participant = %participant_id, "Event sink closed");
                false
            }
        }
    }

    /// Tell every participant of `room_name` except `publisher_id` that a new
    /// producer is available.
    ///
    /// Returns the number of participants the event was queued for.
    pub fn notify_new_producer(
        &self,
        room_name: &str,
        publisher_id: &str,
        producer_id: &str,
    ) -> usize {
        let recipients: Vec<_> = self
            .rooms
            .participants(room_name)
            .into_iter()
            .filter(|p| p != publisher_id)
            .collect();

        let delivered = recipients
            .iter()
            .filter(|p| {
                self.send(
                    p,
                    ServerEvent::NewProducer {
                        producer_id: producer_id.to_string(),
                    },
                )
            })
            .count();

        debug!(
            room = %room_name,
            producer = %producer_id,
            recipients = recipients.len(),
            delivered,
            "Announced new producer"
        );
        delivered
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}
