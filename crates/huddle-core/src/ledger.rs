//! Resource ledgers.
//!
//! Four independent registries (transports, producers, consumers, peers) keyed
//! by identifier. Every entry is tagged with the participant that owns it and
//! the room it lives in. Each ledger is a sharded concurrent map, so inserts,
//! removals and lookups are atomic with respect to other connections.

use crate::engine::{EngineConsumer, EngineProducer, EngineTransport};
use dashmap::DashMap;
use huddle_protocol::MediaKind;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

/// A participant identifier, allocated per signaling connection.
pub type ParticipantId = String;
/// A room name.
pub type RoomName = String;
/// A transport identifier assigned by the media engine.
pub type TransportId = String;
/// A producer identifier assigned by the media engine.
pub type ProducerId = String;
/// A consumer identifier assigned by the media engine.
pub type ConsumerId = String;

/// A concurrent registry keyed by identifier.
#[derive(Debug)]
pub struct Ledger<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
}

impl<K, V> Ledger<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Apply `f` to an entry in place. Returns `false` if the key is absent.
    pub fn update<Q>(&self, key: &Q, f: impl FnOnce(&mut V)) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Clones of every entry matching `predicate`.
    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&V) -> bool) -> Vec<(K, V)> {
        self.entries
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    #[must_use]
    pub fn any(&self, predicate: impl Fn(&V) -> bool) -> bool {
        self.entries.iter().any(|e| predicate(e.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for Ledger<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A registered WebRTC transport.
#[derive(Debug, Clone)]
pub struct TransportEntry {
    pub participant_id: ParticipantId,
    pub room_name: RoomName,
    /// `true` for receive-side (consumer) transports.
    pub consumer_side: bool,
    pub transport: Arc<dyn EngineTransport>,
}

/// A registered producer.
#[derive(Debug, Clone)]
pub struct ProducerEntry {
    pub participant_id: ParticipantId,
    pub room_name: RoomName,
    pub kind: MediaKind,
    pub app_data: Option<serde_json::Value>,
    pub producer: Arc<dyn EngineProducer>,
}

/// A registered consumer.
#[derive(Debug, Clone)]
pub struct ConsumerEntry {
    pub participant_id: ParticipantId,
    pub room_name: RoomName,
    /// Producer of another participant this consumer receives.
    pub remote_producer_id: ProducerId,
    /// Receive transport the consumer was created on.
    pub transport_id: TransportId,
    pub consumer: Arc<dyn EngineConsumer>,
}

/// Display metadata of a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDetails {
    pub name: String,
    pub is_admin: bool,
}

/// A participant that joined a room.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub participant_id: ParticipantId,
    pub room_name: RoomName,
    pub details: PeerDetails,
    /// Owned transports, in creation order.
    pub transports: Vec<TransportId>,
    /// Owned producers, in creation order.
    pub producers: Vec<ProducerId>,
    /// Owned consumers, in creation order.
    pub consumers: Vec<ConsumerId>,
}

impl PeerEntry {
    #[must_use]
    pub fn new(participant_id: impl Into<ParticipantId>, room_name: impl Into<RoomName>) -> Self {
        Self {
            participant_id: participant_id.into(),
            room_name: room_name.into(),
            details: PeerDetails::default(),
            transports: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }
}

/// The four resource registries.
#[derive(Debug, Default)]
pub struct ResourceLedgers {
    pub transports: Ledger<TransportId, TransportEntry>,
    pub producers: Ledger<ProducerId, ProducerEntry>,
    pub consumers: Ledger<ConsumerId, ConsumerEntry>,
    pub peers: Ledger<ParticipantId, PeerEntry>,
}

impl ResourceLedgers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any transport, producer or consumer still names `participant_id`.
    #[must_use]
    pub fn references(&self, participant_id: &str) -> bool {
        self.transports.any(|t| t.participant_id == participant_id)
            || self.producers.any(|p| p.participant_id == participant_id)
            || self.consumers.any(|c| c.participant_id == participant_id)
    }

    /// The first send-side transport `participant_id` created.
    #[must_use]
    pub fn send_transport(&self, participant_id: &str) -> Option<(TransportId, TransportEntry)> {
        let peer = self.peers.get(participant_id)?;
        peer.transports.into_iter().find_map(|id| {
            self.transports
                .get(&id)
                .filter(|t| !t.consumer_side)
                .map(|t| (id, t))
        })
    }

    /// Remove a transport and drop it from its owner's list.
    pub fn remove_transport(&self, transport_id: &str) -> Option<TransportEntry> {
        let entry = self.transports.remove(transport_id)?;
        self.peers.update(&entry.participant_id, |peer| {
            peer.transports.retain(|id| id != transport_id);
        });
        Some(entry)
    }

    /// Remove a producer and drop it from its owner's list.
    pub fn remove_producer(&self, producer_id: &str) -> Option<ProducerEntry> {
        let entry = self.producers.remove(producer_id)?;
        self.peers.update(&entry.participant_id, |peer| {
            peer.producers.retain(|id| id != producer_id);
        });
        Some(entry)
    }

    /// Remove a consumer and drop it from its owner's list.
    pub fn remove_consumer(&self, consumer_id: &str) -> Option<ConsumerEntry> {
        let entry = self.consumers.remove(consumer_id)?;
        self.peers.update(&entry.participant_id, |peer| {
            peer.consumers.retain(|id| id != consumer_id);
        });
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_insert_remove() {
        let ledger: Ledger<String, u32> = Ledger::new();

        assert!(ledger.insert("a".into(), 1).is_none());
        assert_eq!(ledger.insert("a".into(), 2), Some(1));
        assert_eq!(ledger.get("a"), Some(2));
        assert_eq!(ledger.len(), 1);

        assert_eq!(ledger.remove("a"), Some(2));
        assert!(ledger.remove("a").is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_ledger_update_and_filter() {
        let ledger: Ledger<String, u32> = Ledger::new();
        ledger.insert("a".into(), 1);
        ledger.insert("b".into(), 2);

        assert!(ledger.update("a", |v| *v += 10));
        assert!(!ledger.update("missing", |v| *v += 10));

        let mut big = ledger.filter(|v| *v > 5);
        big.sort();
        assert_eq!(big, vec![("a".to_string(), 11)]);
        assert!(ledger.any(|v| *v == 2));
    }

    #[test]
    fn test_peer_entry_starts_empty() {
        let peer = PeerEntry::new("conn-1", "r1");
        assert_eq!(peer.room_name, "r1");
        assert!(peer.transports.is_empty());
        assert_eq!(peer.details, PeerDetails::default());

        let ledgers = ResourceLedgers::new();
        ledgers.peers.insert(peer.participant_id.clone(), peer);
        assert!(!ledgers.references("conn-1"));
        assert!(ledgers.send_transport("conn-1").is_none());
        assert!(ledgers.remove_transport("missing").is_none());
    }

    #[tokio::test]
    async fn test_remove_updates_owner_lists() {
        use crate::engine::{LoopbackEngine, MediaEngine, WebRtcTransportOptions};

        let engine = LoopbackEngine::default();
        let router = engine.create_router(&[]).await.unwrap();
        let options = WebRtcTransportOptions::default();
        let recv = router.create_webrtc_transport(&options).await.unwrap();
        let send = router.create_webrtc_transport(&options).await.unwrap();

        let ledgers = ResourceLedgers::new();
        let mut peer = PeerEntry::new("conn-1", "r1");
        for (transport, consumer_side) in [(&recv, true), (&send, false)] {
            peer.transports.push(transport.id().to_string());
            ledgers.transports.insert(
                transport.id().to_string(),
                TransportEntry {
                    participant_id: "conn-1".into(),
                    room_name: "r1".into(),
                    consumer_side,
                    transport: Arc::clone(transport),
                },
            );
        }
        ledgers.peers.insert("conn-1".into(), peer);

        let (id, _) = ledgers.send_transport("conn-1").unwrap();
        assert_eq!(id, send.id());
        assert!(ledgers.references("conn-1"));

        assert!(ledgers.remove_transport(send.id()).is_some());
        assert!(ledgers.send_transport("conn-1").is_none());
        assert_eq!(
            ledgers.peers.get("conn-1").unwrap().transports,
            vec![recv.id().to_string()]
        );
    }
}
