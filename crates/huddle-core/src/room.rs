//! Room directory.
//!
//! Maps room names to their media router and the participants currently in
//! the room. The router is created by the first joiner and shared by everyone
//! after; concurrent first joiners await the same creation.

use crate::engine::{EngineRouter, MediaEngine};
use crate::error::SessionError;
use crate::ledger::{ParticipantId, RoomName};
use dashmap::DashMap;
use huddle_protocol::RtpCodecCapability;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

struct RoomEntry {
    router: Arc<OnceCell<Arc<dyn EngineRouter>>>,
    /// Participants in join order.
    participants: Vec<ParticipantId>,
}

impl RoomEntry {
    fn new() -> Self {
        Self {
            router: Arc::new(OnceCell::new()),
            participants: Vec::new(),
        }
    }
}

/// Room directory statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    /// Number of rooms.
    pub room_count: usize,
    /// Participants across all rooms.
    pub participant_count: usize,
}

/// The room directory.
pub struct RoomDirectory {
    rooms: DashMap<RoomName, RoomEntry>,
    engine: Arc<dyn MediaEngine>,
    media_codecs: Vec<RtpCodecCapability>,
    delete_empty_rooms: bool,
}

impl RoomDirectory {
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        media_codecs: Vec<RtpCodecCapability>,
        delete_empty_rooms: bool,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            engine,
            media_codecs,
            delete_empty_rooms,
        }
    }

    /// Add a participant to a room, creating the room and its router if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid or the engine fails to
    /// create the router. A failed join leaves no trace in the directory.
    pub async fn join_or_create(
        &self,
        room_name: &str,
        participant_id: &str,
    ) -> Result<Arc<dyn EngineRouter>, SessionError> {
        validate_room_name(room_name).map_err(SessionError::InvalidRoomName)?;

        // Membership is recorded under the shard lock, so a concurrent leave
        // cannot delete the room between here and router creation.
        let cell = {
            let mut entry = self
                .rooms
                .entry(room_name.to_string())
                .or_insert_with(|| {
                    debug!(room = %room_name, "Creating room");
                    RoomEntry::new()
                });
            if !entry.participants.iter().any(|p| p == participant_id) {
                entry.participants.push(participant_id.to_string());
            }
            Arc::clone(&entry.router)
        };

        let created = cell
            .get_or_try_init(|| async {
                let router = self.engine.create_router(&self.media_codecs).await?;
                info!(room = %room_name, router = %router.id(), "New router created");
                Ok::<_, SessionError>(router)
            })
            .await;

        match created {
            Ok(router) => {
                debug!(room = %room_name, participant = %participant_id, "Joined room");
                Ok(Arc::clone(router))
            }
            Err(e) => {
                self.leave(room_name, participant_id);
                Err(e)
            }
        }
    }

    /// Remove a participant from a room.
    ///
    /// Returns `true` if the room was deleted because it became empty.
    pub fn leave(&self, room_name: &str, participant_id: &str) -> bool {
        if let Some(mut entry) = self.rooms.get_mut(room_name) {
            entry.participants.retain(|p| p != participant_id);
            debug!(
                room = %room_name,
                participant = %participant_id,
                remaining = entry.participants.len(),
                "Left room"
            );
        }

        if !self.delete_empty_rooms {
            return false;
        }

        match self
            .rooms
            .remove_if(room_name, |_, entry| entry.participants.is_empty())
        {
            Some((_, entry)) => {
                if let Some(router) = entry.router.get() {
                    router.close();
                }
                info!(room = %room_name, "Deleted empty room");
                true
            }
            None => false,
        }
    }

    /// The router of a room, if the room exists and its router is ready.
    #[must_use]
    pub fn router(&self, room_name: &str) -> Option<Arc<dyn EngineRouter>> {
        self.rooms
            .get(room_name)
            .and_then(|entry| entry.router.get().cloned())
    }

    /// Participants of a room in join order.
    #[must_use]
    pub fn participants(&self, room_name: &str) -> Vec<ParticipantId> {
        self.rooms
            .get(room_name)
            .map(|entry| entry.participants.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, room_name: &str) -> bool {
        self.rooms.contains_key(room_name)
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<RoomName> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> RoomStats {
        RoomStats {
            room_count: self.rooms.len(),
            participant_count: self.rooms.iter().map(|e| e.participants.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoopbackEngine;
    use huddle_protocol::MediaKind;

    fn directory(engine: &LoopbackEngine, delete_empty_rooms: bool) -> RoomDirectory {
        let codecs = vec![RtpCodecCapability::new(MediaKind::Video, "video/VP8", 90_000)];
        RoomDirectory::new(Arc::new(engine.clone()), codecs, delete_empty_rooms)
    }

    #[test]
    fn test_room_name_validation() {
        assert!(validate_room_name("r1").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("bad\nname").is_err());
        assert!(validate_room_name(&"a".repeat(MAX_ROOM_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_router_shared_by_joiners() {
        let engine = LoopbackEngine::default();
        let rooms = directory(&engine, true);

        let a = rooms.join_or_create("r1", "conn-a").await.unwrap();
        let b = rooms.join_or_create("r1", "conn-b").await.unwrap();

        assert_eq!(a.id(), b.id());
        assert_eq!(engine.router_count(), 1);
        assert_eq!(rooms.participants("r1"), vec!["conn-a", "conn-b"]);
    }

    #[tokio::test]
    async fn test_concurrent_first_join_creates_one_router() {
        let engine = LoopbackEngine::default();
        let rooms = Arc::new(directory(&engine, true));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rooms = Arc::clone(&rooms);
                tokio::spawn(async move {
                    rooms
                        .join_or_create("busy", &format!("conn-{}", i))
                        .await
                        .map(|r| r.id().to_string())
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(engine.router_count(), 1);
        assert_eq!(rooms.participants("busy").len(), 8);
    }

    #[tokio::test]
    async fn test_empty_room_deleted() {
        let engine = LoopbackEngine::default();
        let rooms = directory(&engine, true);

        let first = rooms.join_or_create("r1", "conn-a").await.unwrap();
        assert!(!rooms.leave("r1", "conn-b"));
        assert!(rooms.leave("r1", "conn-a"));
        assert!(!rooms.contains("r1"));
        assert_eq!(engine.router_count(), 0);

        let second = rooms.join_or_create("r1", "conn-a").await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_empty_room_kept_when_configured() {
        let engine = LoopbackEngine::default();
        let rooms = directory(&engine, false);

        rooms.join_or_create("r1", "conn-a").await.unwrap();
        assert!(!rooms.leave("r1", "conn-a"));
        assert!(rooms.contains("r1"));
        assert!(rooms.participants("r1").is_empty());
        assert!(rooms.router("r1").is_some());
    }

    #[tokio::test]
    async fn test_failed_router_creation_rolls_back() {
        let engine = LoopbackEngine::default();
        let rooms = directory(&engine, true);
        engine.kill_worker("test");

        let err = rooms.join_or_create("r1", "conn-a").await.unwrap_err();
        assert!(matches!(err, SessionError::Engine(_)));
        assert!(!rooms.contains("r1"));
        assert_eq!(rooms.stats().room_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_room_rejected() {
        let engine = LoopbackEngine::default();
        let rooms = directory(&engine, true);

        assert!(matches!(
            rooms.join_or_create("", "conn-a").await,
            Err(SessionError::InvalidRoomName(_))
        ));
        assert!(rooms.room_names().is_empty());
    }
}
