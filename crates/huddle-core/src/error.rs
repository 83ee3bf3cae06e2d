//! Session errors.

use crate::engine::EngineError;
use crate::ledger::{ParticipantId, ProducerId, RoomName};
use huddle_protocol::codes;
use std::fmt;
use thiserror::Error;

/// The kind of resource a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Participant,
    Room,
    Transport,
    Producer,
    Consumer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Participant => "Participant",
            ResourceKind::Room => "Room",
            ResourceKind::Transport => "Transport",
            ResourceKind::Producer => "Producer",
            ResourceKind::Consumer => "Consumer",
        })
    }
}

/// Errors returned by session operations.
///
/// Every variant is reported back on the request that caused it; none of them
/// ends the connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A referenced resource does not exist for the caller.
    #[error("{kind} not found: {id}")]
    LookupFailure { kind: ResourceKind, id: String },

    /// The router reports the producer cannot be consumed with the given capabilities.
    #[error("Producer {0} cannot be consumed with the given RTP capabilities")]
    CapabilityMismatch(ProducerId),

    /// The media engine rejected the call.
    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    /// The request needs a joined room.
    #[error("Participant {0} has not joined a room")]
    NotJoined(ParticipantId),

    /// The connection already joined a room.
    #[error("Participant {0} already joined room {1}")]
    AlreadyJoined(ParticipantId, RoomName),

    /// Participants never consume their own producers.
    #[error("Participant may not consume its own producer {0}")]
    OwnProducer(ProducerId),

    /// The room name was rejected.
    #[error("Invalid room name: {0}")]
    InvalidRoomName(&'static str),
}

impl SessionError {
    /// Shorthand for [`SessionError::LookupFailure`].
    #[must_use]
    pub fn lookup(kind: ResourceKind, id: impl Into<String>) -> Self {
        SessionError::LookupFailure {
            kind,
            id: id.into(),
        }
    }

    /// The wire error code for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            SessionError::LookupFailure { .. } => codes::LOOKUP_FAILURE,
            SessionError::CapabilityMismatch(_) => codes::CAPABILITY_MISMATCH,
            SessionError::Engine(_) => codes::ENGINE_FAILURE,
            SessionError::NotJoined(_) => codes::NOT_JOINED,
            SessionError::AlreadyJoined(..) => codes::ALREADY_JOINED,
            SessionError::OwnProducer(_) => codes::OWN_PRODUCER,
            SessionError::InvalidRoomName(_) => codes::INVALID_ROOM,
        }
    }

    #[must_use]
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, SessionError::LookupFailure { .. })
    }
}
