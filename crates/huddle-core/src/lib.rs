//! # huddle-core
//!
//! Session orchestration for the Huddle SFU signaling server.
//!
//! This crate tracks rooms, participants and the media paths between them:
//!
//! - **Ledger** - Registries of transports, producers, consumers and peers
//! - **Room** - Room directory with one media router per room
//! - **Transport** - WebRTC transport creation and DTLS connection
//! - **Producer** / **Consumer** - Publishing and subscribing to media streams
//! - **Fanout** - Per-participant event sinks and room broadcasts
//! - **Session** - Connection lifecycle and request dispatch
//! - **Engine** - The media engine seam, the mediasoup engine and a loopback test double
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────┐     ┌───────────────┐
//! │  Connection │────▶│ SessionManager │────▶│ RoomDirectory │
//! └─────────────┘     └────────────────┘     └───────────────┘
//!                       │      │      │
//!                       ▼      ▼      ▼
//!             Transport   Producer   Consumer ──▶ MediaEngine
//!                            │
//!                            ▼
//!                   ┌────────────────────┐
//!                   │ NotificationFanout │
//!                   └────────────────────┘
//! ```

pub mod consumer;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod ledger;
pub mod producer;
pub mod room;
pub mod session;
pub mod transport;

pub use consumer::ConsumerService;
pub use engine::{EngineError, LoopbackConfig, LoopbackEngine, MediaEngine};
#[cfg(feature = "mediasoup")]
pub use engine::{MediasoupConfig, MediasoupEngine};
pub use error::{ResourceKind, SessionError};
pub use fanout::{EventSink, NotificationFanout};
pub use ledger::{ParticipantId, ResourceLedgers};
pub use producer::{Produced, ProducerService};
pub use room::{RoomDirectory, RoomStats};
pub use session::{default_media_codecs, SessionConfig, SessionManager, SessionStats};
pub use transport::TransportNegotiator;
