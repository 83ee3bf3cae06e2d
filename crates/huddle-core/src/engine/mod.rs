//! Media engine abstraction.
//!
//! The orchestrator never touches media. It asks an engine to create routers,
//! transports, producers and consumers, and reacts to the lifecycle events the
//! engine reports on each of them. [`native::MediasoupEngine`] drives a
//! mediasoup worker and is what the server runs. [`loopback::LoopbackEngine`]
//! negotiates in process without moving media and backs the test suite.

pub mod loopback;
#[cfg(feature = "mediasoup")]
pub mod native;

use async_trait::async_trait;
use huddle_protocol::{
    DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpParameters,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;

pub use loopback::{LoopbackConfig, LoopbackEngine};
#[cfg(feature = "mediasoup")]
pub use native::{MediasoupConfig, MediasoupEngine};

/// Capacity of each resource's event channel.
const EVENT_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Errors reported by the media engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The worker process is gone.
    #[error("Media worker is closed")]
    WorkerClosed,

    /// The router was closed.
    #[error("Router {0} is closed")]
    RouterClosed(String),

    /// The transport was closed.
    #[error("Transport {0} is closed")]
    TransportClosed(String),

    /// `connect` was called twice on the same transport.
    #[error("Transport {0} is already connected")]
    AlreadyConnected(String),

    /// The producer is not known to the router.
    #[error("Unknown producer: {0}")]
    UnknownProducer(String),

    /// The consumer was closed.
    #[error("Consumer {0} is closed")]
    ConsumerClosed(String),

    /// The RTP or DTLS parameters were rejected.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// No port left in the configured RTC range.
    #[error("No RTC port available")]
    PortsExhausted,

    /// The worker could not be spawned.
    #[error("Failed to start media worker: {0}")]
    WorkerStart(String),

    /// The worker failed a request.
    #[error("Media worker request failed: {0}")]
    Request(String),
}

/// DTLS state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtlsState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DtlsStateChanged(DtlsState),
    /// The transport was closed, by request or by its router.
    Closed,
}

/// Events emitted by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    /// The transport the producer was created on closed; the producer is unusable.
    TransportClosed,
    Closed,
}

/// Events emitted by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// The remote producer went away; the consumer is closed.
    ProducerClosed,
    /// The transport the consumer was created on closed.
    TransportClosed,
    Closed,
}

/// A local address a WebRTC transport listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenIp {
    /// Address to bind.
    pub ip: String,
    /// Address announced in ICE candidates, if different from `ip`.
    #[serde(default)]
    pub announced_ip: Option<String>,
}

/// Options for [`EngineRouter::create_webrtc_transport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRtcTransportOptions {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

impl Default for WebRtcTransportOptions {
    fn default() -> Self {
        Self {
            listen_ips: vec![ListenIp {
                ip: "0.0.0.0".to_string(),
                announced_ip: Some("127.0.0.1".to_string()),
            }],
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

/// A media worker able to host routers.
#[async_trait]
pub trait MediaEngine: Send + Sync + fmt::Debug {
    /// Identifier of the worker (a pid for process-backed engines).
    fn worker_id(&self) -> String;

    /// Create a router supporting the given codecs.
    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn EngineRouter>, EngineError>;

    /// Resolves with a reason once the worker has died.
    async fn died(&self) -> String;
}

/// One room's routing and codec negotiation context.
#[async_trait]
pub trait EngineRouter: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// The RTP capabilities clients must load before producing or consuming.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether `producer_id` can be consumed by an endpoint with these capabilities.
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Arc<dyn EngineTransport>, EngineError>;

    /// Close the router and every transport on it.
    fn close(&self);
}

/// A negotiated ICE/DTLS path between one client and the engine.
#[async_trait]
pub trait EngineTransport: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn ice_parameters(&self) -> IceParameters;
    fn ice_candidates(&self) -> Vec<IceCandidate>;
    fn dtls_parameters(&self) -> DtlsParameters;
    fn dtls_state(&self) -> DtlsState;

    /// Complete the DTLS handshake with the client's parameters.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), EngineError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn EngineProducer>, EngineError>;

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError>;

    fn close(&self);
    fn is_closed(&self) -> bool;
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// An outgoing media stream registered with the engine.
pub trait EngineProducer: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;
    fn close(&self);
    fn is_closed(&self) -> bool;
    fn subscribe(&self) -> broadcast::Receiver<ProducerEvent>;
}

/// A subscription of one transport to a producer.
#[async_trait]
pub trait EngineConsumer: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn producer_id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;
    fn paused(&self) -> bool;

    /// Let media flow.
    async fn resume(&self) -> Result<(), EngineError>;

    fn close(&self);
    fn is_closed(&self) -> bool;
    fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent>;
}
