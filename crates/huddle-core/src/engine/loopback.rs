//! In-process media engine.
//!
//! `LoopbackEngine` negotiates like a selective forwarding unit but never binds
//! a socket or moves a packet. It is the test double for the orchestrator and
//! serves signaling-only development runs (`media.engine = "loopback"`).

use super::{
    lock, ConsumerEvent, DtlsState, EngineConsumer, EngineError, EngineProducer, EngineRouter,
    EngineTransport, MediaEngine, ProducerEvent, TransportEvent, WebRtcTransportOptions,
    EVENT_CAPACITY,
};
use async_trait::async_trait;
use dashmap::DashMap;
use huddle_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceProtocol,
    MediaKind, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpParameters,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// First payload type handed out to router codecs.
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

/// Loopback engine configuration.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Lowest port handed to transports.
    pub rtc_min_port: u16,
    /// Highest port handed to transports.
    pub rtc_max_port: u16,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: 2000,
            rtc_max_port: 4000,
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Round-robin allocator over the RTC port range.
#[derive(Debug)]
struct PortPool {
    min: u16,
    max: u16,
    next: u16,
    in_use: BTreeSet<u16>,
}

impl PortPool {
    fn new(min: u16, max: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            next: min,
            in_use: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        let span = u32::from(self.max - self.min) + 1;
        for _ in 0..span {
            let port = self.next;
            self.next = if self.next >= self.max {
                self.min
            } else {
                self.next + 1
            };
            if self.in_use.insert(port) {
                return Some(port);
            }
        }
        None
    }

    fn release(&mut self, port: u16) {
        self.in_use.remove(&port);
    }
}

#[derive(Debug)]
struct Worker {
    id: String,
    ports: Mutex<PortPool>,
    closed: AtomicBool,
    died: watch::Sender<Option<String>>,
    routers: DashMap<String, Weak<LoopbackRouter>>,
    transports: DashMap<String, Weak<LoopbackTransport>>,
}

/// An in-process media engine.
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    worker: Arc<Worker>,
}

impl LoopbackEngine {
    /// Start a loopback worker.
    #[must_use]
    pub fn new(config: LoopbackConfig) -> Self {
        let (died, _) = watch::channel(None);
        let worker = Worker {
            id: format!("loopback-{}", std::process::id()),
            ports: Mutex::new(PortPool::new(config.rtc_min_port, config.rtc_max_port)),
            closed: AtomicBool::new(false),
            died,
            routers: DashMap::new(),
            transports: DashMap::new(),
        };
        info!(
            worker = %worker.id,
            min_port = config.rtc_min_port,
            max_port = config.rtc_max_port,
            "Loopback media worker started"
        );
        Self {
            worker: Arc::new(worker),
        }
    }

    /// Number of routers that are still open.
    #[must_use]
    pub fn router_count(&self) -> usize {
        self.worker
            .routers
            .iter()
            .filter(|r| r.value().upgrade().is_some_and(|r| !r.is_closed()))
            .count()
    }

    /// Number of RTC ports currently held by transports.
    #[must_use]
    pub fn ports_in_use(&self) -> usize {
        lock(&self.worker.ports).in_use.len()
    }

    /// Move a transport's DTLS state to `closed`, as a peer tearing down its
    /// connection would. Returns `false` if the transport is unknown.
    pub fn close_dtls(&self, transport_id: &str) -> bool {
        let transport = self
            .worker
            .transports
            .get(transport_id)
            .and_then(|t| t.value().upgrade());
        match transport {
            Some(transport) if !transport.is_closed() => {
                transport.set_dtls_state(DtlsState::Closed);
                true
            }
            _ => false,
        }
    }

    /// Terminate the worker. Every router closes and [`MediaEngine::died`] resolves.
    pub fn kill_worker(&self, reason: impl Into<String>) {
        if self.worker.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        error!(worker = %self.worker.id, reason = %reason, "Media worker died");

        let routers: Vec<_> = self
            .worker
            .routers
            .iter()
            .filter_map(|r| r.value().upgrade())
            .collect();
        for router in routers {
            router.close();
        }
        self.worker.died.send_replace(Some(reason));
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    fn worker_id(&self) -> String {
        self.worker.id.clone()
    }

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn EngineRouter>, EngineError> {
        if self.worker.closed.load(Ordering::SeqCst) {
            return Err(EngineError::WorkerClosed);
        }
        let router = LoopbackRouter::new(Arc::clone(&self.worker), media_codecs);
        self.worker
            .routers
            .insert(router.id.clone(), Arc::downgrade(&router));
        debug!(router = %router.id, codecs = media_codecs.len(), "Router created");
        Ok(router)
    }

    async fn died(&self) -> String {
        let mut rx = self.worker.died.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return "worker dropped".to_string();
            }
        }
    }
}

fn router_capabilities(media_codecs: &[RtpCodecCapability]) -> RtpCapabilities {
    let codecs = media_codecs
        .iter()
        .enumerate()
        .map(|(index, codec)| {
            let mut codec = codec.clone();
            if codec.preferred_payload_type.is_none() {
                codec.preferred_payload_type =
                    Some(FIRST_DYNAMIC_PAYLOAD_TYPE + (index % 28) as u8);
            }
            codec
        })
        .collect();

    RtpCapabilities {
        codecs,
        header_extensions: Vec::new(),
    }
}

/// First media (non-RTX) codec of `rtp_parameters`.
fn primary_codec(rtp_parameters: &RtpParameters) -> Option<&RtpCodecParameters> {
    rtp_parameters
        .codecs
        .iter()
        .find(|c| !c.mime_type.to_ascii_lowercase().ends_with("/rtx"))
}

/// The capability in `capabilities` able to receive `codec`.
fn matching_capability<'a>(
    kind: MediaKind,
    codec: &RtpCodecParameters,
    capabilities: &'a RtpCapabilities,
) -> Option<&'a RtpCodecCapability> {
    capabilities
        .codecs
        .iter()
        .find(|c| c.kind == kind && c.matches(&codec.mime_type, codec.clock_rate, codec.channels))
}

fn fingerprint() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// A loopback router.
#[derive(Debug)]
pub struct LoopbackRouter {
    id: String,
    me: Weak<LoopbackRouter>,
    worker: Arc<Worker>,
    capabilities: RtpCapabilities,
    producers: DashMap<String, Arc<LoopbackProducer>>,
    transports: DashMap<String, Arc<LoopbackTransport>>,
    closed: AtomicBool,
}

impl LoopbackRouter {
    fn new(worker: Arc<Worker>, media_codecs: &[RtpCodecCapability]) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: new_id(),
            me: me.clone(),
            worker,
            capabilities: router_capabilities(media_codecs),
            producers: DashMap::new(),
            transports: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn supports(&self, kind: MediaKind, codec: &RtpCodecParameters) -> bool {
        matching_capability(kind, codec, &self.capabilities).is_some()
    }
}

#[async_trait]
impl EngineRouter for LoopbackRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let Some(producer) = self.producers.get(producer_id).map(|p| Arc::clone(p.value()))
        else {
            return false;
        };
        if producer.is_closed() {
            return false;
        }
        primary_codec(&producer.rtp_parameters)
            .and_then(|codec| matching_capability(producer.kind, codec, rtp_capabilities))
            .is_some()
    }

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Arc<dyn EngineTransport>, EngineError> {
        if self.worker.closed.load(Ordering::SeqCst) {
            return Err(EngineError::WorkerClosed);
        }
        if self.is_closed() {
            return Err(EngineError::RouterClosed(self.id.clone()));
        }
        if !options.enable_udp && !options.enable_tcp {
            return Err(EngineError::InvalidParameters(
                "both UDP and TCP are disabled".to_string(),
            ));
        }
        if options.listen_ips.is_empty() {
            return Err(EngineError::InvalidParameters(
                "no listen IPs configured".to_string(),
            ));
        }

        let port = lock(&self.worker.ports)
            .allocate()
            .ok_or(EngineError::PortsExhausted)?;

        let (udp_priority, tcp_priority) = if options.prefer_udp {
            (1_076_302_079, 1_076_276_479)
        } else {
            (1_076_276_479, 1_076_302_079)
        };
        let mut ice_candidates = Vec::new();
        for listen in &options.listen_ips {
            let address = listen.announced_ip.clone().unwrap_or_else(|| listen.ip.clone());
            if options.enable_udp {
                ice_candidates.push(IceCandidate {
                    foundation: "udpcandidate".to_string(),
                    priority: udp_priority,
                    address: address.clone(),
                    protocol: IceProtocol::Udp,
                    port,
                    candidate_type: "host".to_string(),
                    tcp_type: None,
                });
            }
            if options.enable_tcp {
                ice_candidates.push(IceCandidate {
                    foundation: "tcpcandidate".to_string(),
                    priority: tcp_priority,
                    address,
                    protocol: IceProtocol::Tcp,
                    port,
                    candidate_type: "host".to_string(),
                    tcp_type: Some("passive".to_string()),
                });
            }
        }

        let transport = LoopbackTransport::new(
            self.me.clone(),
            Arc::clone(&self.worker),
            port,
            ice_candidates,
        );
        self.transports
            .insert(transport.id.clone(), Arc::clone(&transport));
        self.worker
            .transports
            .insert(transport.id.clone(), Arc::downgrade(&transport));

        debug!(router = %self.id, transport = %transport.id, port, "WebRTC transport created");
        Ok(transport)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<_> = self
            .transports
            .iter()
            .map(|t| Arc::clone(t.value()))
            .collect();
        for transport in transports {
            transport.close();
        }
        self.worker.routers.remove(&self.id);
        debug!(router = %self.id, "Router closed");
    }
}

/// A loopback WebRTC transport.
#[derive(Debug)]
pub struct LoopbackTransport {
    id: String,
    me: Weak<LoopbackTransport>,
    router: Weak<LoopbackRouter>,
    worker: Arc<Worker>,
    port: u16,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    dtls_parameters: DtlsParameters,
    dtls_state: Mutex<DtlsState>,
    producers: DashMap<String, Arc<LoopbackProducer>>,
    consumers: DashMap<String, Arc<LoopbackConsumer>>,
    closed: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl LoopbackTransport {
    fn new(
        router: Weak<LoopbackRouter>,
        worker: Arc<Worker>,
        port: u16,
        ice_candidates: Vec<IceCandidate>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let credentials = Uuid::new_v4().simple().to_string();
        Arc::new_cyclic(|me| Self {
            id: new_id(),
            me: me.clone(),
            router,
            worker,
            port,
            ice_parameters: IceParameters {
                username_fragment: credentials[..16].to_string(),
                password: Uuid::new_v4().simple().to_string(),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: Some(DtlsRole::Auto),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: fingerprint(),
                }],
            },
            dtls_state: Mutex::new(DtlsState::New),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            closed: AtomicBool::new(false),
            events,
        })
    }

    fn set_dtls_state(&self, state: DtlsState) {
        *lock(&self.dtls_state) = state;
        trace!(transport = %self.id, ?state, "DTLS state changed");
        let _ = self.events.send(TransportEvent::DtlsStateChanged(state));
    }

    fn live_router(&self) -> Result<Arc<LoopbackRouter>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::TransportClosed(self.id.clone()));
        }
        self.router
            .upgrade()
            .filter(|r| !r.is_closed())
            .ok_or_else(|| EngineError::TransportClosed(self.id.clone()))
    }
}

#[async_trait]
impl EngineTransport for LoopbackTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn ice_parameters(&self) -> IceParameters {
        self.ice_parameters.clone()
    }

    fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.ice_candidates.clone()
    }

    fn dtls_parameters(&self) -> DtlsParameters {
        self.dtls_parameters.clone()
    }

    fn dtls_state(&self) -> DtlsState {
        *lock(&self.dtls_state)
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::TransportClosed(self.id.clone()));
        }
        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidParameters(
                "DTLS parameters carry no fingerprint".to_string(),
            ));
        }
        {
            let mut state = lock(&self.dtls_state);
            if *state != DtlsState::New {
                return Err(EngineError::AlreadyConnected(self.id.clone()));
            }
            *state = DtlsState::Connecting;
        }
        let _ = self
            .events
            .send(TransportEvent::DtlsStateChanged(DtlsState::Connecting));
        self.set_dtls_state(DtlsState::Connected);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn EngineProducer>, EngineError> {
        let router = self.live_router()?;
        let codec = primary_codec(&rtp_parameters).ok_or_else(|| {
            EngineError::InvalidParameters("RTP parameters carry no media codec".to_string())
        })?;
        if !router.supports(kind, codec) {
            return Err(EngineError::InvalidParameters(format!(
                "{} codec {} is not supported by the router",
                kind, codec.mime_type
            )));
        }

        let producer = LoopbackProducer::new(kind, rtp_parameters, &router, self.me.clone());
        self.producers
            .insert(producer.id.clone(), Arc::clone(&producer));
        router
            .producers
            .insert(producer.id.clone(), Arc::clone(&producer));

        debug!(transport = %self.id, producer = %producer.id, %kind, "Producer created");
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
        let router = self.live_router()?;
        let producer = router
            .producers
            .get(producer_id)
            .map(|p| Arc::clone(p.value()))
            .filter(|p| !p.is_closed())
            .ok_or_else(|| EngineError::UnknownProducer(producer_id.to_string()))?;

        let codec = primary_codec(&producer.rtp_parameters).ok_or_else(|| {
            EngineError::InvalidParameters("producer carries no media codec".to_string())
        })?;
        let capability = matching_capability(producer.kind, codec, rtp_capabilities)
            .ok_or_else(|| {
                EngineError::InvalidParameters(format!(
                    "RTP capabilities cannot receive {}",
                    codec.mime_type
                ))
            })?;

        let rtp_parameters = RtpParameters {
            mid: Some(self.consumers.len().to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: capability.mime_type.clone(),
                payload_type: capability
                    .preferred_payload_type
                    .unwrap_or(codec.payload_type),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                parameters: codec.parameters.clone(),
                rtcp_feedback: capability.rtcp_feedback.clone(),
            }],
            header_extensions: Vec::new(),
            encodings: vec![json!({ "ssrc": Uuid::new_v4().as_u128() as u32 })],
            rtcp: Some(json!({ "cname": producer.id, "reducedSize": true })),
        };

        let consumer = LoopbackConsumer::new(&producer, rtp_parameters, paused, self.me.clone());
        if !producer.attach(&consumer) {
            return Err(EngineError::UnknownProducer(producer_id.to_string()));
        }
        self.consumers
            .insert(consumer.id.clone(), Arc::clone(&consumer));

        debug!(
            transport = %self.id,
            consumer = %consumer.id,
            producer = %producer_id,
            paused,
            "Consumer created"
        );
        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let producers: Vec<_> = self
            .producers
            .iter()
            .map(|p| Arc::clone(p.value()))
            .collect();
        self.producers.clear();
        for producer in producers {
            producer.shutdown(ProducerEvent::TransportClosed);
        }

        let consumers: Vec<_> = self
            .consumers
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        self.consumers.clear();
        for consumer in consumers {
            consumer.shutdown(ConsumerEvent::TransportClosed);
        }

        lock(&self.worker.ports).release(self.port);
        if let Some(router) = self.router.upgrade() {
            router.transports.remove(&self.id);
        }
        self.worker.transports.remove(&self.id);

        debug!(transport = %self.id, "Transport closed");
        let _ = self.events.send(TransportEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// A loopback producer.
#[derive(Debug)]
pub struct LoopbackProducer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    router: Weak<LoopbackRouter>,
    transport: Weak<LoopbackTransport>,
    consumers: Mutex<Vec<Weak<LoopbackConsumer>>>,
    closed: AtomicBool,
    events: broadcast::Sender<ProducerEvent>,
}

impl LoopbackProducer {
    fn new(
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        router: &Arc<LoopbackRouter>,
        transport: Weak<LoopbackTransport>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            id: new_id(),
            kind,
            rtp_parameters,
            router: Arc::downgrade(router),
            transport,
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            events,
        })
    }

    /// Links `consumer` to this producer. A consumer racing a closed producer
    /// is shut down on the spot and `false` is returned.
    fn attach(&self, consumer: &Arc<LoopbackConsumer>) -> bool {
        let mut consumers = lock(&self.consumers);
        if self.is_closed() {
            drop(consumers);
            consumer.shutdown(ConsumerEvent::ProducerClosed);
            return false;
        }
        consumers.retain(|c| c.strong_count() > 0);
        consumers.push(Arc::downgrade(consumer));
        true
    }

    fn shutdown(&self, event: ProducerEvent) {
        // `closed` flips under the consumers lock so `attach` never links
        // onto a drained list.
        let consumers: Vec<_> = {
            let mut consumers = lock(&self.consumers);
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            consumers.drain(..).collect()
        };
        if let Some(router) = self.router.upgrade() {
            router.producers.remove(&self.id);
        }
        if let Some(transport) = self.transport.upgrade() {
            transport.producers.remove(&self.id);
        }

        for consumer in consumers.iter().filter_map(Weak::upgrade) {
            consumer.shutdown(ConsumerEvent::ProducerClosed);
        }

        debug!(producer = %self.id, ?event, "Producer closed");
        let _ = self.events.send(event);
    }
}

impl EngineProducer for LoopbackProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn close(&self) {
        self.shutdown(ProducerEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProducerEvent> {
        self.events.subscribe()
    }
}

/// A loopback consumer.
#[derive(Debug)]
pub struct LoopbackConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    transport: Weak<LoopbackTransport>,
    paused: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<ConsumerEvent>,
}

impl LoopbackConsumer {
    fn new(
        producer: &LoopbackProducer,
        rtp_parameters: RtpParameters,
        paused: bool,
        transport: Weak<LoopbackTransport>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            id: new_id(),
            producer_id: producer.id.clone(),
            kind: producer.kind,
            rtp_parameters,
            transport,
            paused: AtomicBool::new(paused),
            closed: AtomicBool::new(false),
            events,
        })
    }

    fn shutdown(&self, event: ConsumerEvent) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(transport) = self.transport.upgrade() {
            transport.consumers.remove(&self.id);
        }
        debug!(consumer = %self.id, ?event, "Consumer closed");
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl EngineConsumer for LoopbackConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::ConsumerClosed(self.id.clone()));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.shutdown(ConsumerEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.events.subscribe()
    }
}
