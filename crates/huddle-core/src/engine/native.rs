//! mediasoup-backed media engine.
//!
//! Each adapter owns the mediasoup handle of its resource. mediasoup closes a
//! resource when its last handle drops, so `close` takes the handle out and
//! drops it. Worker notifications (`on_close`, `on_transport_close`,
//! `on_producer_close`, DTLS state changes) are forwarded to the adapters'
//! broadcast channels.

use super::{
    lock, ConsumerEvent, DtlsState, EngineConsumer, EngineError, EngineProducer, EngineRouter,
    EngineTransport, MediaEngine, ProducerEvent, TransportEvent, WebRtcTransportOptions,
    EVENT_CAPACITY,
};
use async_trait::async_trait;
use huddle_protocol::{
    DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpParameters,
};
use mediasoup::data_structures::DtlsState as WorkerDtlsState;
use mediasoup::prelude as ms;
use mediasoup::prelude::Transport as _;
use mediasoup::worker_manager::WorkerManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct MediasoupConfig {
    /// Lowest port the worker binds transports to.
    pub rtc_min_port: u16,
    /// Highest port the worker binds transports to.
    pub rtc_max_port: u16,
}

impl Default for MediasoupConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: 2000,
            rtc_max_port: 4000,
        }
    }
}

fn invalid(e: impl fmt::Display) -> EngineError {
    EngineError::InvalidParameters(e.to_string())
}

fn request_failed(e: impl fmt::Display) -> EngineError {
    EngineError::Request(e.to_string())
}

/// Fill the members mediasoup requires but clients may leave out, and drop nulls.
fn normalize(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(normalize),
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            if map.contains_key("mimeType") {
                map.entry("parameters").or_insert_with(|| json!({}));
                map.entry("rtcpFeedback").or_insert_with(|| json!([]));
            }
            if map.contains_key("fingerprints") {
                map.entry("role").or_insert_with(|| json!("auto"));
            }
            if let Some(Value::Array(feedback)) = map.get_mut("rtcpFeedback") {
                for entry in feedback.iter_mut().filter_map(Value::as_object_mut) {
                    entry.entry("parameter").or_insert_with(|| json!(""));
                }
            }
            map.values_mut().for_each(normalize);
        }
        _ => {}
    }
}

/// Convert between wire types and mediasoup types through their shared JSON shape.
fn convert<T, U>(value: &T) -> Result<U, EngineError>
where
    T: Serialize + ?Sized,
    U: DeserializeOwned,
{
    let mut json = serde_json::to_value(value).map_err(invalid)?;
    normalize(&mut json);
    serde_json::from_value(json).map_err(invalid)
}

fn to_mediasoup_kind(kind: MediaKind) -> ms::MediaKind {
    match kind {
        MediaKind::Audio => ms::MediaKind::Audio,
        MediaKind::Video => ms::MediaKind::Video,
    }
}

fn from_mediasoup_kind(kind: ms::MediaKind) -> MediaKind {
    match kind {
        ms::MediaKind::Audio => MediaKind::Audio,
        ms::MediaKind::Video => MediaKind::Video,
    }
}

fn from_mediasoup_dtls(state: WorkerDtlsState) -> DtlsState {
    match state {
        WorkerDtlsState::New => DtlsState::New,
        WorkerDtlsState::Connecting => DtlsState::Connecting,
        WorkerDtlsState::Connected => DtlsState::Connected,
        WorkerDtlsState::Failed => DtlsState::Failed,
        WorkerDtlsState::Closed => DtlsState::Closed,
    }
}

/// One listen info per address and enabled protocol, preferred protocol first.
fn listen_infos(options: &WebRtcTransportOptions) -> Result<Vec<ms::ListenInfo>, EngineError> {
    // `true` for UDP.
    let mut protocols = Vec::with_capacity(2);
    if options.enable_udp {
        protocols.push(true);
    }
    if options.enable_tcp {
        if options.prefer_udp {
            protocols.push(false);
        } else {
            protocols.insert(0, false);
        }
    }
    if protocols.is_empty() {
        return Err(invalid("both UDP and TCP are disabled"));
    }

    let mut infos = Vec::new();
    for listen in &options.listen_ips {
        let ip: IpAddr = listen
            .ip
            .parse()
            .map_err(|e| invalid(format!("listen IP {}: {}", listen.ip, e)))?;
        for &udp in &protocols {
            infos.push(ms::ListenInfo {
                protocol: if udp {
                    ms::Protocol::Udp
                } else {
                    ms::Protocol::Tcp
                },
                ip,
                announced_address: listen.announced_ip.clone(),
                port: None,
                port_range: None,
                flags: None,
                send_buffer_size: None,
                recv_buffer_size: None,
            });
        }
    }
    Ok(infos)
}

fn transport_options(
    options: &WebRtcTransportOptions,
) -> Result<ms::WebRtcTransportOptions, EngineError> {
    let mut infos = listen_infos(options)?.into_iter();
    let first = infos
        .next()
        .ok_or_else(|| invalid("no listen IPs configured"))?;
    let listen_infos = infos.fold(ms::WebRtcTransportListenInfos::new(first), |all, info| {
        all.insert(info)
    });
    Ok(ms::WebRtcTransportOptions::new(listen_infos))
}

/// A mediasoup worker.
pub struct MediasoupEngine {
    worker_id: String,
    worker: ms::Worker,
    // Keeps the worker thread alive.
    _manager: WorkerManager,
    closed: Arc<AtomicBool>,
    died: Arc<watch::Sender<Option<String>>>,
}

impl fmt::Debug for MediasoupEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediasoupEngine")
            .field("worker_id", &self.worker_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MediasoupEngine {
    /// Spawn a mediasoup worker.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::WorkerStart`] if the worker cannot be spawned.
    pub async fn new(config: MediasoupConfig) -> Result<Self, EngineError> {
        let manager = WorkerManager::new();
        let mut settings = ms::WorkerSettings::default();
        settings.rtc_port_range = config.rtc_min_port..=config.rtc_max_port;

        let worker = manager
            .create_worker(settings)
            .await
            .map_err(|e| EngineError::WorkerStart(e.to_string()))?;
        let worker_id = worker.id().to_string();

        let closed = Arc::new(AtomicBool::new(false));
        let (died, _) = watch::channel(None);
        let died = Arc::new(died);

        worker
            .on_dead({
                let worker_id = worker_id.clone();
                let closed = Arc::clone(&closed);
                let died = Arc::clone(&died);
                move |reason| {
                    closed.store(true, Ordering::SeqCst);
                    let reason = format!("{:?}", reason);
                    error!(worker = %worker_id, reason = %reason, "Media worker died");
                    died.send_replace(Some(reason));
                }
            })
            .detach();

        info!(
            worker = %worker_id,
            min_port = config.rtc_min_port,
            max_port = config.rtc_max_port,
            "mediasoup worker started"
        );
        Ok(Self {
            worker_id,
            worker,
            _manager: manager,
            closed,
            died,
        })
    }
}

#[async_trait]
impl MediaEngine for MediasoupEngine {
    fn worker_id(&self) -> String {
        self.worker_id.clone()
    }

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn EngineRouter>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::WorkerClosed);
        }
        let codecs: Vec<ms::RtpCodecCapability> = convert(media_codecs)?;
        let router = self
            .worker
            .create_router(ms::RouterOptions::new(codecs))
            .await
            .map_err(request_failed)?;
        let router = MediasoupRouter::new(router)?;
        debug!(router = %router.id, codecs = media_codecs.len(), "Router created");
        Ok(router)
    }

    async fn died(&self) -> String {
        let mut rx = self.died.subscribe();
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

/// A router on a mediasoup worker.
pub struct MediasoupRouter {
    id: String,
    router: Mutex<Option<ms::Router>>,
    capabilities: RtpCapabilities,
    transports: Mutex<Vec<Weak<MediasoupTransport>>>,
    closed: AtomicBool,
}

impl fmt::Debug for MediasoupRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediasoupRouter")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MediasoupRouter {
    fn new(router: ms::Router) -> Result<Arc<Self>, EngineError> {
        let capabilities = convert(router.rtp_capabilities())?;
        let adapter = Arc::new(Self {
            id: router.id().to_string(),
            router: Mutex::new(Some(router.clone())),
            capabilities,
            transports: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        router
            .on_worker_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown();
                    }
                }
            }))
            .detach();
        Ok(adapter)
    }

    fn handle(&self) -> Result<ms::Router, EngineError> {
        lock(&self.router)
            .clone()
            .ok_or_else(|| EngineError::RouterClosed(self.id.clone()))
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<_> = lock(&self.transports).drain(..).collect();
        for transport in transports.iter().filter_map(Weak::upgrade) {
            transport.shutdown(TransportEvent::Closed);
        }
        let router = lock(&self.router).take();
        drop(router);
        debug!(router = %self.id, "Router closed");
    }
}

#[async_trait]
impl EngineRouter for MediasoupRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let Ok(router) = self.handle() else {
            return false;
        };
        let Ok(producer_id) = producer_id.parse::<ms::ProducerId>() else {
            return false;
        };
        match convert::<_, ms::RtpCapabilities>(rtp_capabilities) {
            Ok(caps) => router.can_consume(&producer_id, &caps),
            Err(e) => {
                trace!(router = %self.id, error = %e, "Unusable RTP capabilities");
                false
            }
        }
    }

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Arc<dyn EngineTransport>, EngineError> {
        let router = self.handle()?;
        let transport = router
            .create_webrtc_transport(transport_options(options)?)
            .await
            .map_err(request_failed)?;
        let transport = MediasoupTransport::new(transport)?;

        {
            let mut transports = lock(&self.transports);
            transports.retain(|t| t.strong_count() > 0);
            transports.push(Arc::downgrade(&transport));
        }
        if self.closed.load(Ordering::SeqCst) {
            transport.shutdown(TransportEvent::Closed);
            return Err(EngineError::RouterClosed(self.id.clone()));
        }

        debug!(router = %self.id, transport = %transport.id, "WebRTC transport created");
        Ok(transport)
    }

    fn close(&self) {
        self.shutdown();
    }
}

/// A WebRTC transport on a mediasoup router.
pub struct MediasoupTransport {
    id: String,
    transport: Mutex<Option<ms::WebRtcTransport>>,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    dtls_parameters: DtlsParameters,
    dtls_state: Mutex<DtlsState>,
    connected: AtomicBool,
    producers: Mutex<Vec<Weak<MediasoupProducer>>>,
    consumers: Mutex<Vec<Weak<MediasoupConsumer>>>,
    closed: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl fmt::Debug for MediasoupTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediasoupTransport")
            .field("id", &self.id)
            .field("dtls_state", &self.dtls_state)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MediasoupTransport {
    fn new(transport: ms::WebRtcTransport) -> Result<Arc<Self>, EngineError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let adapter = Arc::new(Self {
            id: transport.id().to_string(),
            ice_parameters: convert(transport.ice_parameters())?,
            ice_candidates: convert(transport.ice_candidates())?,
            dtls_parameters: convert(&transport.dtls_parameters())?,
            transport: Mutex::new(Some(transport.clone())),
            dtls_state: Mutex::new(DtlsState::New),
            connected: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            events,
        });

        transport
            .on_dtls_state_change({
                let me = Arc::downgrade(&adapter);
                move |state| {
                    if let Some(me) = me.upgrade() {
                        me.set_dtls_state(from_mediasoup_dtls(state));
                    }
                }
            })
            .detach();
        transport
            .on_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown(TransportEvent::Closed);
                    }
                }
            }))
            .detach();
        Ok(adapter)
    }

    fn handle(&self) -> Result<ms::WebRtcTransport, EngineError> {
        lock(&self.transport)
            .clone()
            .ok_or_else(|| EngineError::TransportClosed(self.id.clone()))
    }

    fn set_dtls_state(&self, state: DtlsState) {
        *lock(&self.dtls_state) = state;
        trace!(transport = %self.id, ?state, "DTLS state changed");
        let _ = self.events.send(TransportEvent::DtlsStateChanged(state));
    }

    fn shutdown(&self, event: TransportEvent) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let producers: Vec<_> = lock(&self.producers).drain(..).collect();
        for producer in producers.iter().filter_map(Weak::upgrade) {
            producer.shutdown(ProducerEvent::TransportClosed);
        }
        let consumers: Vec<_> = lock(&self.consumers).drain(..).collect();
        for consumer in consumers.iter().filter_map(Weak::upgrade) {
            consumer.shutdown(ConsumerEvent::TransportClosed);
        }

        let transport = lock(&self.transport).take();
        drop(transport);
        debug!(transport = %self.id, "Transport closed");
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl EngineTransport for MediasoupTransport {
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
        let transport = self.handle()?;
        let dtls_parameters: ms::DtlsParameters = convert(&dtls_parameters)?;
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyConnected(self.id.clone()));
        }
        if let Err(e) = transport
            .connect(ms::WebRtcTransportRemoteParameters { dtls_parameters })
            .await
        {
            self.connected.store(false, Ordering::SeqCst);
            return Err(request_failed(e));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn EngineProducer>, EngineError> {
        let transport = self.handle()?;
        let options = ms::ProducerOptions::new(to_mediasoup_kind(kind), convert(&rtp_parameters)?);
        let producer = transport.produce(options).await.map_err(invalid)?;
        let producer = MediasoupProducer::new(producer)?;

        {
            let mut producers = lock(&self.producers);
            producers.retain(|p| p.strong_count() > 0);
            producers.push(Arc::downgrade(&producer));
        }
        if self.is_closed() {
            producer.shutdown(ProducerEvent::TransportClosed);
            return Err(EngineError::TransportClosed(self.id.clone()));
        }

        debug!(transport = %self.id, producer = %producer.id, %kind, "Producer created");
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
        let transport = self.handle()?;
        let remote_producer = producer_id
            .parse::<ms::ProducerId>()
            .map_err(|_| EngineError::UnknownProducer(producer_id.to_string()))?;
        let mut options = ms::ConsumerOptions::new(remote_producer, convert(rtp_capabilities)?);
        options.paused = paused;

        let consumer = transport.consume(options).await.map_err(invalid)?;
        let consumer = MediasoupConsumer::new(consumer)?;

        {
            let mut consumers = lock(&self.consumers);
            consumers.retain(|c| c.strong_count() > 0);
            consumers.push(Arc::downgrade(&consumer));
        }
        if self.is_closed() {
            consumer.shutdown(ConsumerEvent::TransportClosed);
            return Err(EngineError::TransportClosed(self.id.clone()));
        }

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
        self.shutdown(TransportEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// A producer on a mediasoup transport.
pub struct MediasoupProducer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    producer: Mutex<Option<ms::Producer>>,
    closed: AtomicBool,
    events: broadcast::Sender<ProducerEvent>,
}

impl fmt::Debug for MediasoupProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediasoupProducer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MediasoupProducer {
    fn new(producer: ms::Producer) -> Result<Arc<Self>, EngineError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let adapter = Arc::new(Self {
            id: producer.id().to_string(),
            kind: from_mediasoup_kind(producer.kind()),
            rtp_parameters: convert(producer.rtp_parameters())?,
            producer: Mutex::new(Some(producer.clone())),
            closed: AtomicBool::new(false),
            events,
        });

        producer
            .on_transport_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown(ProducerEvent::TransportClosed);
                    }
                }
            }))
            .detach();
        producer
            .on_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown(ProducerEvent::Closed);
                    }
                }
            }))
            .detach();
        Ok(adapter)
    }

    fn shutdown(&self, event: ProducerEvent) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let producer = lock(&self.producer).take();
        drop(producer);
        debug!(producer = %self.id, ?event, "Producer closed");
        let _ = self.events.send(event);
    }
}

impl EngineProducer for MediasoupProducer {
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

/// A consumer on a mediasoup transport.
pub struct MediasoupConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    consumer: Mutex<Option<ms::Consumer>>,
    paused: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<ConsumerEvent>,
}

impl fmt::Debug for MediasoupConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediasoupConsumer")
            .field("id", &self.id)
            .field("producer_id", &self.producer_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MediasoupConsumer {
    fn new(consumer: ms::Consumer) -> Result<Arc<Self>, EngineError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let adapter = Arc::new(Self {
            id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: from_mediasoup_kind(consumer.kind()),
            rtp_parameters: convert(consumer.rtp_parameters())?,
            paused: AtomicBool::new(consumer.paused()),
            consumer: Mutex::new(Some(consumer.clone())),
            closed: AtomicBool::new(false),
            events,
        });

        consumer
            .on_producer_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown(ConsumerEvent::ProducerClosed);
                    }
                }
            }))
            .detach();
        consumer
            .on_transport_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown(ConsumerEvent::TransportClosed);
                    }
                }
            }))
            .detach();
        consumer
            .on_close(Box::new({
                let me = Arc::downgrade(&adapter);
                move || {
                    if let Some(me) = me.upgrade() {
                        me.shutdown(ConsumerEvent::Closed);
                    }
                }
            }))
            .detach();
        Ok(adapter)
    }

    fn shutdown(&self, event: ConsumerEvent) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let consumer = lock(&self.consumer).take();
        drop(consumer);
        debug!(consumer = %self.id, ?event, "Consumer closed");
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl EngineConsumer for MediasoupConsumer {
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
        let consumer = lock(&self.consumer)
            .clone()
            .ok_or_else(|| EngineError::ConsumerClosed(self.id.clone()))?;
        consumer.resume().await.map_err(request_failed)?;
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
