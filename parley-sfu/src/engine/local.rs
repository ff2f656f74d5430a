//! In-process negotiation engine
//!
//! Allocates transports, producers and consumers with realistic connection
//! parameters (ICE credentials, host candidates from the RTC port range, a
//! DTLS fingerprint of a self-signed worker certificate) and enforces the
//! engine-side object lifecycle. It does not forward RTP; a deployment that
//! needs media plugs an external SFU worker in behind [`MediaEngine`].

use super::{
    ConsumerParams, Direction, DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters,
    MediaEngine, MediaKind, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportParams,
};
use crate::error::{EngineError, EngineResult};
use crate::types::{ConsumerId, ProducerId, TransportId};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use tokio::sync::watch;
use tracing::{debug, error, info};
use webrtc::api::media_engine::MIME_TYPE_OPUS;

const OPUS_CLOCK_RATE: u32 = 48000;
const OPUS_CHANNELS: u8 = 2;
const OPUS_PAYLOAD_TYPE: u8 = 100;

const UDP_HOST_PRIORITY: u32 = 1_076_302_079;
const TCP_HOST_PRIORITY: u32 = 1_076_276_479;

/// Worker settings for [`LocalEngine`]
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    pub listen_ip: IpAddr,
    pub announced_ip: Option<IpAddr>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            announced_ip: None,
            rtc_min_port: 40000,
            rtc_max_port: 49999,
        }
    }
}

impl LocalEngineConfig {
    /// Address placed in ICE candidates: the announced one, else the listen one
    #[must_use]
    pub fn candidate_ip(&self) -> IpAddr {
        self.announced_ip.unwrap_or(self.listen_ip)
    }
}

struct LocalTransport {
    direction: Direction,
    port: u16,
    connected: bool,
}

struct LocalProducer {
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

struct LocalConsumer {
    transport_id: TransportId,
    producer_id: ProducerId,
    paused: bool,
}

#[derive(Default)]
struct WorkerState {
    transports: HashMap<TransportId, LocalTransport>,
    producers: HashMap<ProducerId, LocalProducer>,
    consumers: HashMap<ConsumerId, LocalConsumer>,
    ports_in_use: BTreeSet<u16>,
    next_port: u16,
}

impl WorkerState {
    fn allocate_port(&mut self, min: u16, max: u16) -> Option<u16> {
        let span = u32::from(max - min) + 1;
        let start = self.next_port.clamp(min, max);
        for offset in 0..span {
            let candidate = min + ((u32::from(start - min) + offset) % span) as u16;
            if self.ports_in_use.insert(candidate) {
                self.next_port = if candidate == max { min } else { candidate + 1 };
                return Some(candidate);
            }
        }
        None
    }

    fn remove_consumer(&mut self, consumer_id: &ConsumerId) -> bool {
        self.consumers.remove(consumer_id).is_some()
    }

    fn remove_producer(&mut self, producer_id: &ProducerId) -> bool {
        if self.producers.remove(producer_id).is_none() {
            return false;
        }
        self.consumers.retain(|_, c| &c.producer_id != producer_id);
        true
    }

    fn remove_transport(&mut self, transport_id: &TransportId) -> bool {
        let Some(transport) = self.transports.remove(transport_id) else {
            return false;
        };
        self.ports_in_use.remove(&transport.port);

        let producers: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|(_, p)| &p.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in &producers {
            self.remove_producer(producer_id);
        }
        self.consumers.retain(|_, c| &c.transport_id != transport_id);
        true
    }
}

/// Negotiation-only media engine running inside the server process
pub struct LocalEngine {
    config: LocalEngineConfig,
    capabilities: RtpCapabilities,
    fingerprint: DtlsFingerprint,
    state: Mutex<WorkerState>,
    died_tx: watch::Sender<bool>,
}

impl LocalEngine {
    /// Start the worker: fixed Opus router plus a fresh DTLS certificate
    pub fn new(config: LocalEngineConfig) -> EngineResult<Self> {
        if config.rtc_min_port == 0 || config.rtc_min_port > config.rtc_max_port {
            return Err(EngineError::InvalidParameters(format!(
                "invalid RTC port range {}-{}",
                config.rtc_min_port, config.rtc_max_port
            )));
        }

        let certificate =
            webrtc::dtls::crypto::Certificate::generate_self_signed(vec!["parley".to_owned()])
                .map_err(|e| EngineError::Rejected(format!("certificate generation failed: {e}")))?;
        let der = certificate
            .certificate
            .first()
            .ok_or_else(|| EngineError::Rejected("empty certificate chain".to_string()))?;
        let fingerprint = DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: format_fingerprint(&Sha256::digest(der.as_ref())),
        };

        let (died_tx, _) = watch::channel(false);
        let next_port = config.rtc_min_port;

        info!(
            rtc_min_port = config.rtc_min_port,
            rtc_max_port = config.rtc_max_port,
            listen_ip = %config.listen_ip,
            "Media worker started"
        );

        Ok(Self {
            config,
            capabilities: opus_router_capabilities(),
            fingerprint,
            state: Mutex::new(WorkerState {
                next_port,
                ..WorkerState::default()
            }),
            died_tx,
        })
    }

    /// Kill the worker; every later call fails with [`EngineError::Unavailable`]
    pub fn terminate(&self) {
        {
            let mut state = self.state.lock();
            state.transports.clear();
            state.producers.clear();
            state.consumers.clear();
            state.ports_in_use.clear();
        }
        error!("Media worker terminated");
        self.died_tx.send_replace(true);
    }

    /// Number of live transports
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.state.lock().transports.len()
    }

    /// Number of live producers
    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.state.lock().producers.len()
    }

    /// Number of live consumers
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// Number of live consumers not yet resumed
    #[must_use]
    pub fn paused_consumer_count(&self) -> usize {
        self.state.lock().consumers.values().filter(|c| c.paused).count()
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if *self.died_tx.borrow() {
            Err(EngineError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn host_candidates(&self, port: u16) -> Vec<IceCandidate> {
        let ip = self.config.candidate_ip().to_string();
        vec![
            IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: UDP_HOST_PRIORITY,
                ip: ip.clone(),
                port,
                protocol: "udp".to_string(),
                candidate_type: "host".to_string(),
                tcp_type: None,
            },
            IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: TCP_HOST_PRIORITY,
                ip,
                port,
                protocol: "tcp".to_string(),
                candidate_type: "host".to_string(),
                tcp_type: Some("passive".to_string()),
            },
        ]
    }

    /// Check that the producer's rtp parameters name a codec the router forwards
    fn validate_rtp_parameters(&self, rtp_parameters: &RtpParameters) -> EngineResult<()> {
        let codecs = rtp_parameters
            .0
            .get("codecs")
            .and_then(serde_json::Value::as_array)
            .filter(|codecs| !codecs.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidParameters("rtpParameters.codecs must be a non-empty array".to_string())
            })?;

        let supported = codecs.iter().any(|codec| {
            let mime = codec.get("mimeType").and_then(serde_json::Value::as_str);
            let rate = codec.get("clockRate").and_then(serde_json::Value::as_u64);
            mime.is_some_and(|mime| self.capabilities.supports(mime, rate))
        });

        if supported {
            Ok(())
        } else {
            Err(EngineError::InvalidParameters(
                "no codec in rtpParameters is supported by the router".to_string(),
            ))
        }
    }
}

#[async_trait]
impl MediaEngine for LocalEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn create_transport(&self, direction: Direction) -> EngineResult<TransportParams> {
        self.ensure_running()?;

        let port = self
            .state
            .lock()
            .allocate_port(self.config.rtc_min_port, self.config.rtc_max_port)
            .ok_or_else(|| EngineError::Rejected("no free RTC port".to_string()))?;

        let id = TransportId::new(uuid::Uuid::new_v4().to_string());
        let params = TransportParams {
            id: id.clone(),
            ice_parameters: IceParameters {
                username_fragment: webrtc::ice::rand::generate_ufrag(),
                password: webrtc::ice::rand::generate_pwd(),
                ice_lite: true,
            },
            ice_candidates: self.host_candidates(port),
            dtls_parameters: DtlsParameters {
                role: "auto".to_string(),
                fingerprints: vec![self.fingerprint.clone()],
            },
        };

        self.state.lock().transports.insert(
            id.clone(),
            LocalTransport {
                direction,
                port,
                connected: false,
            },
        );

        debug!(
            transport_id = %id,
            ?direction,
            port,
            "Transport created"
        );

        Ok(params)
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> EngineResult<()> {
        self.ensure_running()?;

        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidParameters(
                "dtlsParameters.fingerprints must not be empty".to_string(),
            ));
        }

        let mut state = self.state.lock();
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::UnknownObject(transport_id.to_string()))?;
        if transport.connected {
            return Err(EngineError::Rejected("transport already connected".to_string()));
        }
        transport.connected = true;

        debug!(transport_id = %transport_id, role = %dtls_parameters.role, "Transport connected");
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<ProducerId> {
        self.ensure_running()?;
        self.validate_rtp_parameters(&rtp_parameters)?;

        let mut state = self.state.lock();
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| EngineError::UnknownObject(transport_id.to_string()))?;
        if transport.direction != Direction::Send {
            return Err(EngineError::Rejected("cannot produce on a recv transport".to_string()));
        }

        let id = ProducerId::new(uuid::Uuid::new_v4().to_string());
        state.producers.insert(
            id.clone(),
            LocalProducer {
                transport_id: transport_id.clone(),
                kind,
                rtp_parameters,
            },
        );

        debug!(producer_id = %id, transport_id = %transport_id, ?kind, "Producer created");
        Ok(id)
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> EngineResult<ConsumerParams> {
        self.ensure_running()?;

        let mut state = self.state.lock();
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| EngineError::UnknownObject(transport_id.to_string()))?;
        if transport.direction != Direction::Recv {
            return Err(EngineError::Rejected("cannot consume on a send transport".to_string()));
        }
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::UnknownObject(producer_id.to_string()))?;

        // Keep only the codecs the consuming side can decode
        let mut rtp_parameters = producer.rtp_parameters.0.clone();
        if let Some(codecs) = rtp_parameters
            .get_mut("codecs")
            .and_then(serde_json::Value::as_array_mut)
        {
            codecs.retain(|codec| {
                let mime = codec.get("mimeType").and_then(serde_json::Value::as_str);
                let rate = codec.get("clockRate").and_then(serde_json::Value::as_u64);
                mime.is_some_and(|mime| rtp_capabilities.supports(mime, rate))
            });
            if codecs.is_empty() {
                return Err(EngineError::Rejected("cannot consume: no common codec".to_string()));
            }
        }

        let kind = producer.kind;
        let id = ConsumerId::new(uuid::Uuid::new_v4().to_string());
        state.consumers.insert(
            id.clone(),
            LocalConsumer {
                transport_id: transport_id.clone(),
                producer_id: producer_id.clone(),
                paused,
            },
        );

        debug!(consumer_id = %id, producer_id = %producer_id, paused, "Consumer created");
        Ok(ConsumerParams {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters: RtpParameters(rtp_parameters),
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> EngineResult<()> {
        self.ensure_running()?;

        let mut state = self.state.lock();
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::UnknownObject(consumer_id.to_string()))?;
        consumer.paused = false;
        Ok(())
    }

    async fn close_transport(&self, transport_id: &TransportId) {
        if self.state.lock().remove_transport(transport_id) {
            debug!(transport_id = %transport_id, "Transport closed");
        }
    }

    async fn close_producer(&self, producer_id: &ProducerId) {
        if self.state.lock().remove_producer(producer_id) {
            debug!(producer_id = %producer_id, "Producer closed");
        }
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) {
        if self.state.lock().remove_consumer(consumer_id) {
            debug!(consumer_id = %consumer_id, "Consumer closed");
        }
    }

    fn died(&self) -> watch::Receiver<bool> {
        self.died_tx.subscribe()
    }
}

/// Router codec set: Opus, 48 kHz, stereo
fn opus_router_capabilities() -> RtpCapabilities {
    let mut parameters = serde_json::Map::new();
    parameters.insert("useinbandfec".to_string(), serde_json::json!(1));

    RtpCapabilities {
        codecs: vec![RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: MIME_TYPE_OPUS.to_string(),
            preferred_payload_type: OPUS_PAYLOAD_TYPE,
            clock_rate: OPUS_CLOCK_RATE,
            channels: Some(OPUS_CHANNELS),
            parameters,
            rtcp_feedback: vec![serde_json::json!({"type": "transport-cc"})],
        }],
        header_extensions: Vec::new(),
    }
}

fn format_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(":")
}
