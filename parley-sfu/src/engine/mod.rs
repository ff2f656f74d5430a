//! Media engine adapter
//!
//! The engine owns the actual RTP forwarding and ICE/DTLS negotiation. The
//! control plane only talks to it through [`MediaEngine`], addressing every
//! engine object by id. Parameter blobs are passed through verbatim.

mod local;

pub use local::{LocalEngine, LocalEngineConfig};

use crate::error::EngineResult;
use crate::types::{ConsumerId, ProducerId, TransportId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Transport role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    #[serde(alias = "receive")]
    Recv,
}

/// Media kind of a producer/consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// One codec the router can forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub preferred_payload_type: u8,
    pub clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<serde_json::Value>,
}

/// Capability descriptor handed to clients by `get-capabilities`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<serde_json::Value>,
}

impl RtpCapabilities {
    /// Whether a codec with this mime type and clock rate is supported
    #[must_use]
    pub fn supports(&self, mime_type: &str, clock_rate: Option<u64>) -> bool {
        self.codecs.iter().any(|codec| {
            codec.mime_type.eq_ignore_ascii_case(mime_type)
                && clock_rate.map_or(true, |rate| rate == u64::from(codec.clock_rate))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default = "default_dtls_role")]
    pub role: String,
    pub fingerprints: Vec<DtlsFingerprint>,
}

fn default_dtls_role() -> String {
    "auto".to_string()
}

/// Connection parameters of a freshly created transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// RTP parameters, opaque to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

/// Parameters the receiving client needs to instantiate a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Boundary to the selective-forwarding media engine
///
/// Close operations are idempotent and infallible: closing an unknown or
/// already closed object is a no-op.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Capabilities of the router (fixed codec set)
    fn rtp_capabilities(&self) -> RtpCapabilities;

    async fn create_transport(&self, direction: Direction) -> EngineResult<TransportParams>;

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> EngineResult<()>;

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<ProducerId>;

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> EngineResult<ConsumerParams>;

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> EngineResult<()>;

    async fn close_transport(&self, transport_id: &TransportId);

    async fn close_producer(&self, producer_id: &ProducerId);

    async fn close_consumer(&self, consumer_id: &ConsumerId);

    /// Flips to `true` once the engine worker has died
    fn died(&self) -> watch::Receiver<bool>;
}
