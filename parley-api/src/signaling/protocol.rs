//! Signaling wire format
//!
//! Client frames are `{"id"?, "method", "data"?}`; replies are
//! `{"id", "result"}` and pushes are `{"event", "data"}`. Payloads are checked
//! here and turned into typed [`Request`]s before anything is dispatched.

use parley_sfu::{
    ConsumerId, ConsumerParams, Direction, DtlsParameters, MediaKind, Notification,
    ParticipantInfo, ProducerId, RtpCapabilities, RtpParameters, SfuError, TransportId,
    TransportParams,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw client frame
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    /// Correlation id; absent for fire-and-forget methods
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

/// Validated client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetCapabilities,
    JoinRoom {
        room_id: String,
    },
    CreateTransport {
        direction: Option<Direction>,
    },
    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    Consume {
        transport_id: TransportId,
        producer_id: ProducerId,
    },
    ResumeConsumer {
        consumer_id: ConsumerId,
    },
    CloseProducer {
        producer_id: ProducerId,
    },
    ToggleMute {
        muted: bool,
    },
    SpeakingChange {
        speaking: bool,
    },
    LeaveRoom {
        room_id: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinRoomPayload {
    Object {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Bare(String),
}

#[derive(Deserialize)]
struct CreateTransportPayload {
    #[serde(default)]
    direction: Option<Direction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTransportPayload {
    transport_id: TransportId,
    dtls_parameters: DtlsParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProducePayload {
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumePayload {
    transport_id: TransportId,
    producer_id: ProducerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeConsumerPayload {
    consumer_id: ConsumerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseProducerPayload {
    producer_id: ProducerId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MutePayload {
    Bare(bool),
    Object { muted: bool },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpeakingPayload {
    Bare(bool),
    Object { speaking: bool },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LeaveRoomPayload {
    Object {
        #[serde(rename = "roomId")]
        room_id: Option<String>,
    },
    Bare(String),
}

fn payload<T: DeserializeOwned>(method: &str, data: Value) -> Result<T, SfuError> {
    serde_json::from_value(data)
        .map_err(|e| SfuError::Validation(format!("invalid {method} payload: {e}")))
}

impl Request {
    /// Check a method name and its payload
    pub fn parse(method: &str, data: Value) -> Result<Self, SfuError> {
        let request = match method {
            "get-capabilities" | "get-rtp-capabilities" => Self::GetCapabilities,
            "join-room" => {
                let room_id = match payload::<JoinRoomPayload>(method, data)? {
                    JoinRoomPayload::Object { room_id } | JoinRoomPayload::Bare(room_id) => room_id,
                };
                Self::JoinRoom { room_id }
            }
            "create-transport" => {
                let direction = payload::<Option<CreateTransportPayload>>(method, data)?
                    .and_then(|p| p.direction);
                Self::CreateTransport { direction }
            }
            "connect-transport" => {
                let p: ConnectTransportPayload = payload(method, data)?;
                Self::ConnectTransport {
                    transport_id: p.transport_id,
                    dtls_parameters: p.dtls_parameters,
                }
            }
            "produce" => {
                let p: ProducePayload = payload(method, data)?;
                Self::Produce {
                    transport_id: p.transport_id,
                    kind: p.kind,
                    rtp_parameters: p.rtp_parameters,
                }
            }
            "consume" => {
                let p: ConsumePayload = payload(method, data)?;
                Self::Consume {
                    transport_id: p.transport_id,
                    producer_id: p.producer_id,
                }
            }
            "resume-consumer" => {
                let p: ResumeConsumerPayload = payload(method, data)?;
                Self::ResumeConsumer {
                    consumer_id: p.consumer_id,
                }
            }
            "close-producer" => {
                let p: CloseProducerPayload = payload(method, data)?;
                Self::CloseProducer {
                    producer_id: p.producer_id,
                }
            }
            "toggle-mute" => {
                let muted = match payload::<MutePayload>(method, data)? {
                    MutePayload::Bare(muted) | MutePayload::Object { muted } => muted,
                };
                Self::ToggleMute { muted }
            }
            "speaking-change" => {
                let speaking = match payload::<SpeakingPayload>(method, data)? {
                    SpeakingPayload::Bare(speaking) | SpeakingPayload::Object { speaking } => {
                        speaking
                    }
                };
                Self::SpeakingChange { speaking }
            }
            "leave-room" => {
                let room_id = match payload::<Option<LeaveRoomPayload>>(method, data)? {
                    Some(LeaveRoomPayload::Object { room_id }) => room_id,
                    Some(LeaveRoomPayload::Bare(room_id)) => Some(room_id),
                    None => None,
                };
                Self::LeaveRoom { room_id }
            }
            other => {
                return Err(SfuError::Validation(format!("unknown method: {other}")));
            }
        };
        Ok(request)
    }

    /// Wire name of the method
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetCapabilities => "get-capabilities",
            Self::JoinRoom { .. } => "join-room",
            Self::CreateTransport { .. } => "create-transport",
            Self::ConnectTransport { .. } => "connect-transport",
            Self::Produce { .. } => "produce",
            Self::Consume { .. } => "consume",
            Self::ResumeConsumer { .. } => "resume-consumer",
            Self::CloseProducer { .. } => "close-producer",
            Self::ToggleMute { .. } => "toggle-mute",
            Self::SpeakingChange { .. } => "speaking-change",
            Self::LeaveRoom { .. } => "leave-room",
        }
    }

    /// Methods that only broadcast and never answer
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::ToggleMute { .. } | Self::SpeakingChange { .. } | Self::LeaveRoom { .. }
        )
    }

    /// Methods that wait on the media engine and run in their own task
    #[must_use]
    pub const fn calls_engine(&self) -> bool {
        matches!(
            self,
            Self::CreateTransport { .. }
                | Self::ConnectTransport { .. }
                | Self::Produce { .. }
                | Self::Consume { .. }
                | Self::ResumeConsumer { .. }
                | Self::CloseProducer { .. }
        )
    }
}

/// Result object of one reply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Capabilities(RtpCapabilities),
    Joined {
        success: bool,
        participants: Vec<ParticipantInfo>,
    },
    Transport {
        success: bool,
        params: TransportParams,
    },
    Produced {
        success: bool,
        #[serde(rename = "producerId")]
        producer_id: ProducerId,
    },
    Consumed {
        success: bool,
        params: ConsumerParams,
    },
    Ack {
        success: bool,
    },
    Failure {
        success: bool,
        error: String,
        code: &'static str,
    },
}

impl ReplyBody {
    #[must_use]
    pub const fn ack() -> Self {
        Self::Ack { success: true }
    }

    #[must_use]
    pub fn failure(err: &SfuError) -> Self {
        Self::Failure {
            success: false,
            error: err.to_string(),
            code: err.code(),
        }
    }
}

/// Frame written to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Reply { id: u64, result: ReplyBody },
    Event(Notification),
}

/// Outcome of decoding one text frame
#[derive(Debug)]
pub enum Decoded {
    Request { id: Option<u64>, request: Request },
    /// Malformed frame whose correlation id could still be read
    Rejected { id: u64, error: SfuError },
    /// Malformed frame without a usable id
    Dropped(SfuError),
}

/// Decode one text frame
#[must_use]
pub fn decode(text: &str) -> Decoded {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => match Request::parse(&frame.method, frame.data) {
            Ok(request) => Decoded::Request {
                id: frame.id,
                request,
            },
            Err(error) => match frame.id {
                Some(id) => Decoded::Rejected { id, error },
                None => Decoded::Dropped(error),
            },
        },
        Err(e) => {
            let error = SfuError::Validation(format!("malformed frame: {e}"));
            let id = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_u64));
            match id {
                Some(id) => Decoded::Rejected { id, error },
                None => Decoded::Dropped(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(method: &str, data: Value) -> Request {
        Request::parse(method, data).unwrap()
    }

    #[test]
    fn test_join_room_accepts_object_or_bare_string() {
        assert_eq!(
            parse("join-room", json!({"roomId": "lobby"})),
            Request::JoinRoom {
                room_id: "lobby".to_string()
            }
        );
        assert_eq!(
            parse("join-room", json!("lobby")),
            Request::JoinRoom {
                room_id: "lobby".to_string()
            }
        );
        assert!(Request::parse("join-room", Value::Null).is_err());
    }

    #[test]
    fn test_create_transport_direction_is_optional() {
        assert_eq!(
            parse("create-transport", Value::Null),
            Request::CreateTransport { direction: None }
        );
        assert_eq!(
            parse("create-transport", json!({"direction": "recv"})),
            Request::CreateTransport {
                direction: Some(Direction::Recv)
            }
        );
        assert!(Request::parse("create-transport", json!({"direction": "sideways"})).is_err());
    }

    #[test]
    fn test_flags_accept_bare_or_object() {
        assert_eq!(parse("toggle-mute", json!(true)), Request::ToggleMute { muted: true });
        assert_eq!(
            parse("toggle-mute", json!({"muted": false})),
            Request::ToggleMute { muted: false }
        );
        assert_eq!(
            parse("speaking-change", json!({"speaking": true})),
            Request::SpeakingChange { speaking: true }
        );
        assert!(Request::parse("toggle-mute", json!("yes")).is_err());
    }

    #[test]
    fn test_legacy_capabilities_name() {
        assert_eq!(parse("get-rtp-capabilities", Value::Null), Request::GetCapabilities);
    }

    #[test]
    fn test_produce_payload_is_checked() {
        let err = Request::parse("produce", json!({"transportId": "t"})).unwrap_err();
        assert_eq!(err.code(), "ValidationFailure");

        let ok = parse(
            "produce",
            json!({"transportId": "t", "kind": "audio", "rtpParameters": {"codecs": []}}),
        );
        assert!(matches!(ok, Request::Produce { kind: MediaKind::Audio, .. }));
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let err = Request::parse("reboot", Value::Null).unwrap_err();
        assert!(matches!(err, SfuError::Validation(_)));
    }

    #[test]
    fn test_decode_keeps_id_of_bad_frames() {
        assert!(matches!(
            decode(r#"{"id": 7, "method": "consume", "data": {}}"#),
            Decoded::Rejected { id: 7, .. }
        ));
        assert!(matches!(decode(r#"{"id": 9}"#), Decoded::Rejected { id: 9, .. }));
        assert!(matches!(decode("not json"), Decoded::Dropped(_)));
        assert!(matches!(
            decode(r#"{"method": "toggle-mute", "data": true}"#),
            Decoded::Request { id: None, request: Request::ToggleMute { muted: true } }
        ));
    }

    #[test]
    fn test_reply_wire_shapes() {
        let frame = ServerFrame::Reply {
            id: 3,
            result: ReplyBody::Produced {
                success: true,
                producer_id: ProducerId::from("p1"),
            },
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"id": 3, "result": {"success": true, "producerId": "p1"}})
        );

        let failure = ReplyBody::failure(&SfuError::NotFound("room lobby not found".to_string()));
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"success": false, "error": "Not found: room lobby not found", "code": "NotFound"})
        );

        let push = ServerFrame::Event(Notification::ParticipantLeft {
            participant_id: parley_sfu::SessionId::from("a"),
        });
        assert_eq!(
            serde_json::to_value(&push).unwrap(),
            json!({"event": "participant-left", "data": {"participantId": "a"}})
        );
    }
}
