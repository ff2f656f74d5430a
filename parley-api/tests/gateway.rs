//! Signaling gateway driven through its text-frame entry point

use async_trait::async_trait;
use parley_api::signaling::{Connection, ReplyBody, Request, ServerFrame};
use parley_sfu::{
    ConsumerId, ConsumerParams, Direction, DtlsParameters, EngineResult, LocalEngine,
    LocalEngineConfig, MediaEngine, MediaKind, NotificationReceiver, Notifier, ProducerId,
    RoomRegistry, RtpCapabilities, RtpParameters, SessionId, SfuConfig, TransportId,
    TransportParams,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;

struct Client {
    connection: Arc<Connection>,
    replies: mpsc::Receiver<ServerFrame>,
    events: NotificationReceiver,
}

impl Client {
    fn connect(registry: &Arc<RoomRegistry>, id: &str) -> Self {
        let (notifier, events) = Notifier::channel(64);
        let (reply_tx, replies) = mpsc::channel(64);
        let connection = Connection::new(
            Arc::clone(registry),
            SessionId::from(id),
            id.to_string(),
            notifier,
            reply_tx,
        );
        Self {
            connection,
            replies,
            events,
        }
    }

    /// Send a frame and wait for the reply with the given id
    async fn call(&mut self, id: u64, method: &str, data: Value) -> Value {
        let frame = json!({"id": id, "method": method, "data": data}).to_string();
        self.connection.handle_text(&frame).await;
        self.reply().await
    }

    async fn reply(&mut self) -> Value {
        let frame = timeout(Duration::from_secs(5), self.replies.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::to_value(&frame).unwrap()
    }

    async fn notify(&mut self, method: &str, data: Value) {
        let frame = json!({"method": method, "data": data}).to_string();
        self.connection.handle_text(&frame).await;
    }

    fn events(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(n) = self.events.try_recv() {
            out.push(serde_json::to_value(&n).unwrap());
        }
        out
    }
}

fn registry() -> Arc<RoomRegistry> {
    let engine = LocalEngine::new(LocalEngineConfig::default()).unwrap();
    Arc::new(RoomRegistry::new(SfuConfig::default(), Arc::new(engine)))
}

#[tokio::test]
async fn join_returns_snapshot_and_notifies_members() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");
    let mut b = Client::connect(&registry, "bob");

    let reply = a.call(1, "join-room", json!({"roomId": "lobby"})).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["success"], true);
    assert_eq!(reply["result"]["participants"][0]["id"], "alice");

    // Bare room id, as older clients send it
    let reply = b.call(2, "join-room", json!("lobby")).await;
    let ids: Vec<&str> = reply["result"]["participants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["alice", "bob"]);

    assert_eq!(
        a.events(),
        vec![json!({"event": "participant-joined", "data": {"participantId": "bob", "displayName": "bob"}})]
    );
    assert_eq!(b.connection.room_id().unwrap().as_str(), "lobby");
}

#[tokio::test]
async fn second_join_is_a_validation_failure() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");

    a.call(1, "join-room", json!({"roomId": "lobby"})).await;
    let reply = a.call(2, "join-room", json!({"roomId": "other"})).await;
    assert_eq!(reply["result"]["success"], false);
    assert_eq!(reply["result"]["code"], "ValidationFailure");
    assert_eq!(registry.room_count(), 1);
}

#[tokio::test]
async fn requests_outside_a_room_are_not_found() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");

    let reply = a.call(1, "create-transport", Value::Null).await;
    assert_eq!(reply["result"]["code"], "NotFound");

    let reply = a
        .call(2, "consume", json!({"transportId": "t", "producerId": "p"}))
        .await;
    assert_eq!(reply["result"]["code"], "NotFound");
}

#[tokio::test]
async fn malformed_frames() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");

    // Readable id: structured failure
    a.connection.handle_text(r#"{"id": 4, "method": "produce"}"#).await;
    let reply = a.reply().await;
    assert_eq!(reply["id"], 4);
    assert_eq!(reply["result"]["code"], "ValidationFailure");

    a.connection.handle_text(r#"{"id": 5, "method": "no-such-method"}"#).await;
    let reply = a.reply().await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["result"]["code"], "ValidationFailure");

    // No id: nothing comes back
    a.connection.handle_text("{{{{").await;
    assert!(a.replies.try_recv().is_err());
}

#[tokio::test]
async fn capabilities_describe_opus() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");

    let reply = a.call(1, "get-capabilities", Value::Null).await;
    let codec = &reply["result"]["codecs"][0];
    assert_eq!(codec["mimeType"], "audio/opus");
    assert_eq!(codec["clockRate"], 48000);
    assert_eq!(codec["channels"], 2);
}

#[tokio::test]
async fn full_audio_path() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");
    let mut b = Client::connect(&registry, "bob");
    a.call(1, "join-room", json!({"roomId": "lobby"})).await;
    b.call(1, "join-room", json!({"roomId": "lobby"})).await;
    a.events();

    let reply = a.call(2, "create-transport", Value::Null).await;
    let send_id = reply["result"]["params"]["id"].as_str().unwrap().to_string();
    assert!(!reply["result"]["params"]["iceCandidates"].as_array().unwrap().is_empty());
    assert_eq!(
        reply["result"]["params"]["dtlsParameters"]["fingerprints"][0]["algorithm"],
        "sha-256"
    );

    let reply = a
        .call(
            3,
            "connect-transport",
            json!({
                "transportId": send_id,
                "dtlsParameters": {"role": "client", "fingerprints": [{"algorithm": "sha-256", "value": "AB:CD"}]}
            }),
        )
        .await;
    assert_eq!(reply["result"], json!({"success": true}));

    let reply = a
        .call(
            4,
            "produce",
            json!({
                "transportId": send_id,
                "kind": "audio",
                "rtpParameters": {"codecs": [{"mimeType": "audio/opus", "clockRate": 48000, "channels": 2}]}
            }),
        )
        .await;
    let producer_id = reply["result"]["producerId"].as_str().unwrap().to_string();

    let events = b.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "participant-produced");
    assert_eq!(events[0]["data"]["producerId"], producer_id.as_str());

    let reply = b.call(2, "create-transport", json!({"direction": "recv"})).await;
    let recv_id = reply["result"]["params"]["id"].as_str().unwrap().to_string();

    let reply = b
        .call(
            3,
            "consume",
            json!({"transportId": recv_id, "producerId": producer_id}),
        )
        .await;
    assert_eq!(reply["result"]["success"], true);
    assert_eq!(reply["result"]["params"]["kind"], "audio");
    let consumer_id = reply["result"]["params"]["id"].as_str().unwrap().to_string();

    let reply = b
        .call(4, "resume-consumer", json!({"consumerId": consumer_id}))
        .await;
    assert_eq!(reply["result"], json!({"success": true}));

    // Alice's send transport is invisible to bob
    let reply = b
        .call(
            5,
            "connect-transport",
            json!({
                "transportId": send_id,
                "dtlsParameters": {"fingerprints": [{"algorithm": "sha-256", "value": "AB:CD"}]}
            }),
        )
        .await;
    assert_eq!(reply["result"]["code"], "PermissionDenied");
}

#[tokio::test]
async fn mute_and_speaking_are_relayed_without_reply() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");
    let mut b = Client::connect(&registry, "bob");
    a.call(1, "join-room", json!({"roomId": "lobby"})).await;
    b.call(1, "join-room", json!({"roomId": "lobby"})).await;

    a.notify("toggle-mute", json!(true)).await;
    a.notify("speaking-change", json!({"speaking": true})).await;
    a.notify("speaking-change", json!({"speaking": false})).await;

    assert_eq!(
        b.events(),
        vec![
            json!({"event": "participant-muted", "data": {"participantId": "alice", "muted": true}}),
            json!({"event": "participant-speaking", "data": {"participantId": "alice", "speaking": true}}),
            json!({"event": "participant-speaking", "data": {"participantId": "alice", "speaking": false}}),
        ]
    );
    assert!(a.replies.try_recv().is_err());

    // Broadcast-only methods produce no reply body
    assert_eq!(
        a.connection.dispatch(Request::ToggleMute { muted: false }).await,
        None
    );
}

#[tokio::test]
async fn disconnect_after_leave_broadcasts_once() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");
    let mut b = Client::connect(&registry, "bob");
    a.call(1, "join-room", json!({"roomId": "lobby"})).await;
    b.call(1, "join-room", json!({"roomId": "lobby"})).await;

    a.notify("leave-room", json!({"roomId": "lobby"})).await;
    a.connection.close().await;
    a.connection.close().await;

    assert_eq!(
        b.events(),
        vec![json!({"event": "participant-left", "data": {"participantId": "alice"}})]
    );
    assert!(a.connection.room_id().is_none());

    // After leaving, the connection may join again
    let reply = a.call(2, "join-room", json!({"roomId": "lobby"})).await;
    assert_eq!(reply["result"]["participants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn leave_for_another_room_is_ignored() {
    let registry = registry();
    let mut a = Client::connect(&registry, "alice");
    a.call(1, "join-room", json!({"roomId": "lobby"})).await;

    a.notify("leave-room", json!({"roomId": "elsewhere"})).await;
    assert_eq!(registry.participant_count(), 1);

    a.connection.close().await;
    assert_eq!(registry.participant_count(), 0);
    assert_eq!(registry.room_count(), 0);
}

#[tokio::test]
async fn failure_reply_shape() {
    let registry = registry();
    let a = Client::connect(&registry, "alice");
    let reply = a
        .connection
        .dispatch(Request::JoinRoom {
            room_id: "   ".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(
        reply,
        ReplyBody::Failure {
            success: false,
            code: "ValidationFailure",
            ..
        }
    ));
}

/// Local engine whose transport creation waits until released
struct GatedEngine {
    inner: LocalEngine,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl MediaEngine for GatedEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    async fn create_transport(&self, direction: Direction) -> EngineResult<TransportParams> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_transport(direction).await
    }

    async fn connect_transport(&self, id: &TransportId, dtls: DtlsParameters) -> EngineResult<()> {
        self.inner.connect_transport(id, dtls).await
    }

    async fn produce(&self, id: &TransportId, kind: MediaKind, rtp: RtpParameters) -> EngineResult<ProducerId> {
        self.inner.produce(id, kind, rtp).await
    }

    async fn consume(
        &self,
        id: &TransportId,
        producer: &ProducerId,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> EngineResult<ConsumerParams> {
        self.inner.consume(id, producer, caps, paused).await
    }

    async fn resume_consumer(&self, id: &ConsumerId) -> EngineResult<()> {
        self.inner.resume_consumer(id).await
    }

    async fn close_transport(&self, id: &TransportId) {
        self.inner.close_transport(id).await;
    }

    async fn close_producer(&self, id: &ProducerId) {
        self.inner.close_producer(id).await;
    }

    async fn close_consumer(&self, id: &ConsumerId) {
        self.inner.close_consumer(id).await;
    }

    fn died(&self) -> watch::Receiver<bool> {
        self.inner.died()
    }
}

#[tokio::test]
async fn pending_engine_call_does_not_hold_up_other_requests() {
    let gated = Arc::new(GatedEngine {
        inner: LocalEngine::new(LocalEngineConfig::default()).unwrap(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let registry = Arc::new(RoomRegistry::new(SfuConfig::default(), gated.clone()));
    let mut a = Client::connect(&registry, "alice");
    a.call(10, "join-room", json!({"roomId": "lobby"})).await;

    let frame = json!({"id": 1, "method": "create-transport"}).to_string();
    a.connection.handle_text(&frame).await;
    gated.entered.notified().await;

    // Answered while create-transport is still inside the engine
    let reply = a.call(2, "get-capabilities", Value::Null).await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["codecs"][0]["mimeType"], "audio/opus");
    assert!(a.replies.try_recv().is_err());

    gated.release.notify_one();
    let reply = a.reply().await;
    assert_eq!(reply["id"], 1);
    assert!(reply["result"]["params"]["id"].is_string());
}
