//! Per-connection signaling gateway
//!
//! A [`Connection`] maps one websocket onto one session. It remembers which
//! room the session is in (by id only) and turns decoded requests into
//! registry calls. Engine-bound requests run in their own task so a slow
//! engine call never holds up the rest of the connection.

use super::protocol::{decode, Decoded, ReplyBody, Request, ServerFrame};
use parking_lot::Mutex;
use parley_sfu::{validate_room_id, Notifier, RoomId, RoomRegistry, SessionId, SfuError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Signaling state of one client connection
pub struct Connection {
    registry: Arc<RoomRegistry>,
    session_id: SessionId,
    display_name: String,
    notifier: Notifier,
    room: Mutex<Option<RoomId>>,
    replies: mpsc::Sender<ServerFrame>,
}

impl Connection {
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        session_id: SessionId,
        display_name: String,
        notifier: Notifier,
        replies: mpsc::Sender<ServerFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            session_id,
            display_name,
            notifier,
            room: Mutex::new(None),
            replies,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Room the session currently belongs to
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        self.room.lock().clone()
    }

    fn current_room(&self) -> Result<RoomId, SfuError> {
        self.room_id()
            .ok_or_else(|| SfuError::NotFound("session is not in a room".to_string()))
    }

    /// Handle one text frame from the socket
    ///
    /// Engine-bound requests are spawned; everything else completes before
    /// the next frame is read.
    pub async fn handle_text(self: &Arc<Self>, text: &str) {
        match decode(text) {
            Decoded::Request { id, request } => {
                if request.calls_engine() {
                    let connection = Arc::clone(self);
                    tokio::spawn(async move {
                        let reply = connection.dispatch(request).await;
                        connection.reply(id, reply).await;
                    });
                } else {
                    let reply = self.dispatch(request).await;
                    self.reply(id, reply).await;
                }
            }
            Decoded::Rejected { id, error } => {
                debug!(session_id = %self.session_id, error = %error, "Rejected malformed frame");
                self.reply(Some(id), Some(ReplyBody::failure(&error))).await;
            }
            Decoded::Dropped(error) => {
                warn!(session_id = %self.session_id, error = %error, "Dropped malformed frame without id");
            }
        }
    }

    async fn reply(&self, id: Option<u64>, body: Option<ReplyBody>) {
        let (Some(id), Some(result)) = (id, body) else {
            return;
        };
        if self
            .replies
            .send(ServerFrame::Reply { id, result })
            .await
            .is_err()
        {
            debug!(session_id = %self.session_id, id, "Connection closed before reply was sent");
        }
    }

    /// Run one request; returns the reply body for request/response methods
    pub async fn dispatch(&self, request: Request) -> Option<ReplyBody> {
        let method = request.method();
        let notification = request.is_notification();

        let result = self.execute(request).await;
        if notification {
            return None;
        }

        Some(match result {
            Ok(body) => body,
            Err(err) => {
                debug!(
                    session_id = %self.session_id,
                    method,
                    code = err.code(),
                    error = %err,
                    "Request failed"
                );
                ReplyBody::failure(&err)
            }
        })
    }

    async fn execute(&self, request: Request) -> Result<ReplyBody, SfuError> {
        let session_id = &self.session_id;

        match request {
            Request::GetCapabilities => Ok(ReplyBody::Capabilities(self.registry.rtp_capabilities())),
            Request::JoinRoom { room_id } => self.join_room(&room_id),
            Request::CreateTransport { direction } => {
                let room_id = self.current_room()?;
                let params = self
                    .registry
                    .create_transport(&room_id, session_id, direction)
                    .await?;
                Ok(ReplyBody::Transport {
                    success: true,
                    params,
                })
            }
            Request::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                let room_id = self.current_room()?;
                self.registry
                    .connect_transport(&room_id, session_id, &transport_id, dtls_parameters)
                    .await?;
                Ok(ReplyBody::ack())
            }
            Request::Produce {
                transport_id,
                kind,
                rtp_parameters,
            } => {
                let room_id = self.current_room()?;
                let producer_id = self
                    .registry
                    .produce(&room_id, session_id, &transport_id, kind, rtp_parameters)
                    .await?;
                Ok(ReplyBody::Produced {
                    success: true,
                    producer_id,
                })
            }
            Request::Consume {
                transport_id,
                producer_id,
            } => {
                let room_id = self.current_room()?;
                let params = self
                    .registry
                    .consume(&room_id, session_id, &transport_id, &producer_id)
                    .await?;
                Ok(ReplyBody::Consumed {
                    success: true,
                    params,
                })
            }
            Request::ResumeConsumer { consumer_id } => {
                let room_id = self.current_room()?;
                self.registry
                    .resume_consumer(&room_id, session_id, &consumer_id)
                    .await?;
                Ok(ReplyBody::ack())
            }
            Request::CloseProducer { producer_id } => {
                let room_id = self.current_room()?;
                self.registry
                    .close_producer(&room_id, session_id, &producer_id)
                    .await?;
                Ok(ReplyBody::ack())
            }
            Request::ToggleMute { muted } => {
                match self.room_id() {
                    Some(room_id) => {
                        self.registry.set_muted(&room_id, session_id, muted);
                    }
                    None => debug!(session_id = %session_id, "Mute toggle outside a room ignored"),
                }
                Ok(ReplyBody::ack())
            }
            Request::SpeakingChange { speaking } => {
                match self.room_id() {
                    Some(room_id) => {
                        self.registry.set_speaking(&room_id, session_id, speaking);
                    }
                    None => debug!(session_id = %session_id, "Speaking change outside a room ignored"),
                }
                Ok(ReplyBody::ack())
            }
            Request::LeaveRoom { room_id } => {
                self.leave_room(room_id.as_deref()).await;
                Ok(ReplyBody::ack())
            }
        }
    }

    fn join_room(&self, raw_room_id: &str) -> Result<ReplyBody, SfuError> {
        let room_id = validate_room_id(raw_room_id)?;

        let mut current = self.room.lock();
        if let Some(existing) = current.as_ref() {
            return Err(SfuError::Validation(format!("already in room {existing}")));
        }

        let participants = self.registry.join(
            &room_id,
            &self.session_id,
            &self.display_name,
            self.notifier.clone(),
        )?;
        *current = Some(room_id);

        Ok(ReplyBody::Joined {
            success: true,
            participants,
        })
    }

    async fn leave_room(&self, requested: Option<&str>) {
        let current = self.room_id();
        let Some(room_id) = current else {
            debug!(session_id = %self.session_id, "Leave outside a room ignored");
            return;
        };
        if let Some(requested) = requested {
            if requested.trim() != room_id.as_str() {
                debug!(
                    session_id = %self.session_id,
                    room_id = %room_id,
                    requested,
                    "Leave for a room the session is not in ignored"
                );
                return;
            }
        }

        {
            let mut slot = self.room.lock();
            if slot.as_ref() == Some(&room_id) {
                *slot = None;
            }
        }
        self.registry.leave(&room_id, &self.session_id).await;
    }

    /// Disconnect cleanup; safe to call more than once
    pub async fn close(&self) {
        let room_id = self.room.lock().take();
        if let Some(room_id) = room_id {
            self.registry.leave(&room_id, &self.session_id).await;
        }
        info!(session_id = %self.session_id, "Signaling connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("display_name", &self.display_name)
            .field("room", &self.room_id())
            .finish_non_exhaustive()
    }
}
