//! Media-path orchestration: transports, producers and consumers
//!
//! Each operation checks ownership under the room lock, calls the engine with
//! the lock released, then commits the result in a second critical section.
//! When the caller left the room while the engine call was outstanding, the
//! new engine object is closed again and the call fails with `NotFound`.

use crate::broadcast::Notification;
use crate::engine::{
    ConsumerParams, Direction, DtlsParameters, MediaKind, RtpParameters, TransportParams,
};
use crate::error::{Result, SfuError};
use crate::registry::RoomRegistry;
use crate::room::{
    ConsumerEntry, ConsumerState, ProducerEntry, RoomState, TransportEntry, TransportState,
};
use crate::types::{ConsumerId, ProducerId, RoomId, SessionId, TransportId};
use tracing::{debug, info, warn};

impl RoomRegistry {
    /// Error for a transport id that is not in `room_id`
    fn foreign_transport(&self, room_id: &RoomId, transport_id: &TransportId) -> SfuError {
        match self.transport_rooms.get(transport_id) {
            Some(owner_room) if owner_room.value() != room_id => SfuError::PermissionDenied(
                format!("transport {transport_id} belongs to another room"),
            ),
            _ => SfuError::NotFound(format!("transport {transport_id} not found")),
        }
    }

    /// Look up a transport of the caller's room and check the caller owns it
    fn owned_transport<'a>(
        &self,
        state: &'a RoomState,
        room_id: &RoomId,
        session_id: &SessionId,
        transport_id: &TransportId,
    ) -> Result<&'a TransportEntry> {
        let entry = state
            .transports
            .get(transport_id)
            .ok_or_else(|| self.foreign_transport(room_id, transport_id))?;
        if &entry.owner != session_id {
            return Err(SfuError::PermissionDenied(format!(
                "transport {transport_id} belongs to another participant"
            )));
        }
        Ok(entry)
    }

    /// Allocate a transport for the caller
    ///
    /// Without an explicit direction the first transport is `send` and
    /// later ones are `recv`.
    pub async fn create_transport(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        direction: Option<Direction>,
    ) -> Result<TransportParams> {
        let room = self.room(room_id)?;

        let direction = {
            let state = room.lock();
            let session = state.member(session_id)?;
            let has_send = session.send_transport().is_some();
            let direction = direction.unwrap_or(if has_send {
                Direction::Recv
            } else {
                Direction::Send
            });
            if direction == Direction::Send && has_send {
                return Err(SfuError::Validation(
                    "session already has a send transport".to_string(),
                ));
            }
            direction
        };

        let params = self.engine.create_transport(direction).await?;

        let committed = {
            let mut state = room.lock();
            let committed = match state.member_mut(session_id) {
                Ok(session) if direction == Direction::Send && session.send_transport().is_some() => {
                    Err(SfuError::Validation(
                        "session already has a send transport".to_string(),
                    ))
                }
                Ok(session) => {
                    session.add_transport(params.id.clone(), direction);
                    state.transports.insert(
                        params.id.clone(),
                        TransportEntry {
                            owner: session_id.clone(),
                            direction,
                            state: TransportState::Created,
                        },
                    );
                    self.transport_rooms.insert(params.id.clone(), room_id.clone());
                    Ok(())
                }
                Err(err) => Err(err),
            };
            committed
        };

        if let Err(err) = committed {
            self.engine.close_transport(&params.id).await;
            return Err(err);
        }

        debug!(
            room_id = %room_id,
            session_id = %session_id,
            transport_id = %params.id,
            ?direction,
            "Transport created"
        );
        Ok(params)
    }

    /// Complete the DTLS handshake parameters of a transport
    pub async fn connect_transport(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let room = self.room(room_id)?;

        {
            let mut state = room.lock();
            state.member(session_id)?;
            self.owned_transport(&state, room_id, session_id, transport_id)?;
            let Some(entry) = state.transports.get_mut(transport_id) else {
                return Err(SfuError::NotFound(format!("transport {transport_id} not found")));
            };
            if entry.state != TransportState::Created {
                return Err(SfuError::Validation(format!(
                    "transport {transport_id} is already {:?}",
                    entry.state
                )));
            }
            entry.state = TransportState::Connecting;
        }

        let result = self.engine.connect_transport(transport_id, dtls_parameters).await;

        {
            let mut state = room.lock();
            if let Some(entry) = state.transports.get_mut(transport_id) {
                entry.state = if result.is_ok() {
                    TransportState::Connected
                } else {
                    TransportState::Failed
                };
            }
        }

        match result {
            Ok(()) => {
                debug!(room_id = %room_id, transport_id = %transport_id, "Transport connected");
                Ok(())
            }
            Err(err) => {
                warn!(room_id = %room_id, transport_id = %transport_id, error = %err, "Transport connect failed");
                Err(err.into())
            }
        }
    }

    /// Publish the caller's audio on its send transport
    ///
    /// Other members receive `participant-produced`.
    pub async fn produce(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId> {
        if kind != MediaKind::Audio {
            return Err(SfuError::Validation("only audio can be produced".to_string()));
        }

        let room = self.room(room_id)?;

        {
            let state = room.lock();
            let session = state.member(session_id)?;
            let entry = self.owned_transport(&state, room_id, session_id, transport_id)?;
            if entry.direction != Direction::Send {
                return Err(SfuError::Validation(format!(
                    "transport {transport_id} is not a send transport"
                )));
            }
            if session.producer().is_some() {
                return Err(SfuError::Validation("session is already producing".to_string()));
            }
        }

        let producer_id = self.engine.produce(transport_id, kind, rtp_parameters).await?;

        let committed = {
            let mut state = room.lock();
            let committed = match state.member_mut(session_id) {
                Ok(session) if session.producer().is_some() => {
                    Err(SfuError::Validation("session is already producing".to_string()))
                }
                Ok(session) => {
                    session.set_producer(producer_id.clone());
                    state.producers.insert(
                        producer_id.clone(),
                        ProducerEntry {
                            owner: session_id.clone(),
                        },
                    );
                    state.broadcast_except(
                        session_id,
                        &Notification::ParticipantProduced {
                            participant_id: session_id.clone(),
                            producer_id: producer_id.clone(),
                        },
                    );
                    Ok(())
                }
                Err(err) => Err(err),
            };
            committed
        };

        if let Err(err) = committed {
            self.engine.close_producer(&producer_id).await;
            return Err(err);
        }

        info!(
            room_id = %room_id,
            session_id = %session_id,
            producer_id = %producer_id,
            "Producer created"
        );
        Ok(producer_id)
    }

    /// Relay another member's producer to the caller, starting paused
    ///
    /// Consuming the same producer twice returns the existing consumer.
    pub async fn consume(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        transport_id: &TransportId,
        producer_id: &ProducerId,
    ) -> Result<ConsumerParams> {
        let room = self.room(room_id)?;

        let producer_owner = {
            let state = room.lock();
            state.member(session_id)?;
            let entry = self.owned_transport(&state, room_id, session_id, transport_id)?;
            if entry.direction != Direction::Recv {
                return Err(SfuError::Validation(format!(
                    "transport {transport_id} is not a receive transport"
                )));
            }
            let producer = state.producers.get(producer_id).ok_or_else(|| {
                SfuError::NotFound(format!("producer {producer_id} is not active in this room"))
            })?;
            if &producer.owner == session_id {
                return Err(SfuError::Validation("cannot consume own producer".to_string()));
            }
            if let Some(existing) = existing_consumer(&state, session_id, &producer.owner) {
                return Ok(existing);
            }
            producer.owner.clone()
        };

        let params = self
            .engine
            .consume(transport_id, producer_id, &self.engine.rtp_capabilities(), true)
            .await?;

        let committed = {
            let mut state = room.lock();
            let committed = if !state.producers.contains_key(producer_id) {
                Err(SfuError::NotFound(format!("producer {producer_id} was closed")))
            } else if !state.transports.contains_key(transport_id) {
                Err(SfuError::NotFound(format!("transport {transport_id} was closed")))
            } else if let Some(existing) = existing_consumer(&state, session_id, &producer_owner) {
                Ok(Some(existing))
            } else {
                match state.member_mut(session_id) {
                    Ok(session) => {
                        session.bind_recv_transport(producer_owner.clone(), transport_id);
                        session.add_consumer(producer_owner.clone(), params.id.clone());
                        state.consumers.insert(
                            params.id.clone(),
                            ConsumerEntry {
                                owner: session_id.clone(),
                                producer_owner,
                                params: params.clone(),
                                state: ConsumerState::Created,
                            },
                        );
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            };
            committed
        };

        match committed {
            Ok(None) => {
                debug!(
                    room_id = %room_id,
                    session_id = %session_id,
                    consumer_id = %params.id,
                    producer_id = %producer_id,
                    "Consumer created"
                );
                Ok(params)
            }
            Ok(Some(existing)) => {
                self.engine.close_consumer(&params.id).await;
                Ok(existing)
            }
            Err(err) => {
                self.engine.close_consumer(&params.id).await;
                Err(err)
            }
        }
    }

    /// Start playback of a consumer created paused
    pub async fn resume_consumer(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        consumer_id: &ConsumerId,
    ) -> Result<()> {
        let room = self.room(room_id)?;

        {
            let state = room.lock();
            state.member(session_id)?;
            let entry = state
                .consumers
                .get(consumer_id)
                .ok_or_else(|| SfuError::NotFound(format!("consumer {consumer_id} not found")))?;
            if &entry.owner != session_id {
                return Err(SfuError::PermissionDenied(format!(
                    "consumer {consumer_id} belongs to another participant"
                )));
            }
            if entry.state == ConsumerState::Active {
                return Ok(());
            }
        }

        self.engine.resume_consumer(consumer_id).await?;

        let mut state = room.lock();
        let Some(entry) = state.consumers.get_mut(consumer_id) else {
            return Err(SfuError::NotFound(format!("consumer {consumer_id} was closed")));
        };
        entry.state = ConsumerState::Active;
        debug!(room_id = %room_id, consumer_id = %consumer_id, "Consumer resumed");
        Ok(())
    }

    /// Close the caller's producer and every consumer relaying it
    ///
    /// Other members receive `producer-closed`.
    pub async fn close_producer(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        producer_id: &ProducerId,
    ) -> Result<()> {
        let room = self.room(room_id)?;

        let media = {
            let mut state = room.lock();
            state.member(session_id)?;
            let media = state.remove_producer(session_id, producer_id)?;
            state.broadcast_except(
                session_id,
                &Notification::ProducerClosed {
                    participant_id: session_id.clone(),
                    producer_id: producer_id.clone(),
                },
            );
            media
        };

        self.release_media(media).await;

        info!(
            room_id = %room_id,
            session_id = %session_id,
            producer_id = %producer_id,
            "Producer closed"
        );
        Ok(())
    }
}

/// Consumer `session_id` already holds for `producer_owner`'s producer
fn existing_consumer(
    state: &RoomState,
    session_id: &SessionId,
    producer_owner: &SessionId,
) -> Option<ConsumerParams> {
    let consumer_id = state.members.get(session_id)?.consumer_for(producer_owner)?;
    state
        .consumers
        .get(consumer_id)
        .map(|entry| entry.params.clone())
}
