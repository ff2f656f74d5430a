//! Room registry - owns every live room and the engine handle
//!
//! This module provides:
//! - Atomic get-or-create of rooms under concurrent first-joins
//! - Join/leave with member snapshots and presence fan-out
//! - Immediate eviction of rooms whose last member left
//! - Registry-wide statistics

use crate::broadcast::{Notification, Notifier};
use crate::config::SfuConfig;
use crate::engine::{MediaEngine, RtpCapabilities};
use crate::error::{Result, SfuError};
use crate::room::Room;
use crate::session::{OwnedMedia, Session};
use crate::types::{ParticipantInfo, RoomId, SessionId, TransportId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest accepted room id, in characters
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Trim and check a client-supplied room id
pub fn validate_room_id(raw: &str) -> Result<RoomId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SfuError::Validation("room id must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_ROOM_ID_LEN {
        return Err(SfuError::Validation(format!(
            "room id must be at most {MAX_ROOM_ID_LEN} characters"
        )));
    }
    Ok(RoomId::from(trimmed))
}

/// Registry-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub rooms: usize,
    pub participants: usize,
}

/// Top-level orchestration of rooms
///
/// Lock order is registry shard, then room mutex. Code holding a room lock
/// never touches `rooms`; it may touch `transport_rooms`.
pub struct RoomRegistry {
    pub(crate) config: SfuConfig,
    pub(crate) engine: Arc<dyn MediaEngine>,
    rooms: DashMap<RoomId, Arc<Room>>,
    /// Rooms created and not yet evicted; checked against `max_rooms`
    room_slots: AtomicUsize,
    /// Transport id -> room it was created in
    pub(crate) transport_rooms: DashMap<TransportId, RoomId>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(config: SfuConfig, engine: Arc<dyn MediaEngine>) -> Self {
        info!(
            max_rooms = config.max_rooms,
            max_participants = config.max_participants,
            "Room registry initialized"
        );

        Self {
            config,
            engine,
            rooms: DashMap::new(),
            room_slots: AtomicUsize::new(0),
            transport_rooms: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// Router capability descriptor clients load their device with
    #[must_use]
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.engine.rtp_capabilities()
    }

    /// Get a live room
    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn room(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        self.get(room_id)
            .ok_or_else(|| SfuError::NotFound(format!("room {room_id} not found")))
    }

    /// Get or create a room
    ///
    /// Concurrent calls for the same unseen id all receive the same instance.
    pub fn get_or_create(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        if let Some(room) = self.get(room_id) {
            return Ok(room);
        }

        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                if !self.reserve_room_slot() {
                    warn!(max_rooms = self.config.max_rooms, "Room limit reached");
                    return Err(SfuError::Validation(
                        "maximum number of rooms reached".to_string(),
                    ));
                }
                let room = Arc::new(Room::new(room_id.clone()));
                entry.insert(Arc::clone(&room));
                info!(room_id = %room_id, "Created new room");
                Ok(room)
            }
        }
    }

    /// Claim a slot for a new room (0 = unlimited)
    fn reserve_room_slot(&self) -> bool {
        let max_rooms = self.config.max_rooms;
        self.room_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rooms| {
                (max_rooms == 0 || rooms < max_rooms).then_some(rooms + 1)
            })
            .is_ok()
    }

    /// Register a session in a room and return the member snapshot
    ///
    /// The snapshot includes the joiner and lists members in join order.
    /// Existing members receive `participant-joined`.
    pub fn join(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        display_name: &str,
        notifier: Notifier,
    ) -> Result<Vec<ParticipantInfo>> {
        let room_id = validate_room_id(room_id.as_str())?;

        loop {
            let room = self.get_or_create(&room_id)?;
            let mut state = room.lock();

            // Evicted between lookup and lock
            if state.closed {
                continue;
            }

            if state.members.contains_key(session_id) {
                return Err(SfuError::Validation("already joined this room".to_string()));
            }

            // Enforce participant limit (0 = unlimited)
            let count = state.members.len();
            if self.config.max_participants > 0 && count >= self.config.max_participants {
                warn!(
                    room_id = %room_id,
                    current_participants = count,
                    max_participants = self.config.max_participants,
                    "Participant limit reached for room"
                );
                return Err(SfuError::Validation(
                    "maximum number of participants reached for this room".to_string(),
                ));
            }

            state.broadcast_except(
                session_id,
                &Notification::ParticipantJoined {
                    participant_id: session_id.clone(),
                    display_name: display_name.to_string(),
                },
            );
            state.members.insert(
                session_id.clone(),
                Session::new(session_id.clone(), display_name.to_string(), notifier),
            );
            let snapshot = state.participants();

            info!(
                room_id = %room_id,
                session_id = %session_id,
                participants = snapshot.len(),
                "Participant joined room"
            );
            return Ok(snapshot);
        }
    }

    /// Remove a session from a room and release everything it owns
    ///
    /// Returns false when the session was not a member, so a repeated leave
    /// is a no-op that broadcasts nothing.
    pub async fn leave(&self, room_id: &RoomId, session_id: &SessionId) -> bool {
        let Some(room) = self.get(room_id) else {
            debug!(room_id = %room_id, "Room not found when removing participant");
            return false;
        };

        let (mut session, media, remaining) = {
            let mut state = room.lock();
            let Some((session, media)) = state.remove_member(session_id) else {
                return false;
            };
            for transport in &media.transports {
                self.transport_rooms.remove(transport);
            }
            state.broadcast_except(
                session_id,
                &Notification::ParticipantLeft {
                    participant_id: session_id.clone(),
                },
            );
            (session, media, state.members.len())
        };

        self.release_media(media).await;
        session.finish_close();
        debug!(session_id = %session_id, state = ?session.state(), "Session released");

        if remaining == 0 {
            self.evict_if_empty(room_id);
        }

        info!(
            room_id = %room_id,
            session_id = %session_id,
            remaining,
            "Participant left room"
        );
        true
    }

    /// Drop a room from the registry if nobody is in it
    fn evict_if_empty(&self, room_id: &RoomId) {
        let removed = self.rooms.remove_if(room_id, |_, room| {
            let mut state = room.lock();
            if state.members.is_empty() {
                state.closed = true;
                true
            } else {
                false
            }
        });

        if removed.is_some() {
            self.room_slots.fetch_sub(1, Ordering::AcqRel);
            info!(
                room_id = %room_id,
                remaining_rooms = self.rooms.len(),
                "Removed empty room"
            );
        }
    }

    /// Close engine objects, consumers first
    pub(crate) async fn release_media(&self, media: OwnedMedia) {
        for consumer in &media.consumers {
            self.engine.close_consumer(consumer).await;
        }
        if let Some(producer) = &media.producer {
            self.engine.close_producer(producer).await;
        }
        for transport in &media.transports {
            self.engine.close_transport(transport).await;
        }
    }

    /// Member snapshot of a live room
    #[must_use]
    pub fn participants(&self, room_id: &RoomId) -> Option<Vec<ParticipantInfo>> {
        self.get(room_id).map(|room| room.participants())
    }

    /// Get list of all live room ids
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.rooms
            .iter()
            .map(|entry| entry.value().participant_count())
            .sum()
    }

    #[must_use]
    pub fn get_stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.room_count(),
            participants: self.participant_count(),
        }
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("config", &self.config)
            .field("rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}
