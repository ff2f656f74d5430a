//! Room state
//!
//! All tables of one room sit behind a single mutex that is never held across
//! an `.await`. Every mutation and the notifications it causes happen in one
//! critical section, so no caller observes a half-applied change.

use crate::broadcast::Notification;
use crate::engine::{ConsumerParams, Direction};
use crate::error::{Result, SfuError};
use crate::session::{OwnedMedia, Session};
use crate::types::{ConsumerId, ParticipantInfo, ProducerId, RoomId, SessionId, TransportId};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

/// Transport lifecycle: created -> connecting -> connected | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Connecting,
    Connected,
    Failed,
}

/// Consumer lifecycle: created (paused) -> active
///
/// Closing a consumer or producer removes its entry from the room tables in
/// the same critical section, so no closed entry is ever observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Active,
}

#[derive(Debug, Clone)]
pub struct TransportEntry {
    pub owner: SessionId,
    pub direction: Direction,
    pub state: TransportState,
}

/// Producers are active from creation until removal
#[derive(Debug, Clone)]
pub struct ProducerEntry {
    pub owner: SessionId,
}

#[derive(Debug, Clone)]
pub struct ConsumerEntry {
    pub owner: SessionId,
    pub producer_owner: SessionId,
    pub params: ConsumerParams,
    pub state: ConsumerState,
}

/// Members plus id-keyed lookup tables for one room
#[derive(Debug, Default)]
pub struct RoomState {
    /// Members in join order
    pub(crate) members: IndexMap<SessionId, Session>,
    pub(crate) transports: HashMap<TransportId, TransportEntry>,
    pub(crate) producers: HashMap<ProducerId, ProducerEntry>,
    pub(crate) consumers: HashMap<ConsumerId, ConsumerEntry>,
    /// Set once the room has been evicted from the registry
    pub(crate) closed: bool,
}

impl RoomState {
    pub(crate) fn member(&self, id: &SessionId) -> Result<&Session> {
        self.members.get(id).ok_or_else(SfuError::not_in_room)
    }

    pub(crate) fn member_mut(&mut self, id: &SessionId) -> Result<&mut Session> {
        self.members.get_mut(id).ok_or_else(SfuError::not_in_room)
    }

    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.members.values().map(Session::info).collect()
    }

    /// Push to every member except `origin`
    pub(crate) fn broadcast_except(&self, origin: &SessionId, notification: &Notification) {
        for session in self.members.values().filter(|s| &s.id != origin) {
            session.notify(notification.clone());
        }
    }

    /// Drop every consumer that relays `producer_owner`'s producer
    fn release_consumers_of(&mut self, producer_owner: &SessionId) -> Vec<ConsumerId> {
        let mut released = Vec::new();
        for session in self.members.values_mut() {
            if let Some(consumer) = session.release_remote(producer_owner) {
                released.push(consumer);
            }
        }
        self.consumers.retain(|id, entry| {
            let keep = &entry.producer_owner != producer_owner;
            if !keep && !released.contains(id) {
                released.push(id.clone());
            }
            keep
        });
        released
    }

    /// Unregister a member and everything it owns
    ///
    /// Returns `None` when the session is not (or no longer) a member, which
    /// makes a repeated leave a no-op. The returned media also includes other
    /// members' consumers of the departed producer.
    pub(crate) fn remove_member(&mut self, id: &SessionId) -> Option<(Session, OwnedMedia)> {
        let mut session = self.members.shift_remove(id)?;
        let mut media = session.begin_close();

        self.transports.retain(|_, entry| &entry.owner != id);
        self.producers.retain(|_, entry| &entry.owner != id);
        self.consumers.retain(|_, entry| &entry.owner != id);

        let remote_consumers = self.release_consumers_of(id);
        media.merge(OwnedMedia {
            consumers: remote_consumers,
            ..OwnedMedia::default()
        });

        Some((session, media))
    }

    /// Close `owner`'s producer and the consumers relaying it
    pub(crate) fn remove_producer(
        &mut self,
        owner: &SessionId,
        producer_id: &ProducerId,
    ) -> Result<OwnedMedia> {
        let entry = self
            .producers
            .get(producer_id)
            .ok_or_else(|| SfuError::NotFound(format!("producer {producer_id} not found")))?;
        if &entry.owner != owner {
            return Err(SfuError::PermissionDenied(format!(
                "producer {producer_id} belongs to another participant"
            )));
        }

        self.producers.remove(producer_id);
        let producer = self.member_mut(owner)?.take_producer();
        let consumers = self.release_consumers_of(owner);

        Ok(OwnedMedia {
            transports: Vec::new(),
            producer,
            consumers,
        })
    }
}

/// A named group of participants sharing one media session
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    state: Mutex<RoomState>,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            state: Mutex::new(RoomState::default()),
        }
    }

    /// Enter the room's critical section
    pub(crate) fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.state.lock().members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().members.is_empty()
    }

    /// Snapshot of the current members in join order
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.state.lock().participants()
    }

    #[must_use]
    pub fn get_stats(&self) -> RoomStats {
        let state = self.state.lock();
        RoomStats {
            participant_count: state.members.len(),
            transport_count: state.transports.len(),
            producer_count: state.producers.len(),
            consumer_count: state.consumers.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RoomStats {
    pub participant_count: usize,
    pub transport_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{NotificationReceiver, Notifier};
    use crate::engine::{MediaKind, RtpParameters};

    fn add_member(state: &mut RoomState, id: &str) -> NotificationReceiver {
        let (notifier, rx) = Notifier::channel(16);
        let id = SessionId::from(id);
        state
            .members
            .insert(id.clone(), Session::new(id.clone(), id.to_string(), notifier));
        rx
    }

    #[test]
    fn test_broadcast_skips_origin() {
        let mut state = RoomState::default();
        let mut a = add_member(&mut state, "a");
        let mut b = add_member(&mut state, "b");

        let n = Notification::ParticipantSpeaking {
            participant_id: SessionId::from("a"),
            speaking: true,
        };
        state.broadcast_except(&SessionId::from("a"), &n);

        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().ok(), Some(n));
    }

    #[test]
    fn test_participants_keep_join_order() {
        let mut state = RoomState::default();
        let _c = add_member(&mut state, "c");
        let _a = add_member(&mut state, "a");
        let _b = add_member(&mut state, "b");
        state.remove_member(&SessionId::from("a"));

        let ids: Vec<_> = state.participants().into_iter().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_remove_member_is_idempotent_and_releases_remote_consumers() {
        let mut state = RoomState::default();
        let _a = add_member(&mut state, "a");
        let _b = add_member(&mut state, "b");
        let a = SessionId::from("a");
        let b = SessionId::from("b");

        state.producers.insert(
            ProducerId::from("p-a"),
            ProducerEntry { owner: a.clone() },
        );
        state.member_mut(&a).unwrap().set_producer(ProducerId::from("p-a"));
        state.consumers.insert(
            ConsumerId::from("c-b"),
            ConsumerEntry {
                owner: b.clone(),
                producer_owner: a.clone(),
                params: ConsumerParams {
                    id: ConsumerId::from("c-b"),
                    producer_id: ProducerId::from("p-a"),
                    kind: MediaKind::Audio,
                    rtp_parameters: RtpParameters(serde_json::json!({})),
                },
                state: ConsumerState::Created,
            },
        );
        state.member_mut(&b).unwrap().add_consumer(a.clone(), ConsumerId::from("c-b"));

        let (_, media) = state.remove_member(&a).unwrap();
        assert_eq!(media.producer, Some(ProducerId::from("p-a")));
        assert_eq!(media.consumers, vec![ConsumerId::from("c-b")]);
        assert!(state.consumers.is_empty());
        assert!(state.producers.is_empty());
        assert!(state.member(&b).unwrap().consumer_for(&a).is_none());

        assert!(state.remove_member(&a).is_none());
    }
}
