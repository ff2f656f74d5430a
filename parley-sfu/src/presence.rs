//! Mute and speaking fan-out
//!
//! Updates carry latest-value semantics and are relayed one by one. A session
//! that is not in the room is ignored.

use crate::broadcast::Notification;
use crate::registry::RoomRegistry;
use crate::types::{RoomId, SessionId};
use tracing::debug;

impl RoomRegistry {
    /// Store the mute flag and tell every other member
    ///
    /// Returns false when the session is not in the room.
    pub fn set_muted(&self, room_id: &RoomId, session_id: &SessionId, muted: bool) -> bool {
        let Some(room) = self.get(room_id) else {
            debug!(room_id = %room_id, session_id = %session_id, "Mute update for unknown room ignored");
            return false;
        };

        let mut state = room.lock();
        let Ok(session) = state.member_mut(session_id) else {
            debug!(room_id = %room_id, session_id = %session_id, "Mute update from non-member ignored");
            return false;
        };
        session.muted = muted;
        state.broadcast_except(
            session_id,
            &Notification::ParticipantMuted {
                participant_id: session_id.clone(),
                muted,
            },
        );
        true
    }

    /// Store the speaking flag and tell every other member
    ///
    /// Relayed even when the flag did not change.
    pub fn set_speaking(&self, room_id: &RoomId, session_id: &SessionId, speaking: bool) -> bool {
        let Some(room) = self.get(room_id) else {
            debug!(room_id = %room_id, session_id = %session_id, "Speaking update for unknown room ignored");
            return false;
        };

        let mut state = room.lock();
        let Ok(session) = state.member_mut(session_id) else {
            debug!(room_id = %room_id, session_id = %session_id, "Speaking update from non-member ignored");
            return false;
        };
        session.speaking = speaking;
        state.broadcast_except(
            session_id,
            &Notification::ParticipantSpeaking {
                participant_id: session_id.clone(),
                speaking,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::broadcast::{Notification, Notifier};
    use crate::config::SfuConfig;
    use crate::engine::{LocalEngine, LocalEngineConfig};
    use crate::registry::RoomRegistry;
    use crate::types::{RoomId, SessionId};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_speaking_relayed_every_tick() {
        let engine = LocalEngine::new(LocalEngineConfig::default()).unwrap();
        let registry = RoomRegistry::new(SfuConfig::default(), Arc::new(engine));
        let room = RoomId::from("lobby");
        let (a_tx, _a_rx) = Notifier::channel(8);
        let (b_tx, mut b_rx) = Notifier::channel(8);
        registry.join(&room, &SessionId::from("a"), "a", a_tx).unwrap();
        registry.join(&room, &SessionId::from("b"), "b", b_tx).unwrap();

        assert!(registry.set_speaking(&room, &SessionId::from("a"), true));
        assert!(registry.set_speaking(&room, &SessionId::from("a"), true));

        let expected = Notification::ParticipantSpeaking {
            participant_id: SessionId::from("a"),
            speaking: true,
        };
        assert_eq!(b_rx.try_recv().ok(), Some(expected.clone()));
        assert_eq!(b_rx.try_recv().ok(), Some(expected));
        assert!(b_rx.try_recv().is_err());

        let participants = registry.participants(&room).unwrap();
        assert!(participants[0].speaking);
    }

    #[tokio::test]
    async fn test_updates_from_outsider_are_ignored() {
        let engine = LocalEngine::new(LocalEngineConfig::default()).unwrap();
        let registry = RoomRegistry::new(SfuConfig::default(), Arc::new(engine));
        let room = RoomId::from("lobby");
        let (a_tx, mut a_rx) = Notifier::channel(8);
        registry.join(&room, &SessionId::from("a"), "a", a_tx).unwrap();

        assert!(!registry.set_muted(&room, &SessionId::from("ghost"), true));
        assert!(!registry.set_speaking(&RoomId::from("elsewhere"), &SessionId::from("a"), true));
        assert!(a_rx.try_recv().is_err());
    }
}
