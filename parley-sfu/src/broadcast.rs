//! Presence notifications and their per-member delivery queue
//!
//! Each member has one bounded outbound queue. Only `participant-speaking`
//! updates are ever shed: under pressure a queued speaking update is replaced
//! or evicted, so membership and media state changes always get through.

use crate::types::{ProducerId, SessionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Event pushed to room members, never acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    ParticipantJoined {
        participant_id: SessionId,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { participant_id: SessionId },
    #[serde(rename_all = "camelCase")]
    ParticipantMuted { participant_id: SessionId, muted: bool },
    #[serde(rename_all = "camelCase")]
    ParticipantSpeaking {
        participant_id: SessionId,
        speaking: bool,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantProduced {
        participant_id: SessionId,
        producer_id: ProducerId,
    },
    #[serde(rename_all = "camelCase")]
    ProducerClosed {
        participant_id: SessionId,
        producer_id: ProducerId,
    },
}

impl Notification {
    /// Originator of a speaking update, if this is one
    fn speaking_origin(&self) -> Option<&SessionId> {
        match self {
            Self::ParticipantSpeaking { participant_id, .. } => Some(participant_id),
            _ => None,
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<Notification>>,
    capacity: usize,
    ready: Notify,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
}

impl Shared {
    /// Free one slot by evicting a queued speaking update
    ///
    /// Prefers an older update from `origin`, whose value the new one
    /// supersedes, then the oldest speaking update of anyone.
    fn evict_speaking(queue: &mut VecDeque<Notification>, origin: Option<&SessionId>) -> bool {
        let position = origin
            .and_then(|origin| {
                queue
                    .iter()
                    .position(|queued| queued.speaking_origin() == Some(origin))
            })
            .or_else(|| queue.iter().position(|queued| queued.speaking_origin().is_some()));

        match position {
            Some(index) => queue.remove(index).is_some(),
            None => false,
        }
    }
}

/// Sending half of one member's outbound notification queue
///
/// Delivery never waits. A full queue sheds speaking updates; every other
/// notification is kept even past capacity.
pub struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    /// Bounded queue pair for one member
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, NotificationReceiver) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            ready: Notify::new(),
            senders: AtomicUsize::new(1),
            receiver_alive: AtomicBool::new(true),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            NotificationReceiver { shared },
        )
    }

    /// Enqueue without waiting. Returns false if the notification was dropped.
    pub fn push(&self, recipient: &SessionId, notification: Notification) -> bool {
        // Receiver already gone: the connection is tearing down
        if !self.shared.receiver_alive.load(Ordering::Acquire) {
            return false;
        }

        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                let origin = notification.speaking_origin();
                if !Shared::evict_speaking(&mut queue, origin) {
                    if origin.is_some() {
                        debug!(
                            session_id = %recipient,
                            "Outbound queue full, dropping speaking update"
                        );
                        return false;
                    }
                    warn!(
                        session_id = %recipient,
                        queued = queue.len(),
                        capacity = self.shared.capacity,
                        notification = ?notification,
                        "Outbound queue over capacity, keeping state change"
                    );
                }
            }
            queue.push_back(notification);
        }

        self.shared.ready.notify_one();
        true
    }
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.ready.notify_one();
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("capacity", &self.shared.capacity)
            .field("queued", &self.shared.queue.lock().len())
            .finish()
    }
}

/// Receiving half drained by the member's connection writer
pub struct NotificationReceiver {
    shared: Arc<Shared>,
}

impl NotificationReceiver {
    /// Wait for the next notification; `None` once every notifier is gone
    /// and the queue is drained
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            let next = self.shared.queue.lock().pop_front();
            if next.is_some() {
                return next;
            }
            if self.shared.senders.load(Ordering::Acquire) == 0 {
                return None;
            }
            self.shared.ready.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Result<Notification, TryRecvError> {
        let next = self.shared.queue.lock().pop_front();
        match next {
            Some(notification) => Ok(notification),
            None if self.shared.senders.load(Ordering::Acquire) == 0 => {
                Err(TryRecvError::Disconnected)
            }
            None => Err(TryRecvError::Empty),
        }
    }

    /// Number of notifications waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for NotificationReceiver {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Release);
        self.shared.queue.lock().clear();
    }
}

impl std::fmt::Debug for NotificationReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationReceiver")
            .field("queued", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaking(id: &str, speaking: bool) -> Notification {
        Notification::ParticipantSpeaking {
            participant_id: SessionId::from(id),
            speaking,
        }
    }

    fn left(id: &str) -> Notification {
        Notification::ParticipantLeft {
            participant_id: SessionId::from(id),
        }
    }

    #[test]
    fn test_notification_wire_shape() {
        let n = Notification::ParticipantMuted {
            participant_id: SessionId::from("p1"),
            muted: true,
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            serde_json::json!({"event": "participant-muted", "data": {"participantId": "p1", "muted": true}})
        );

        let n = Notification::ParticipantJoined {
            participant_id: SessionId::from("p2"),
            display_name: "bob".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            serde_json::json!({"event": "participant-joined", "data": {"participantId": "p2", "displayName": "bob"}})
        );
    }

    #[test]
    fn test_full_queue_replaces_speaking_from_same_origin() {
        let (notifier, mut rx) = Notifier::channel(2);
        let me = SessionId::from("me");

        assert!(notifier.push(&me, speaking("a", true)));
        assert!(notifier.push(&me, speaking("b", true)));
        assert!(notifier.push(&me, speaking("a", false)));

        assert_eq!(rx.try_recv().ok(), Some(speaking("b", true)));
        assert_eq!(rx.try_recv().ok(), Some(speaking("a", false)));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_state_changes_are_never_dropped() {
        let (notifier, mut rx) = Notifier::channel(2);
        let me = SessionId::from("me");

        assert!(notifier.push(&me, speaking("a", true)));
        assert!(notifier.push(&me, left("x")));
        // Evicts the queued speaking update
        assert!(notifier.push(&me, left("y")));
        // Nothing left to evict: kept past capacity
        assert!(notifier.push(&me, left("z")));
        // Speaking update has no room and is shed
        assert!(!notifier.push(&me, speaking("b", true)));

        assert_eq!(rx.len(), 3);
        assert_eq!(rx.try_recv().ok(), Some(left("x")));
        assert_eq!(rx.try_recv().ok(), Some(left("y")));
        assert_eq!(rx.try_recv().ok(), Some(left("z")));
    }

    #[tokio::test]
    async fn test_recv_ends_when_notifiers_are_gone() {
        let (notifier, mut rx) = Notifier::channel(4);
        let clone = notifier.clone();
        let me = SessionId::from("me");

        assert!(clone.push(&me, left("x")));
        drop(notifier);
        drop(clone);

        assert_eq!(rx.recv().await, Some(left("x")));
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let (notifier, mut rx) = Notifier::channel(4);
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;

        assert!(notifier.push(&SessionId::from("me"), left("x")));
        assert_eq!(waiter.await.unwrap(), Some(left("x")));
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (notifier, rx) = Notifier::channel(4);
        drop(rx);
        assert!(!notifier.push(&SessionId::from("me"), left("x")));
    }
}
