//! Participant session state held by a room
//!
//! A session exclusively owns its media-path handles. The room keeps
//! id-keyed lookup tables that point back at the owning session id only.

use crate::broadcast::{Notification, Notifier};
use crate::engine::Direction;
use crate::types::{ConsumerId, ParticipantInfo, ProducerId, SessionId, TransportId};
use std::collections::{HashMap, HashSet};

/// Lifecycle of a session inside a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// Engine handles released when a session closes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OwnedMedia {
    pub transports: Vec<TransportId>,
    pub producer: Option<ProducerId>,
    pub consumers: Vec<ConsumerId>,
}

impl OwnedMedia {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producer.is_none() && self.consumers.is_empty()
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.transports.extend(other.transports);
        self.consumers.extend(other.consumers);
        if self.producer.is_none() {
            self.producer = other.producer;
        }
    }
}

/// One participant registered in a room
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub display_name: String,
    pub muted: bool,
    pub speaking: bool,
    state: SessionState,
    notifier: Notifier,
    send_transport: Option<TransportId>,
    /// Receive transports not yet bound to a remote participant
    unbound_recv: HashSet<TransportId>,
    /// Remote participant -> receive transport carrying their audio
    recv_transports: HashMap<SessionId, TransportId>,
    producer: Option<ProducerId>,
    /// Remote participant -> consumer of their producer
    consumers: HashMap<SessionId, ConsumerId>,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, display_name: String, notifier: Notifier) -> Self {
        Self {
            id,
            display_name,
            muted: false,
            speaking: false,
            state: SessionState::Active,
            notifier,
            send_transport: None,
            unbound_recv: HashSet::new(),
            recv_transports: HashMap::new(),
            producer: None,
            consumers: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            muted: self.muted,
            speaking: self.speaking,
        }
    }

    pub(crate) fn notify(&self, notification: Notification) -> bool {
        self.notifier.push(&self.id, notification)
    }

    #[must_use]
    pub const fn send_transport(&self) -> Option<&TransportId> {
        self.send_transport.as_ref()
    }

    #[must_use]
    pub const fn producer(&self) -> Option<&ProducerId> {
        self.producer.as_ref()
    }

    /// Consumer of a remote participant's producer
    #[must_use]
    pub fn consumer_for(&self, remote: &SessionId) -> Option<&ConsumerId> {
        self.consumers.get(remote)
    }

    pub(crate) fn add_transport(&mut self, id: TransportId, direction: Direction) {
        match direction {
            Direction::Send => self.send_transport = Some(id),
            Direction::Recv => {
                self.unbound_recv.insert(id);
            }
        }
    }

    /// Record that `transport` now carries `remote`'s audio
    pub(crate) fn bind_recv_transport(&mut self, remote: SessionId, transport: &TransportId) {
        self.unbound_recv.remove(transport);
        self.recv_transports.insert(remote, transport.clone());
    }

    pub(crate) fn set_producer(&mut self, producer: ProducerId) {
        self.producer = Some(producer);
    }

    pub(crate) fn take_producer(&mut self) -> Option<ProducerId> {
        self.producer.take()
    }

    pub(crate) fn add_consumer(&mut self, remote: SessionId, consumer: ConsumerId) {
        self.consumers.insert(remote, consumer);
    }

    /// Forget everything tied to a remote participant's producer
    ///
    /// Returns the consumer to close. The receive transport stays owned and
    /// goes back to the unbound pool once no other remote uses it.
    pub(crate) fn release_remote(&mut self, remote: &SessionId) -> Option<ConsumerId> {
        if let Some(transport) = self.recv_transports.remove(remote) {
            if !self.recv_transports.values().any(|other| other == &transport) {
                self.unbound_recv.insert(transport);
            }
        }
        self.consumers.remove(remote)
    }

    /// Every transport this session owns, in no particular order
    #[must_use]
    pub fn owned_transports(&self) -> Vec<TransportId> {
        let mut all: HashSet<TransportId> = self.unbound_recv.iter().cloned().collect();
        all.extend(self.recv_transports.values().cloned());
        all.extend(self.send_transport.iter().cloned());
        all.into_iter().collect()
    }

    /// Move to Closing and hand back every owned engine handle
    pub(crate) fn begin_close(&mut self) -> OwnedMedia {
        self.state = SessionState::Closing;
        let transports = self.owned_transports();
        self.send_transport = None;
        self.unbound_recv.clear();
        self.recv_transports.clear();
        OwnedMedia {
            transports,
            producer: self.producer.take(),
            consumers: self.consumers.drain().map(|(_, c)| c).collect(),
        }
    }

    pub(crate) fn finish_close(&mut self) {
        self.state = SessionState::Closed;
    }
}
