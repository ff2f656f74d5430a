//! Common types used throughout the SFU implementation

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of one signaling connection's participant
    SessionId
);
string_id!(
    /// Identifier of a voice room
    RoomId
);
string_id!(
    /// Identifier of an engine transport
    TransportId
);
string_id!(
    /// Identifier of an engine producer
    ProducerId
);
string_id!(
    /// Identifier of an engine consumer
    ConsumerId
);

impl SessionId {
    /// Generate a fresh random session id
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    /// Name shown for participants that did not supply one
    #[must_use]
    pub fn anonymous_name(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("User {prefix}")
    }
}

/// Public view of a room member, as returned by `join-room`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: SessionId,
    pub display_name: String,
    pub muted: bool,
    pub speaking: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 21);
    }

    #[test]
    fn test_anonymous_name_uses_id_prefix() {
        let id = SessionId::from("abcdefgh");
        assert_eq!(id.anonymous_name(), "User abcd");
    }

    #[test]
    fn test_participant_info_wire_shape() {
        let info = ParticipantInfo {
            id: SessionId::from("s1"),
            display_name: "alice".to_string(),
            muted: true,
            speaking: false,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "s1", "displayName": "alice", "muted": true, "speaking": false})
        );
    }
}
