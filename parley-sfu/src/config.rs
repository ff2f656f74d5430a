//! Registry limits

use serde::{Deserialize, Serialize};

/// Limits enforced by the room registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum participants per room (0 = unlimited)
    pub max_participants: usize,
}
