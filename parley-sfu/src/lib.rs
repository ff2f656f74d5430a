//! Parley SFU control plane
//!
//! Coordinates voice rooms on top of a selective-forwarding media engine.
//! The engine moves the audio; this crate decides who may create which
//! transport, producer or consumer, and tells room members about each other.
//!
//! ## Architecture
//!
//! - **`RoomRegistry`**: Owns every live room and the engine handle
//! - **`Room`**: Members plus id-keyed transport/producer/consumer tables
//! - **`Session`**: One participant and the engine objects it owns
//! - **`MediaEngine`**: Boundary to the media worker (`LocalEngine` in-process)
//! - **`Notifier`**: Bounded push queue of one member; only speaking updates are shed
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_sfu::{LocalEngine, LocalEngineConfig, Notifier, RoomRegistry, SfuConfig};
//!
//! let engine = Arc::new(LocalEngine::new(LocalEngineConfig::default())?);
//! let registry = RoomRegistry::new(SfuConfig::default(), engine);
//!
//! let (notifier, events) = Notifier::channel(256);
//! let participants = registry.join(&room_id, &session_id, "alice", notifier)?;
//! let params = registry.create_transport(&room_id, &session_id, None).await?;
//! ```

mod broadcast;
mod config;
pub mod engine;
mod error;
mod media;
mod presence;
mod registry;
mod room;
mod session;
mod types;

pub use broadcast::{Notification, NotificationReceiver, Notifier};
pub use config::SfuConfig;
pub use engine::{
    ConsumerParams, Direction, DtlsParameters, LocalEngine, LocalEngineConfig, MediaEngine,
    MediaKind, RtpCapabilities, RtpParameters, TransportParams,
};
pub use error::{EngineError, EngineResult, Result, SfuError};
pub use registry::{validate_room_id, RegistryStats, RoomRegistry, MAX_ROOM_ID_LEN};
pub use room::{Room, RoomStats};
pub use session::{OwnedMedia, SessionState};
pub use types::{ConsumerId, ParticipantInfo, ProducerId, RoomId, SessionId, TransportId};
