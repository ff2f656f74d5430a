//! Signaling over websocket: wire protocol and per-connection gateway

pub mod gateway;
pub mod protocol;

pub use gateway::Connection;
pub use protocol::{decode, ClientFrame, Decoded, ReplyBody, Request, ServerFrame};
