// Parley API Library
//
// Provides the HTTP surface and websocket signaling for Parley voice rooms

pub mod http;
pub mod signaling;

// Re-export commonly used types
pub use http::{create_router, AppState};
