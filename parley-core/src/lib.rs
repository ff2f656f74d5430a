//! Shared configuration, logging and startup helpers for the Parley voice
//! room server.

pub mod bootstrap;
pub mod config;
pub mod logging;

pub use config::Config;
