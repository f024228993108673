//! # webswarm-config
//!
//! Configuration for swarm nodes and the signaling service. Reads from
//! `webswarm.toml` and environment variables, in that precedence order
//! (environment wins); CLI flags are applied on top by the caller.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    ConfigWarning, LoggingConfig, ServerConfig, SignalConfig, SwarmConfig, SwarmSettings,
    WarningSeverity,
};
