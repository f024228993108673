//! # webswarm-cli
//!
//! Command-line interface for webswarm.
//!
//! ## Commands
//!
//! - `webswarm start`: Run the signaling service
//! - `webswarm config`: Show the effective configuration
//! - `webswarm doctor`: Validate the configuration
//! - `webswarm candidates <channel>`: Query channel membership

pub mod commands;

pub use commands::Cli;
