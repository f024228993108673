//! # webswarm-core
//!
//! Shared vocabulary for the webswarm workspace: 32-byte keys, the unified
//! error type, the signaling wire format, the transport seam, and the event
//! bus used by the swarm coordinator.

pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod types;

pub use error::{RejectCode, Result, WebswarmError};
pub use event::EventBus;
pub use transport::{ConnectionContext, Transport, TransportEvent, TransportHandle};
pub use types::*;
