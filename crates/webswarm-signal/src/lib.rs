//! # webswarm-signal
//!
//! Client side of the signaling protocol. Presence announcements, channel
//! membership lookups and connection offers travel as JSON frames to a
//! rendezvous service; request/response pairs are correlated by transaction
//! id and bounded by a deadline.

pub mod client;
pub mod link;
pub mod transaction;

pub use client::{OfferMetadata, Request, SignalClient, SignalEvent};
pub use link::{Connector, Link, WsConnector};
pub use transaction::TransactionChannel;
