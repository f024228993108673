//! Wire format spoken between signal clients and the signaling service.
//!
//! Every frame is a JSON [`SignalMessage`]. Frames carrying a
//! `transaction_id` are requests or their replies; frames without one are
//! unsolicited events.

use serde::{Deserialize, Serialize};

use crate::error::RejectCode;
use crate::types::{ChannelId, ConnectionId, Identity, TransactionId};

pub const EVENT_DISCOVER: &str = "discover";
pub const EVENT_CANDIDATES: &str = "candidates";
pub const EVENT_LEAVE: &str = "leave";
pub const EVENT_INFO: &str = "info";
pub const EVENT_OFFER: &str = "offer";
pub const EVENT_REQUEST: &str = "request";
pub const EVENT_ANSWER: &str = "answer";

/// Envelope for every signaling frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SignalMessage {
    /// An unsolicited event (no transaction id).
    pub fn event(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            transaction_id: None,
            payload,
        }
    }

    /// A request or reply bound to a transaction.
    pub fn transaction(
        event: impl Into<String>,
        transaction_id: TransactionId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event: event.into(),
            transaction_id: Some(transaction_id),
            payload,
        }
    }

    /// Decode the payload into a typed structure.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// `{identity, channel}` body of `discover`, `candidates` and `leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryData {
    pub identity: Identity,
    pub channel: ChannelId,
}

/// Membership of a channel as seen by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPeers {
    pub channel: ChannelId,
    #[serde(default)]
    pub peers: Vec<Identity>,
}

/// Acknowledgement of a `leave` transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveAck {
    pub channel: ChannelId,
}

/// Connection offer sent by an initiator to a target through the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub initiator: Identity,
    pub target: Identity,
    pub channel: ChannelId,
    pub connection_id: ConnectionId,
    /// Opaque transport negotiation data.
    #[serde(default)]
    pub signal: serde_json::Value,
}

/// An offer as delivered to its target. `reply_to` is the initiator's
/// transaction id and must be echoed back in the [`Answer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingOffer {
    #[serde(flatten)]
    pub offer: Offer,
    pub reply_to: TransactionId,
}

/// Outcome of an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferReply {
    Accepted {
        #[serde(default)]
        signal: serde_json::Value,
    },
    Rejected { code: RejectCode, reason: String },
}

/// Target's answer to an [`IncomingOffer`], routed back to the initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub initiator: Identity,
    pub reply_to: TransactionId,
    pub reply: OfferReply,
}
