use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChannelId, Identity};

/// Unified error type for the webswarm workspace.
#[derive(Error, Debug)]
pub enum WebswarmError {
    // ── Signaling ──────────────────────────────────────────────
    #[error("signal transaction timed out: {event}")]
    TransactionTimeout { event: String },

    #[error("signal client closed")]
    SignalClosed,

    #[error("signal protocol error: {0}")]
    Protocol(String),

    // ── Channel / degree ───────────────────────────────────────
    #[error("invalid channel: {0}")]
    InvalidChannel(ChannelId),

    #[error("remote rejected channel: {0}")]
    RemoteInvalidChannel(String),

    #[error("max peers reached: {0}")]
    MaxPeersReached(usize),

    #[error("remote max peers reached: {0}")]
    RemoteMaxPeersReached(String),

    // ── Connection races ───────────────────────────────────────
    #[error("connection duplicated: {remote} on {channel}")]
    ConnectionDuplicated { remote: Identity, channel: ChannelId },

    #[error("remote connection duplicated: {0}")]
    RemoteConnectionDuplicated(String),

    #[error("tie-breaker lost")]
    TieBreakerLost,

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("connection closed")]
    ConnectionClosed,

    // ── Transport ──────────────────────────────────────────────
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WebswarmError>;

/// Machine-readable reason attached to a rejected connection offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectCode {
    #[serde(rename = "ERR_INVALID_CHANNEL")]
    InvalidChannel,
    #[serde(rename = "ERR_MAX_PEERS_REACHED")]
    MaxPeersReached,
    #[serde(rename = "ERR_CONNECTION_DUPLICATED")]
    ConnectionDuplicated,
    #[serde(rename = "ERR_TIE_BREAKER")]
    TieBreaker,
    #[serde(rename = "ERR_PEER_NOT_FOUND")]
    PeerNotFound,
    #[serde(rename = "ERR_TRANSPORT")]
    Transport,
    #[serde(other, rename = "ERR_UNKNOWN")]
    Unknown,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::InvalidChannel => "ERR_INVALID_CHANNEL",
            RejectCode::MaxPeersReached => "ERR_MAX_PEERS_REACHED",
            RejectCode::ConnectionDuplicated => "ERR_CONNECTION_DUPLICATED",
            RejectCode::TieBreaker => "ERR_TIE_BREAKER",
            RejectCode::PeerNotFound => "ERR_PEER_NOT_FOUND",
            RejectCode::Transport => "ERR_TRANSPORT",
            RejectCode::Unknown => "ERR_UNKNOWN",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WebswarmError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            WebswarmError::TransactionTimeout { .. } => "ERR_TRANSACTION_TIMEOUT",
            WebswarmError::SignalClosed => "ERR_SIGNAL_CLOSED",
            WebswarmError::Protocol(_) => "ERR_PROTOCOL",
            WebswarmError::InvalidChannel(_) | WebswarmError::RemoteInvalidChannel(_) => "ERR_INVALID_CHANNEL",
            WebswarmError::MaxPeersReached(_) | WebswarmError::RemoteMaxPeersReached(_) => "ERR_MAX_PEERS_REACHED",
            WebswarmError::ConnectionDuplicated { .. } | WebswarmError::RemoteConnectionDuplicated(_) => {
                "ERR_CONNECTION_DUPLICATED"
            }
            WebswarmError::TieBreakerLost => "ERR_TIE_BREAKER",
            WebswarmError::PeerNotFound(_) => "ERR_PEER_NOT_FOUND",
            WebswarmError::ConnectionClosed => "ERR_CONNECTION_CLOSED",
            WebswarmError::Transport(_) => "ERR_TRANSPORT",
            WebswarmError::InvalidKey(_) => "ERR_INVALID_KEY",
            WebswarmError::Config(_) => "ERR_CONFIG",
            WebswarmError::Io(_) => "ERR_IO",
            WebswarmError::Serialization(_) => "ERR_SERIALIZATION",
            WebswarmError::Other(_) => "ERR_OTHER",
        }
    }

    /// The code to send back when this error rejects an incoming offer.
    pub fn reject_code(&self) -> RejectCode {
        match self {
            WebswarmError::InvalidChannel(_) | WebswarmError::RemoteInvalidChannel(_) => RejectCode::InvalidChannel,
            WebswarmError::MaxPeersReached(_) | WebswarmError::RemoteMaxPeersReached(_) => {
                RejectCode::MaxPeersReached
            }
            WebswarmError::ConnectionDuplicated { .. } | WebswarmError::RemoteConnectionDuplicated(_) => {
                RejectCode::ConnectionDuplicated
            }
            WebswarmError::TieBreakerLost => RejectCode::TieBreaker,
            WebswarmError::PeerNotFound(_) => RejectCode::PeerNotFound,
            _ => RejectCode::Transport,
        }
    }

    /// Rebuild a relayed rejection as a local error.
    pub fn from_rejection(code: RejectCode, reason: String) -> Self {
        match code {
            RejectCode::InvalidChannel => WebswarmError::RemoteInvalidChannel(reason),
            RejectCode::MaxPeersReached => WebswarmError::RemoteMaxPeersReached(reason),
            RejectCode::ConnectionDuplicated => WebswarmError::RemoteConnectionDuplicated(reason),
            RejectCode::TieBreaker => WebswarmError::TieBreakerLost,
            RejectCode::PeerNotFound => WebswarmError::PeerNotFound(reason),
            RejectCode::Transport | RejectCode::Unknown => WebswarmError::Transport(reason),
        }
    }

    /// Tie-breaker losses are expected outcomes of a race, not failures.
    pub fn is_tie_breaker(&self) -> bool {
        matches!(self, WebswarmError::TieBreakerLost)
    }

    /// Whether this error came from the remote side's rejection metadata.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            WebswarmError::RemoteInvalidChannel(_)
                | WebswarmError::RemoteMaxPeersReached(_)
                | WebswarmError::RemoteConnectionDuplicated(_)
                | WebswarmError::PeerNotFound(_)
        )
    }
}
