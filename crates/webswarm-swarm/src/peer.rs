//! One logical connection attempt to a remote identity within a channel.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use webswarm_core::{
    ChannelId, ConnectionId, Identity, Result, TransportHandle, WebswarmError,
};

/// Lifecycle of a [`Peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Created,
    Connecting,
    Connected,
    Closed,
}

/// Why an attempt lost a race against another attempt for the same remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedeReason {
    /// Same directionality, the other attempt has the lower connection id.
    Duplicated,
    /// Opposite directionality, the other attempt was initiated by the lower identity.
    TieBreaker,
}

impl SupersedeReason {
    pub fn to_error(self, remote: Identity, channel: ChannelId) -> WebswarmError {
        match self {
            SupersedeReason::Duplicated => WebswarmError::ConnectionDuplicated { remote, channel },
            SupersedeReason::TieBreaker => WebswarmError::TieBreakerLost,
        }
    }
}

#[derive(Default)]
struct TransportSlot {
    handle: Option<Arc<dyn TransportHandle>>,
    disconnecting: bool,
}

/// Serializable snapshot of a peer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeerInfo {
    pub id: Identity,
    pub channel: ChannelId,
    pub connection_id: ConnectionId,
    pub initiator: bool,
    pub state: PeerState,
}

pub struct Peer {
    id: Identity,
    channel: ChannelId,
    connection_id: ConnectionId,
    initiator: bool,
    state: watch::Sender<PeerState>,
    transport: Mutex<TransportSlot>,
    superseded: Mutex<Option<SupersedeReason>>,
    was_connected: AtomicBool,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("connection_id", &self.connection_id)
            .field("initiator", &self.initiator)
            .field("state", &self.state())
            .finish()
    }
}

impl Peer {
    pub fn new(
        id: Identity,
        channel: ChannelId,
        connection_id: ConnectionId,
        initiator: bool,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(PeerState::Created);
        Arc::new(Self {
            id,
            channel,
            connection_id,
            initiator,
            state,
            transport: Mutex::new(TransportSlot::default()),
            superseded: Mutex::new(None),
            was_connected: AtomicBool::new(false),
        })
    }

    /// The remote identity.
    pub fn id(&self) -> Identity {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Whether this side created the connection.
    pub fn initiator(&self) -> bool {
        self.initiator
    }

    pub fn state(&self) -> PeerState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    /// Whether the peer ever reached `Connected`.
    pub fn was_connected(&self) -> bool {
        self.was_connected.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            channel: self.channel,
            connection_id: self.connection_id,
            initiator: self.initiator,
            state: self.state(),
        }
    }

    pub(crate) fn set_connecting(&self) {
        self.state.send_if_modified(|state| {
            if *state == PeerState::Created {
                *state = PeerState::Connecting;
                true
            } else {
                false
            }
        });
    }

    /// `Connecting → Connected`. False if the peer is anywhere else.
    pub(crate) fn mark_connected(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == PeerState::Connecting {
                *state = PeerState::Connected;
                true
            } else {
                false
            }
        });
        if changed {
            self.was_connected.store(true, Ordering::SeqCst);
        }
        changed
    }

    /// Enter `Closed`. True only for the call that made the transition.
    pub(crate) fn mark_closed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == PeerState::Closed {
                false
            } else {
                *state = PeerState::Closed;
                true
            }
        })
    }

    /// Attach the negotiated transport. Refused once set or once disconnecting.
    pub(crate) fn attach(&self, handle: Arc<dyn TransportHandle>) -> bool {
        let mut slot = self.transport.lock();
        if slot.disconnecting || slot.handle.is_some() {
            return false;
        }
        slot.handle = Some(handle);
        true
    }

    pub fn transport(&self) -> Option<Arc<dyn TransportHandle>> {
        self.transport.lock().handle.clone()
    }

    /// Record that this attempt lost a race. The first reason sticks.
    pub(crate) fn supersede(&self, reason: SupersedeReason) {
        let mut superseded = self.superseded.lock();
        if superseded.is_none() {
            *superseded = Some(reason);
        }
    }

    pub fn superseded(&self) -> Option<SupersedeReason> {
        *self.superseded.lock()
    }

    /// Tear the peer down. The first call destroys the transport and resolves
    /// once it is closed; later calls return immediately.
    pub async fn disconnect(&self) {
        let handle = {
            let mut slot = self.transport.lock();
            if slot.disconnecting {
                return;
            }
            slot.disconnecting = true;
            slot.handle.clone()
        };
        if let Some(handle) = handle {
            handle.destroy().await;
        }
        self.mark_closed();
    }

    /// Resolve once the peer is connected; fail if it closes first.
    pub async fn wait_for_connection(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = match rx
            .wait_for(|s| matches!(s, PeerState::Connected | PeerState::Closed))
            .await
        {
            Ok(state) => *state,
            Err(_) => PeerState::Closed,
        };
        if state == PeerState::Connected {
            return Ok(());
        }
        Err(match self.superseded() {
            Some(reason) => reason.to_error(self.id, self.channel),
            None => WebswarmError::ConnectionClosed,
        })
    }
}
