//! The point-to-point transport seam.
//!
//! The swarm never looks inside a transport; it only drives negotiation
//! (offer → accept → complete) through the signaling service and listens
//! for lifecycle events on the resulting handle.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;
use crate::types::{ChannelId, ConnectionId, Identity};

/// Everything a transport may want to know about one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub local: Identity,
    pub remote: Identity,
    pub channel: ChannelId,
    pub connection_id: ConnectionId,
    pub initiator: bool,
}

/// Lifecycle events reported by a transport handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The data channel is open.
    Connect,
    /// A non-fatal transport error.
    Error(String),
    /// The data channel is gone. Always the last event.
    Close,
}

/// Creates transport connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Initiator side: produce the signal payload carried by the offer.
    async fn offer(&self, ctx: &ConnectionContext) -> Result<serde_json::Value>;

    /// Target side: consume an offer, return the answer payload and a handle.
    async fn accept(
        &self,
        ctx: &ConnectionContext,
        offer: serde_json::Value,
    ) -> Result<(serde_json::Value, Arc<dyn TransportHandle>)>;

    /// Initiator side: finish negotiation with the target's answer.
    async fn complete(
        &self,
        ctx: &ConnectionContext,
        answer: serde_json::Value,
    ) -> Result<Arc<dyn TransportHandle>>;

    /// Initiator side: the offer was rejected or abandoned.
    async fn abort(&self, _ctx: &ConnectionContext) {}
}

/// A live (or closing) transport connection.
#[async_trait]
pub trait TransportHandle: Send + Sync + std::fmt::Debug {
    /// Take the event stream. Only the first call returns `Some`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    fn is_connected(&self) -> bool;

    /// Tear the connection down; resolves once the transport is closed.
    async fn destroy(&self);
}

pub mod memory {
    //! In-process transport for tests and demos.
    //!
    //! All [`MemoryTransport`]s created from one [`MemoryNetwork`] can reach
    //! each other. Both ends report `Connect` once the initiator completes the
    //! negotiation; destroying either end closes both.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct PendingPair {
        initiator: Arc<MemoryHandle>,
        acceptor: Arc<MemoryHandle>,
    }

    #[derive(Default)]
    struct NetworkState {
        pending: HashMap<ConnectionId, PendingPair>,
        accepted: HashMap<ConnectionId, Arc<MemoryHandle>>,
        refuse: bool,
    }

    /// Shared medium connecting memory transports.
    #[derive(Clone, Default)]
    pub struct MemoryNetwork {
        state: Arc<Mutex<NetworkState>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent `accept` fail.
        pub fn set_refuse(&self, refuse: bool) {
            self.state.lock().refuse = refuse;
        }

        pub fn transport(&self) -> Arc<MemoryTransport> {
            Arc::new(MemoryTransport {
                network: self.clone(),
            })
        }
    }

    pub struct MemoryTransport {
        network: MemoryNetwork,
    }

    fn signal_for(id: &ConnectionId) -> serde_json::Value {
        serde_json::json!({ "memory": id.to_hex() })
    }

    fn parse_signal(value: &serde_json::Value) -> Result<ConnectionId> {
        value["memory"]
            .as_str()
            .ok_or_else(|| crate::WebswarmError::Transport("malformed memory signal".into()))?
            .parse()
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn offer(&self, ctx: &ConnectionContext) -> Result<serde_json::Value> {
            let pair = Arc::new(PairState::default());
            let initiator = MemoryHandle::new(pair.clone(), 0);
            let acceptor = MemoryHandle::new(pair, 1);
            self.network
                .state
                .lock()
                .pending
                .insert(ctx.connection_id, PendingPair { initiator, acceptor });
            Ok(signal_for(&ctx.connection_id))
        }

        async fn accept(
            &self,
            ctx: &ConnectionContext,
            offer: serde_json::Value,
        ) -> Result<(serde_json::Value, Arc<dyn TransportHandle>)> {
            let id = parse_signal(&offer)?;
            let mut state = self.network.state.lock();
            if state.refuse {
                return Err(crate::WebswarmError::Transport("connection refused".into()));
            }
            let pair = state
                .pending
                .get(&id)
                .ok_or_else(|| crate::WebswarmError::Transport(format!("no pending offer {}", id.short())))?;
            let acceptor = pair.acceptor.clone();
            state.accepted.insert(id, acceptor.clone());
            Ok((
                signal_for(&ctx.connection_id),
                acceptor as Arc<dyn TransportHandle>,
            ))
        }

        async fn complete(
            &self,
            ctx: &ConnectionContext,
            answer: serde_json::Value,
        ) -> Result<Arc<dyn TransportHandle>> {
            let id = parse_signal(&answer)?;
            let pair = {
                let mut state = self.network.state.lock();
                state.accepted.remove(&id);
                state.pending.remove(&ctx.connection_id)
            }
            .ok_or_else(|| crate::WebswarmError::Transport("offer expired".into()))?;
            pair.initiator.pair.open();
            Ok(pair.initiator as Arc<dyn TransportHandle>)
        }

        async fn abort(&self, ctx: &ConnectionContext) {
            let pair = {
                let mut state = self.network.state.lock();
                state.accepted.remove(&ctx.connection_id);
                state.pending.remove(&ctx.connection_id)
            };
            if let Some(pair) = pair {
                pair.initiator.pair.close();
            }
        }
    }

    #[derive(Default)]
    struct PairState {
        connected: AtomicBool,
        closed: AtomicBool,
        sides: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl PairState {
        fn broadcast(&self, event: TransportEvent) {
            for tx in self.sides.lock().iter() {
                let _ = tx.send(event.clone());
            }
        }

        fn open(&self) {
            if self.closed.load(Ordering::SeqCst) || self.connected.swap(true, Ordering::SeqCst) {
                return;
            }
            self.broadcast(TransportEvent::Connect);
        }

        fn close(&self) {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.connected.store(false, Ordering::SeqCst);
            self.broadcast(TransportEvent::Close);
        }
    }

    pub struct MemoryHandle {
        pair: Arc<PairState>,
        side: usize,
        events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    }

    impl std::fmt::Debug for MemoryHandle {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MemoryHandle")
                .field("side", &self.side)
                .field("connected", &self.is_connected())
                .finish()
        }
    }

    impl MemoryHandle {
        fn new(pair: Arc<PairState>, side: usize) -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            pair.sides.lock().push(tx);
            Arc::new(Self {
                pair,
                side,
                events: Mutex::new(Some(rx)),
            })
        }
    }

    #[async_trait]
    impl TransportHandle for MemoryHandle {
        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
            self.events.lock().take()
        }

        fn is_connected(&self) -> bool {
            self.pair.connected.load(Ordering::SeqCst) && !self.pair.closed.load(Ordering::SeqCst)
        }

        async fn destroy(&self) {
            self.pair.close();
        }
    }
}
