//! The topology seam.
//!
//! A topology instance owns the policy for one channel: which candidates to
//! connect to and whether incoming connections are welcome. The coordinator
//! hands it a set of hooks and asks it to run one repair pass at a time.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use webswarm_core::{ChannelId, Identity, Result};

use crate::peer::{Peer, PeerState};

/// Callbacks from a topology into the coordinator, bound to one channel.
#[async_trait]
pub trait TopologyHooks: Send + Sync {
    /// Current candidates, refreshed from the signaling service when stale.
    async fn lookup(&self) -> Vec<Identity>;

    /// Open an outgoing connection. Resolves once the peer is connected.
    async fn connect(&self, remote: Identity) -> Result<Arc<Peer>>;

    /// Peers on record for the channel, connecting ones included.
    fn degree(&self) -> usize;
}

/// Summary of one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Candidates considered.
    pub candidates: usize,
    /// Connections attempted.
    pub attempted: usize,
    /// Connections established.
    pub connected: usize,
}

impl RunOutcome {
    /// A pass that attempted nothing did no useful work.
    pub fn is_idle(&self) -> bool {
        self.attempted == 0
    }
}

#[async_trait]
pub trait Topology: Send + Sync {
    /// Track an incoming connection.
    fn add_connection(&self, peer: Arc<Peer>);

    /// Whether an incoming connection should be accepted.
    fn should_handle_incoming(&self) -> bool;

    /// One repair pass.
    async fn run(&self) -> Result<RunOutcome>;

    fn destroy(&self);
}

/// Everything a topology instance is created with.
#[derive(Clone)]
pub struct TopologyContext {
    pub local: Identity,
    pub channel: ChannelId,
    pub max_peers: usize,
    pub target_outgoing: usize,
    pub hooks: Arc<dyn TopologyHooks>,
}

pub trait TopologyFactory: Send + Sync {
    fn create(&self, ctx: TopologyContext) -> Arc<dyn Topology>;
}

impl<F> TopologyFactory for F
where
    F: Fn(TopologyContext) -> Arc<dyn Topology> + Send + Sync,
{
    fn create(&self, ctx: TopologyContext) -> Arc<dyn Topology> {
        self(ctx)
    }
}

// ── XorTopology ────────────────────────────────────────────────

/// Connects to the closest candidates by xor distance until the outgoing
/// target is met, never beyond `max_peers`.
///
/// Every node preferring its xor-neighbours yields a connected overlay with
/// bounded degree without any coordination beyond the candidate lists.
pub struct XorTopology {
    ctx: TopologyContext,
    connections: Mutex<HashMap<Identity, Arc<Peer>>>,
    destroyed: AtomicBool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XorTopologyFactory;

impl TopologyFactory for XorTopologyFactory {
    fn create(&self, ctx: TopologyContext) -> Arc<dyn Topology> {
        Arc::new(XorTopology::new(ctx))
    }
}

/// Bytewise xor of two keys; compares like the distance it encodes.
pub fn xor_distance(a: &Identity, b: &Identity) -> [u8; webswarm_core::KEY_LEN] {
    let mut out = [0u8; webswarm_core::KEY_LEN];
    for (i, (x, y)) in a.as_bytes().iter().zip(b.as_bytes()).enumerate() {
        out[i] = x ^ y;
    }
    out
}

impl XorTopology {
    pub fn new(ctx: TopologyContext) -> Self {
        Self {
            ctx,
            connections: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    fn prune(&self) {
        self.connections
            .lock()
            .retain(|_, peer| peer.state() != PeerState::Closed);
    }

    fn outgoing(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|p| p.initiator())
            .count()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Topology for XorTopology {
    fn add_connection(&self, peer: Arc<Peer>) {
        if self.is_destroyed() {
            return;
        }
        self.prune();
        self.connections.lock().insert(peer.id(), peer);
    }

    fn should_handle_incoming(&self) -> bool {
        !self.is_destroyed() && self.ctx.hooks.degree() < self.ctx.max_peers
    }

    async fn run(&self) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();
        if self.is_destroyed() {
            return Ok(outcome);
        }
        self.prune();

        let target = self.ctx.target_outgoing.min(self.ctx.max_peers);
        let mut outgoing = self.outgoing();
        if outgoing >= target {
            return Ok(outcome);
        }

        let mut candidates = self.ctx.hooks.lookup().await;
        {
            let connections = self.connections.lock();
            candidates.retain(|id| *id != self.ctx.local && !connections.contains_key(id));
        }
        candidates.sort_by_key(|id| xor_distance(&self.ctx.local, id));
        outcome.candidates = candidates.len();

        for remote in candidates {
            if self.is_destroyed()
                || outgoing >= target
                || self.ctx.hooks.degree() >= self.ctx.max_peers
            {
                break;
            }
            outcome.attempted += 1;
            match self.ctx.hooks.connect(remote).await {
                Ok(peer) => {
                    self.connections.lock().insert(remote, peer);
                    outgoing += 1;
                    outcome.connected += 1;
                }
                Err(e) => {
                    debug!(channel = %self.ctx.channel.short(), peer = %remote.short(), error = %e, "topology connect failed");
                }
            }
        }
        Ok(outcome)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.connections.lock().clear();
    }
}
