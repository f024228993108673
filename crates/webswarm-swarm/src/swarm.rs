//! The swarm coordinator.
//!
//! Joins channels, keeps their candidate lists, creates outgoing and accepts
//! incoming connections, breaks ties between racing attempts, and drives one
//! topology instance per channel through the repair scheduler.
//!
//! All coordinator state sits behind one mutex that is never held across an
//! `.await`; every inspect-then-mutate step is a single critical section.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use webswarm_config::{SignalConfig, SwarmConfig, SwarmSettings};
use webswarm_core::protocol::ChannelPeers;
use webswarm_core::{
    ChannelId, ConnectionId, EventBus, Identity, Result, Transport, TransportEvent,
    TransportHandle, WebswarmError,
};
use webswarm_signal::{Connector, OfferMetadata, Request, SignalClient, SignalEvent};

use crate::candidates::CandidateList;
use crate::peer::{Peer, SupersedeReason};
use crate::scheduler::Scheduler;
use crate::topology::{
    Topology, TopologyContext, TopologyFactory, TopologyHooks, XorTopologyFactory,
};

/// Events published by a [`Swarm`].
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// A peer finished connecting.
    Connection { peer: Arc<Peer> },
    /// A connected peer went away.
    ConnectionClosed { peer: Arc<Peer> },
    /// Non-fatal transport error on a peer.
    ConnectionError { peer: Arc<Peer>, error: String },
    /// An attempt to or from `remote` failed.
    ConnectFailed {
        remote: Identity,
        channel: ChannelId,
        code: &'static str,
        error: String,
    },
    /// Application-level error report for a failed attempt.
    Error {
        remote: Identity,
        channel: ChannelId,
        code: &'static str,
        error: String,
    },
    CandidatesUpdated {
        channel: ChannelId,
        candidates: Vec<Identity>,
    },
    /// The swarm was closed. Always the last event.
    Close,
}

/// Everything needed to start a [`Swarm`].
pub struct SwarmOptions {
    /// Random when unset.
    pub identity: Option<Identity>,
    pub settings: SwarmSettings,
    pub signal: SignalConfig,
    pub connector: Arc<dyn Connector>,
    pub transport: Arc<dyn Transport>,
    pub topology: Arc<dyn TopologyFactory>,
}

impl SwarmOptions {
    pub fn new(connector: Arc<dyn Connector>, transport: Arc<dyn Transport>) -> Self {
        Self {
            identity: None,
            settings: SwarmSettings::default(),
            signal: SignalConfig::default(),
            connector,
            transport,
            topology: Arc::new(XorTopologyFactory),
        }
    }

    pub fn from_config(
        config: &SwarmConfig,
        connector: Arc<dyn Connector>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Ok(Self {
            identity: config.identity()?,
            settings: config.swarm.clone(),
            signal: config.signal.clone(),
            ..Self::new(connector, transport)
        })
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_topology(mut self, topology: Arc<dyn TopologyFactory>) -> Self {
        self.topology = topology;
        self
    }
}

struct ChannelState {
    candidates: CandidateList,
    peers: HashMap<Identity, Arc<Peer>>,
    topology: Arc<dyn Topology>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    channels: HashMap<ChannelId, ChannelState>,
}

struct Inner {
    id: Identity,
    settings: SwarmSettings,
    signal: Arc<SignalClient>,
    transport: Arc<dyn Transport>,
    topologies: Arc<dyn TopologyFactory>,
    scheduler: Scheduler<ChannelId>,
    state: Mutex<State>,
    events: EventBus<SwarmEvent>,
    closed: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// A participant in any number of channels.
#[derive(Clone)]
pub struct Swarm {
    inner: Arc<Inner>,
}

impl Swarm {
    /// Start the signaling client and the event driver.
    pub fn start(options: SwarmOptions) -> Self {
        let id = options.identity.unwrap_or_else(Identity::random);
        let (signal, signal_events) = SignalClient::start(id, options.signal, options.connector);
        let inner = Arc::new(Inner {
            id,
            events: EventBus::new(options.settings.event_capacity.max(1)),
            settings: options.settings,
            signal,
            transport: options.transport,
            topologies: options.topology,
            scheduler: Scheduler::new(),
            state: Mutex::new(State::default()),
            closed: AtomicBool::new(false),
            driver: Mutex::new(None),
        });
        let driver = tokio::spawn(Inner::drive(Arc::downgrade(&inner), signal_events));
        *inner.driver.lock() = Some(driver);
        info!(id = %id.short(), "swarm started");
        Self { inner }
    }

    pub fn id(&self) -> Identity {
        self.inner.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.inner.events.subscribe()
    }

    pub fn signal(&self) -> &Arc<SignalClient> {
        &self.inner.signal
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.inner.state.lock().channels.keys().copied().collect()
    }

    /// Connected peers of `channel`.
    pub fn peers(&self, channel: ChannelId) -> Vec<Arc<Peer>> {
        self.inner
            .state
            .lock()
            .channels
            .get(&channel)
            .map(|ch| {
                ch.peers
                    .values()
                    .filter(|p| p.is_connected())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn candidates(&self, channel: ChannelId) -> Vec<Identity> {
        self.inner
            .state
            .lock()
            .channels
            .get(&channel)
            .map(|ch| ch.candidates.list())
            .unwrap_or_default()
    }

    /// Current re-arm delay of the channel's repair task.
    pub fn repair_delay(&self, channel: ChannelId) -> Option<Duration> {
        self.inner.scheduler.get(&channel).map(|task| task.delay())
    }

    /// Join `channel`. Joining a channel twice is a no-op.
    pub fn join(&self, channel: ChannelId) -> Result<()> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(WebswarmError::SignalClosed);
        }
        if inner.state.lock().channels.contains_key(&channel) {
            return Ok(());
        }

        let hooks = Arc::new(ChannelHooks {
            swarm: Arc::downgrade(inner),
            channel,
        });
        let topology = inner.topologies.create(TopologyContext {
            local: inner.id,
            channel,
            max_peers: inner.settings.max_peers,
            target_outgoing: inner.settings.target_outgoing,
            hooks,
        });

        {
            let mut state = inner.state.lock();
            if state.channels.contains_key(&channel) {
                drop(state);
                topology.destroy();
                return Ok(());
            }
            state.channels.insert(
                channel,
                ChannelState {
                    candidates: CandidateList::new(inner.settings.candidate_attempts),
                    peers: HashMap::new(),
                    topology,
                    closed: Arc::new(AtomicBool::new(false)),
                },
            );
        }

        let swarm = Arc::downgrade(inner);
        inner.scheduler.add_task(
            channel,
            move |_task| {
                let swarm = swarm.clone();
                async move {
                    match swarm.upgrade() {
                        Some(inner) => inner.repair(channel).await,
                        None => Ok(None),
                    }
                }
            },
            inner.settings.repair_interval(),
        );
        inner.scheduler.start(&channel);

        info!(channel = %channel.short(), "joined channel");
        if let Err(e) = inner.signal.discover(channel) {
            warn!(channel = %channel.short(), error = %e, "failed to announce channel");
        }
        Ok(())
    }

    /// Leave `channel`: stop its repair task, tell the service, and
    /// disconnect its peers. Leaving an unknown channel does nothing.
    pub async fn leave(&self, channel: ChannelId) -> Result<()> {
        let inner = &self.inner;
        let removed = inner.state.lock().channels.remove(&channel);
        let Some(state) = removed else {
            debug!(channel = %channel.short(), "leave ignored, channel not joined");
            return Ok(());
        };

        state.closed.store(true, Ordering::SeqCst);
        inner.scheduler.destroy(&channel);
        state.topology.destroy();

        if let Err(e) = inner.signal.leave(channel).await {
            debug!(channel = %channel.short(), error = %e, "leave not acknowledged");
        }
        for peer in state.peers.values() {
            peer.disconnect().await;
        }
        info!(channel = %channel.short(), peers = state.peers.len(), "left channel");
        Ok(())
    }

    /// Open a connection to `remote` on a joined channel.
    ///
    /// Topologies do this through their hooks; this entry point skips the
    /// candidate bookkeeping.
    pub async fn connect(&self, channel: ChannelId, remote: Identity) -> Result<Arc<Peer>> {
        self.inner.connect_to(channel, remote).await
    }

    /// Tear everything down. Emits `Close` exactly once.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let channels: Vec<ChannelState> = inner
            .state
            .lock()
            .channels
            .drain()
            .map(|(_, ch)| ch)
            .collect();
        inner.scheduler.clear();
        for ch in &channels {
            ch.closed.store(true, Ordering::SeqCst);
            ch.topology.destroy();
        }

        inner.signal.close().await;

        for ch in &channels {
            for peer in ch.peers.values() {
                let connected = peer.is_connected();
                peer.disconnect().await;
                if connected {
                    inner.publish(SwarmEvent::ConnectionClosed { peer: peer.clone() });
                }
            }
        }

        let driver = inner.driver.lock().take();
        if let Some(driver) = driver {
            driver.abort();
        }
        inner.publish(SwarmEvent::Close);
        info!(id = %inner.id.short(), "swarm closed");
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn publish(&self, event: SwarmEvent) {
        self.events.publish(event);
    }

    async fn drive(swarm: Weak<Inner>, mut events: mpsc::UnboundedReceiver<SignalEvent>) {
        while let Some(event) = events.recv().await {
            let Some(inner) = swarm.upgrade() else {
                break;
            };
            if inner.is_closed() {
                break;
            }
            match event {
                SignalEvent::Connected { reconnected } => {
                    debug!(reconnected, "signaling link up");
                    if reconnected {
                        inner.on_reconnected();
                    }
                }
                SignalEvent::Disconnected => debug!("signaling link down"),
                SignalEvent::Discover(update) => inner.on_discover(update),
                SignalEvent::Request(request) => {
                    tokio::spawn(inner.accept(request));
                }
                SignalEvent::Info(payload) => debug!(%payload, "signal info"),
            }
        }
    }

    // ── Candidates ─────────────────────────────────────────────

    fn on_discover(&self, update: ChannelPeers) {
        let channel = update.channel;
        let candidates = {
            let mut state = self.state.lock();
            let Some(ch) = state.channels.get_mut(&channel) else {
                debug!(channel = %channel.short(), "discover for unknown channel");
                return;
            };
            let changed = ch.candidates.replace(update.peers, self.id, Instant::now());
            changed.then(|| ch.candidates.list())
        };
        if let Some(candidates) = candidates {
            debug!(channel = %channel.short(), count = candidates.len(), "candidates pushed");
            self.publish(SwarmEvent::CandidatesUpdated {
                channel,
                candidates,
            });
        }
        if let Some(task) = self.scheduler.get(&channel) {
            task.trigger();
        }
    }

    /// Membership may have changed while the link was down: force fresh
    /// lookups and run every repair task now.
    fn on_reconnected(&self) {
        let channels: Vec<ChannelId> = {
            let mut state = self.state.lock();
            for ch in state.channels.values_mut() {
                ch.candidates.invalidate();
            }
            state.channels.keys().copied().collect()
        };
        for channel in channels {
            if let Some(task) = self.scheduler.get(&channel) {
                task.trigger();
            }
        }
    }

    async fn lookup(&self, channel: ChannelId) -> Vec<Identity> {
        {
            let mut state = self.state.lock();
            let Some(ch) = state.channels.get_mut(&channel) else {
                return Vec::new();
            };
            let now = Instant::now();
            if !ch
                .candidates
                .should_refresh(now, self.settings.lookup_debounce())
            {
                return ch.candidates.list();
            }
            ch.candidates.begin_refresh(now);
        }

        let fetched = self.signal.candidates(channel).await;

        let mut state = self.state.lock();
        let Some(ch) = state.channels.get_mut(&channel) else {
            return Vec::new();
        };
        match fetched {
            Ok(peers) => {
                let changed = ch.candidates.replace(peers, self.id, Instant::now());
                let list = ch.candidates.list();
                drop(state);
                debug!(channel = %channel.short(), count = list.len(), "candidates fetched");
                if changed {
                    self.publish(SwarmEvent::CandidatesUpdated {
                        channel,
                        candidates: list.clone(),
                    });
                }
                list
            }
            Err(e) => {
                ch.candidates.refresh_failed();
                let list = ch.candidates.list();
                drop(state);
                warn!(channel = %channel.short(), error = %e, "candidate lookup failed");
                list
            }
        }
    }

    fn drop_candidate(&self, channel: ChannelId, remote: &Identity) {
        let candidates = {
            let mut state = self.state.lock();
            let Some(ch) = state.channels.get_mut(&channel) else {
                return;
            };
            ch.candidates.record_failure(remote);
            ch.candidates.list()
        };
        self.publish(SwarmEvent::CandidatesUpdated {
            channel,
            candidates,
        });
    }

    fn degree(&self, channel: ChannelId) -> usize {
        self.state
            .lock()
            .channels
            .get(&channel)
            .map_or(0, |ch| ch.peers.len())
    }

    // ── Repair ─────────────────────────────────────────────────

    async fn repair(&self, channel: ChannelId) -> Result<Option<Duration>> {
        if self.is_closed() {
            return Ok(None);
        }
        let topology = match self.state.lock().channels.get(&channel) {
            Some(ch) => ch.topology.clone(),
            None => return Ok(None),
        };
        if !self.signal.is_connected() {
            debug!(channel = %channel.short(), "repair skipped, signaling link down");
            return Ok(None);
        }

        let outcome = topology.run().await?;
        debug!(
            channel = %channel.short(),
            candidates = outcome.candidates,
            attempted = outcome.attempted,
            connected = outcome.connected,
            "repair pass"
        );
        if outcome.is_idle() {
            Ok(Some(self.settings.relaxed_repair_interval()))
        } else {
            Ok(None)
        }
    }

    // ── Connection creation ────────────────────────────────────

    /// Validate, tie-break and register `peer` as connecting.
    ///
    /// Returns the channel's closed flag and the attempt this one superseded.
    fn register(&self, peer: &Arc<Peer>) -> Result<(Arc<AtomicBool>, Option<Arc<Peer>>)> {
        let channel = peer.channel();
        let remote = peer.id();
        if self.is_closed() {
            return Err(WebswarmError::InvalidChannel(channel));
        }

        let mut state = self.state.lock();
        let Some(ch) = state.channels.get_mut(&channel) else {
            return Err(WebswarmError::InvalidChannel(channel));
        };
        if ch.closed.load(Ordering::SeqCst) {
            return Err(WebswarmError::InvalidChannel(channel));
        }

        let existing = ch.peers.get(&remote).cloned();
        let degree = ch.peers.len() - usize::from(existing.is_some());
        if degree >= self.settings.max_peers {
            return Err(WebswarmError::MaxPeersReached(self.settings.max_peers));
        }

        let mut loser = None;
        if let Some(existing) = existing {
            if existing.connection_id() == peer.connection_id()
                || (peer.initiator() && existing.is_connected())
            {
                return Err(WebswarmError::ConnectionDuplicated { remote, channel });
            }

            let (new_wins, reason) = if existing.initiator() == peer.initiator() {
                (
                    peer.connection_id() < existing.connection_id(),
                    SupersedeReason::Duplicated,
                )
            } else {
                let initiated_by = |p: &Peer| if p.initiator() { self.id } else { p.id() };
                (
                    initiated_by(peer.as_ref()) < initiated_by(existing.as_ref()),
                    SupersedeReason::TieBreaker,
                )
            };
            if !new_wins {
                return Err(reason.to_error(remote, channel));
            }
            existing.supersede(reason);
            loser = Some(existing);
        }

        ch.peers.insert(remote, peer.clone());
        peer.set_connecting();
        Ok((ch.closed.clone(), loser))
    }

    /// Check the negotiated transport is still wanted and attach it.
    async fn settle(
        &self,
        peer: &Arc<Peer>,
        closed: &AtomicBool,
        negotiated: Result<Arc<dyn TransportHandle>>,
    ) -> Result<Arc<dyn TransportHandle>> {
        let handle = negotiated?;
        let abandoned = if closed.load(Ordering::SeqCst) || self.is_closed() {
            Some(WebswarmError::InvalidChannel(peer.channel()))
        } else if let Some(reason) = peer.superseded() {
            Some(reason.to_error(peer.id(), peer.channel()))
        } else if !peer.attach(handle.clone()) {
            Some(WebswarmError::ConnectionClosed)
        } else {
            None
        };
        if let Some(error) = abandoned {
            handle.destroy().await;
            return Err(error);
        }
        Ok(handle)
    }

    /// Clean up a failed attempt and report it. Returns `error` for propagation.
    fn fail(
        &self,
        peer: &Arc<Peer>,
        error: WebswarmError,
        request: Option<&Request>,
    ) -> WebswarmError {
        let channel = peer.channel();
        let remote = peer.id();
        self.forget(peer);
        peer.mark_closed();
        if let Some(request) = request {
            request.reject(error.reject_code(), error.to_string());
        }

        if error.is_tie_breaker() {
            debug!(channel = %channel.short(), peer = %remote.short(), initiator = peer.initiator(), "tie-breaker lost");
            return error;
        }
        if self.is_closed() {
            return error;
        }
        if error.is_remote() || matches!(error, WebswarmError::ConnectionDuplicated { .. }) {
            debug!(channel = %channel.short(), peer = %remote.short(), code = error.code(), "connection attempt refused");
        } else {
            warn!(channel = %channel.short(), peer = %remote.short(), error = %error, "connection attempt failed");
        }
        self.publish(SwarmEvent::ConnectFailed {
            remote,
            channel,
            code: error.code(),
            error: error.to_string(),
        });
        self.publish(SwarmEvent::Error {
            remote,
            channel,
            code: error.code(),
            error: error.to_string(),
        });
        error
    }

    /// Remove `peer` if it is still the one on record. True if removed.
    fn forget(&self, peer: &Arc<Peer>) -> bool {
        let mut state = self.state.lock();
        let Some(ch) = state.channels.get_mut(&peer.channel()) else {
            return false;
        };
        if ch
            .peers
            .get(&peer.id())
            .is_some_and(|current| Arc::ptr_eq(current, peer))
        {
            ch.peers.remove(&peer.id());
            return true;
        }
        false
    }

    async fn connect_to(self: &Arc<Self>, channel: ChannelId, remote: Identity) -> Result<Arc<Peer>> {
        let peer = Peer::new(remote, channel, ConnectionId::random(), true);
        let (closed, loser) = match self.register(&peer) {
            Ok(registered) => registered,
            Err(e) => return Err(self.fail(&peer, e, None)),
        };
        if let Some(loser) = loser {
            loser.disconnect().await;
        }

        debug!(channel = %channel.short(), peer = %remote.short(), "connecting");
        let meta = OfferMetadata {
            channel,
            connection_id: peer.connection_id(),
        };
        let negotiated = self
            .signal
            .connect(remote, meta, self.transport.as_ref())
            .await;
        let handle = match self.settle(&peer, &closed, negotiated).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(&peer, e, None)),
        };
        self.bind(&peer, handle);

        match tokio::time::timeout(self.settings.connect_timeout(), peer.wait_for_connection()).await
        {
            Ok(Ok(())) => Ok(peer),
            Ok(Err(e)) => Err(self.fail(&peer, e, None)),
            Err(_) => {
                peer.disconnect().await;
                Err(self.fail(&peer, WebswarmError::ConnectionClosed, None))
            }
        }
    }

    async fn accept(self: Arc<Self>, request: Request) {
        let peer = Peer::new(
            request.initiator(),
            request.channel(),
            request.connection_id(),
            false,
        );
        debug!(channel = %peer.channel().short(), peer = %peer.id().short(), "incoming offer");

        let topology = match self.admit(&peer) {
            Ok(topology) => topology,
            Err(e) => {
                self.fail(&peer, e, Some(&request));
                return;
            }
        };
        let (closed, loser) = match self.register(&peer) {
            Ok(registered) => registered,
            Err(e) => {
                self.fail(&peer, e, Some(&request));
                return;
            }
        };
        if let Some(loser) = loser {
            loser.disconnect().await;
        }

        let negotiated = request.accept(self.transport.as_ref()).await;
        let handle = match self.settle(&peer, &closed, negotiated).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(&peer, e, Some(&request));
                return;
            }
        };
        self.bind(&peer, handle);
        topology.add_connection(peer);
    }

    /// The topology's say on an incoming attempt. A remote that already has an
    /// attempt on record goes straight to tie-breaking.
    fn admit(&self, peer: &Arc<Peer>) -> Result<Arc<dyn Topology>> {
        let (topology, has_attempt) = match self.state.lock().channels.get(&peer.channel()) {
            Some(ch) => (ch.topology.clone(), ch.peers.contains_key(&peer.id())),
            None => return Err(WebswarmError::InvalidChannel(peer.channel())),
        };
        if !has_attempt && !topology.should_handle_incoming() {
            return Err(WebswarmError::MaxPeersReached(self.settings.max_peers));
        }
        Ok(topology)
    }

    // ── Transport events ───────────────────────────────────────

    fn bind(self: &Arc<Self>, peer: &Arc<Peer>, handle: Arc<dyn TransportHandle>) {
        let Some(mut events) = handle.take_events() else {
            warn!(peer = %peer.id().short(), "transport events already taken");
            return;
        };
        let swarm = Arc::downgrade(self);
        let peer = peer.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = swarm.upgrade() else {
                    return;
                };
                match event {
                    TransportEvent::Connect => inner.on_transport_connect(&peer).await,
                    TransportEvent::Error(error) => {
                        debug!(peer = %peer.id().short(), error = %error, "transport error");
                        inner.publish(SwarmEvent::ConnectionError {
                            peer: peer.clone(),
                            error,
                        });
                    }
                    TransportEvent::Close => break,
                }
            }
            if let Some(inner) = swarm.upgrade() {
                inner.on_transport_close(&peer);
            }
        });
    }

    async fn on_transport_connect(&self, peer: &Arc<Peer>) {
        let connected = {
            let state = self.state.lock();
            let current = !self.is_closed()
                && peer.superseded().is_none()
                && state.channels.get(&peer.channel()).is_some_and(|ch| {
                    ch.peers
                        .get(&peer.id())
                        .is_some_and(|p| Arc::ptr_eq(p, peer))
                });
            if current && peer.mark_connected() {
                self.publish(SwarmEvent::Connection { peer: peer.clone() });
                true
            } else {
                false
            }
        };
        if connected {
            info!(
                channel = %peer.channel().short(),
                peer = %peer.id().short(),
                initiator = peer.initiator(),
                "peer connected"
            );
        } else if !peer.is_connected() {
            peer.disconnect().await;
        }
    }

    fn on_transport_close(&self, peer: &Arc<Peer>) {
        peer.mark_closed();
        let removed = self.forget(peer);
        {
            let _state = self.state.lock();
            if self.is_closed() {
                return;
            }
            if peer.was_connected() {
                self.publish(SwarmEvent::ConnectionClosed { peer: peer.clone() });
            }
        }
        if peer.was_connected() {
            info!(channel = %peer.channel().short(), peer = %peer.id().short(), "peer disconnected");
        } else {
            debug!(channel = %peer.channel().short(), peer = %peer.id().short(), "transport closed before connecting");
        }
        if removed {
            if let Some(task) = self.scheduler.get(&peer.channel()) {
                task.trigger();
            }
        }
    }
}

/// Hooks handed to a channel's topology.
struct ChannelHooks {
    swarm: Weak<Inner>,
    channel: ChannelId,
}

#[async_trait]
impl TopologyHooks for ChannelHooks {
    async fn lookup(&self) -> Vec<Identity> {
        match self.swarm.upgrade() {
            Some(inner) => inner.lookup(self.channel).await,
            None => Vec::new(),
        }
    }

    async fn connect(&self, remote: Identity) -> Result<Arc<Peer>> {
        let inner = self
            .swarm
            .upgrade()
            .ok_or(WebswarmError::InvalidChannel(self.channel))?;
        let result = inner.connect_to(self.channel, remote).await;
        if result.is_err() {
            inner.drop_candidate(self.channel, &remote);
        }
        result
    }

    fn degree(&self) -> usize {
        self.swarm
            .upgrade()
            .map_or(0, |inner| inner.degree(self.channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webswarm_core::KEY_LEN;
    use webswarm_core::transport::memory::MemoryNetwork;
    use webswarm_server::MemoryConnector;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    /// A swarm that never reaches a signaling service; enough to drive
    /// registration directly.
    fn offline(local: u8, max_peers: usize) -> Swarm {
        let settings = SwarmSettings {
            max_peers,
            ..Default::default()
        };
        let options = SwarmOptions {
            settings,
            ..SwarmOptions::new(
                Arc::new(MemoryConnector::new()),
                MemoryNetwork::new().transport(),
            )
        }
        .with_identity(Identity::from_bytes(key(local)));
        Swarm::start(options)
    }

    #[tokio::test]
    async fn test_same_direction_lower_connection_id_wins() {
        let swarm = offline(5, 4);
        let channel = ChannelId::from_name("t");
        swarm.join(channel).unwrap();
        let remote = Identity::from_bytes(key(9));

        let high = Peer::new(remote, channel, ConnectionId::from_bytes(key(0xf0)), true);
        let low = Peer::new(remote, channel, ConnectionId::from_bytes(key(0x01)), true);
        assert!(swarm.inner.register(&high).unwrap().1.is_none());
        let (_, loser) = swarm.inner.register(&low).unwrap();
        assert!(Arc::ptr_eq(&loser.unwrap(), &high));
        assert_eq!(high.superseded(), Some(SupersedeReason::Duplicated));

        let later = Peer::new(remote, channel, ConnectionId::from_bytes(key(0x80)), true);
        let err = swarm.inner.register(&later).err().unwrap();
        assert!(matches!(err, WebswarmError::ConnectionDuplicated { .. }));
        swarm.close().await;
    }

    #[tokio::test]
    async fn test_opposite_direction_lower_identity_wins() {
        let channel = ChannelId::from_name("t");

        // Local is lower: our outgoing attempt beats their incoming one.
        let swarm = offline(1, 4);
        swarm.join(channel).unwrap();
        let remote = Identity::from_bytes(key(2));
        let incoming = Peer::new(remote, channel, ConnectionId::random(), false);
        let outgoing = Peer::new(remote, channel, ConnectionId::random(), true);
        swarm.inner.register(&incoming).unwrap();
        let (_, loser) = swarm.inner.register(&outgoing).unwrap();
        assert!(Arc::ptr_eq(&loser.unwrap(), &incoming));
        assert_eq!(incoming.superseded(), Some(SupersedeReason::TieBreaker));
        swarm.close().await;

        // Local is higher: our outgoing attempt loses to theirs.
        let swarm = offline(3, 4);
        swarm.join(channel).unwrap();
        let incoming = Peer::new(remote, channel, ConnectionId::random(), false);
        let outgoing = Peer::new(remote, channel, ConnectionId::random(), true);
        swarm.inner.register(&incoming).unwrap();
        let err = swarm.inner.register(&outgoing).err().unwrap();
        assert!(err.is_tie_breaker());
        assert!(incoming.superseded().is_none());
        swarm.close().await;
    }

    #[tokio::test]
    async fn test_connected_peer_blocks_outgoing_attempt() {
        let swarm = offline(1, 4);
        let channel = ChannelId::from_name("t");
        swarm.join(channel).unwrap();
        let remote = Identity::from_bytes(key(2));
        let existing = Peer::new(remote, channel, ConnectionId::random(), false);
        swarm.inner.register(&existing).unwrap();
        assert!(existing.mark_connected());

        let outgoing = Peer::new(remote, channel, ConnectionId::random(), true);
        let err = swarm.inner.register(&outgoing).err().unwrap();
        assert!(matches!(err, WebswarmError::ConnectionDuplicated { .. }));
        assert!(existing.superseded().is_none());
        swarm.close().await;
    }

    #[tokio::test]
    async fn test_degree_bound_excludes_same_remote() {
        let swarm = offline(1, 1);
        let channel = ChannelId::from_name("t");
        swarm.join(channel).unwrap();
        let first = Identity::from_bytes(key(2));
        let peer = Peer::new(first, channel, ConnectionId::from_bytes(key(0x10)), false);
        swarm.inner.register(&peer).unwrap();

        let other = Peer::new(
            Identity::from_bytes(key(3)),
            channel,
            ConnectionId::random(),
            false,
        );
        let err = swarm.inner.register(&other).err().unwrap();
        assert!(matches!(err, WebswarmError::MaxPeersReached(1)));

        // A second attempt for the same remote is a race, not a new peer.
        let retry = Peer::new(first, channel, ConnectionId::from_bytes(key(0x01)), false);
        assert!(swarm.inner.register(&retry).unwrap().1.is_some());
        swarm.close().await;
    }

    #[tokio::test]
    async fn test_register_requires_joined_channel() {
        let swarm = offline(1, 4);
        let channel = ChannelId::from_name("t");
        let peer = Peer::new(Identity::random(), channel, ConnectionId::random(), true);
        let err = swarm.inner.register(&peer).err().unwrap();
        assert!(matches!(err, WebswarmError::InvalidChannel(c) if c == channel));
        swarm.close().await;
    }

    #[tokio::test]
    async fn test_join_after_close_fails() {
        let swarm = offline(1, 4);
        swarm.close().await;
        assert!(swarm.is_closed());
        let err = swarm.join(ChannelId::from_name("t")).unwrap_err();
        assert_eq!(err.code(), "ERR_SIGNAL_CLOSED");
        // Closing twice is a no-op.
        swarm.close().await;
    }
}
