//! # Signal hub
//!
//! The rendezvous service. Keeps channel membership per socket, answers
//! discovery traffic, and relays connection offers and answers between
//! sockets. The hub never looks at transport payloads.
//!
//! A socket is bound to an identity by the first frame that names one
//! (`discover`, `candidates`, `leave`, or the initiator of an `offer`).

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webswarm_core::protocol::*;
use webswarm_core::{ChannelId, Identity, RejectCode, TransactionId};
use webswarm_signal::Link;

use crate::metrics::Metrics;

/// Hub-local handle of one attached socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SocketId(u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

struct PendingOffer {
    initiator: SocketId,
    target: SocketId,
}

#[derive(Default)]
struct HubState {
    sockets: HashMap<SocketId, mpsc::UnboundedSender<SignalMessage>>,
    identities: HashMap<SocketId, Identity>,
    by_identity: HashMap<Identity, SocketId>,
    channels: HashMap<ChannelId, HashMap<SocketId, Identity>>,
    pending: HashMap<TransactionId, PendingOffer>,
}

impl HubState {
    fn send(&self, socket: SocketId, msg: SignalMessage) {
        match self.sockets.get(&socket) {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    debug!(%socket, "socket gone, frame dropped");
                }
            }
            None => debug!(%socket, event = %msg.event, "unknown socket, frame dropped"),
        }
    }

    fn bind(&mut self, socket: SocketId, identity: Identity) {
        if let Some(previous) = self.identities.insert(socket, identity) {
            if previous != identity && self.by_identity.get(&previous) == Some(&socket) {
                self.by_identity.remove(&previous);
            }
        }
        self.by_identity.insert(identity, socket);
    }

    fn members(&self, channel: &ChannelId) -> Vec<Identity> {
        let mut peers: Vec<Identity> = self
            .channels
            .get(channel)
            .map(|members| members.values().copied().collect())
            .unwrap_or_default();
        peers.sort();
        peers.dedup();
        peers
    }

    fn remove_member(&mut self, channel: &ChannelId, socket: SocketId) -> bool {
        let Some(members) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(&socket).is_some();
        if members.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }
}

/// Point-in-time view of the hub.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub sockets: usize,
    pub identities: usize,
    pub channels: usize,
    pub members: usize,
    pub pending_offers: usize,
}

/// In-process signaling service. Transports (WebSocket, in-memory) hand it
/// a [`Link`] per socket.
pub struct SignalHub {
    state: Mutex<HubState>,
    next_socket: AtomicU64,
    metrics: Metrics,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_socket: AtomicU64::new(1),
            metrics: Metrics::new(),
        }
    }
}

impl SignalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Inbound frames seen for `event`, across all sockets.
    pub fn event_count(&self, event: &str) -> u64 {
        self.metrics.event_count(event)
    }

    /// Attach the service side of a link and serve it until it closes.
    pub fn attach(self: &Arc<Self>, link: Link) -> SocketId {
        let socket = SocketId(self.next_socket.fetch_add(1, Ordering::Relaxed));
        let Link { tx, mut rx } = link;
        self.state.lock().sockets.insert(socket, tx);
        self.metrics.inc_sockets_opened();
        debug!(%socket, "socket attached");

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                hub.handle_message(socket, msg);
            }
            hub.disconnect(socket);
        });
        socket
    }

    /// Route one inbound frame.
    pub fn handle_message(&self, socket: SocketId, msg: SignalMessage) {
        self.metrics.record_event(&msg.event);
        let result = match msg.event.as_str() {
            EVENT_DISCOVER => msg.decode().map(|data| self.on_discover(socket, data)),
            EVENT_CANDIDATES => msg
                .decode()
                .map(|data| self.on_candidates(socket, msg.transaction_id.clone(), data)),
            EVENT_LEAVE => msg
                .decode()
                .map(|data| self.on_leave(socket, msg.transaction_id.clone(), data)),
            EVENT_OFFER => msg
                .decode()
                .map(|offer| self.on_offer(socket, msg.transaction_id.clone(), offer)),
            EVENT_ANSWER => msg.decode().map(|answer| self.on_answer(socket, answer)),
            EVENT_INFO => {
                debug!(%socket, payload = %msg.payload, "info");
                Ok(())
            }
            other => {
                debug!(%socket, event = other, "unknown event ignored");
                Ok(())
            }
        };
        if let Err(e) = result {
            self.metrics.inc_malformed_frames();
            warn!(%socket, event = %msg.event, error = %e, "malformed frame");
        }
    }

    fn on_discover(&self, socket: SocketId, data: DiscoveryData) {
        let mut state = self.state.lock();
        state.bind(socket, data.identity);
        state
            .channels
            .entry(data.channel)
            .or_default()
            .insert(socket, data.identity);
        let update = ChannelPeers {
            channel: data.channel,
            peers: state.members(&data.channel),
        };
        debug!(
            peer = %data.identity.short(),
            channel = %data.channel.short(),
            members = update.peers.len(),
            "discover"
        );
        match serde_json::to_value(update) {
            Ok(payload) => state.send(socket, SignalMessage::event(EVENT_DISCOVER, payload)),
            Err(e) => warn!(error = %e, "failed to encode discover reply"),
        }
    }

    fn on_candidates(&self, socket: SocketId, txn: Option<TransactionId>, data: DiscoveryData) {
        let Some(txn) = txn else {
            debug!(%socket, "candidates without transaction id");
            return;
        };
        let mut state = self.state.lock();
        state.bind(socket, data.identity);
        let reply = ChannelPeers {
            channel: data.channel,
            peers: state.members(&data.channel),
        };
        match serde_json::to_value(reply) {
            Ok(payload) => state.send(
                socket,
                SignalMessage::transaction(EVENT_CANDIDATES, txn, payload),
            ),
            Err(e) => warn!(error = %e, "failed to encode candidates reply"),
        }
    }

    fn on_leave(&self, socket: SocketId, txn: Option<TransactionId>, data: DiscoveryData) {
        let mut state = self.state.lock();
        state.bind(socket, data.identity);
        if state.remove_member(&data.channel, socket) {
            debug!(peer = %data.identity.short(), channel = %data.channel.short(), "leave");
        }
        let Some(txn) = txn else {
            return;
        };
        match serde_json::to_value(LeaveAck {
            channel: data.channel,
        }) {
            Ok(payload) => state.send(socket, SignalMessage::transaction(EVENT_LEAVE, txn, payload)),
            Err(e) => warn!(error = %e, "failed to encode leave ack"),
        }
    }

    fn on_offer(&self, socket: SocketId, txn: Option<TransactionId>, offer: Offer) {
        let Some(txn) = txn else {
            debug!(%socket, "offer without transaction id");
            return;
        };
        let mut state = self.state.lock();
        state.bind(socket, offer.initiator);

        let Some(target) = state.by_identity.get(&offer.target).copied() else {
            debug!(
                initiator = %offer.initiator.short(),
                target = %offer.target.short(),
                "offer to unknown peer rejected"
            );
            self.metrics.inc_offers_rejected();
            let reply = OfferReply::Rejected {
                code: RejectCode::PeerNotFound,
                reason: format!("peer {} is not connected to the service", offer.target),
            };
            match serde_json::to_value(reply) {
                Ok(payload) => state.send(socket, SignalMessage::transaction(EVENT_OFFER, txn, payload)),
                Err(e) => warn!(error = %e, "failed to encode offer rejection"),
            }
            return;
        };

        debug!(
            initiator = %offer.initiator.short(),
            target = %offer.target.short(),
            channel = %offer.channel.short(),
            "offer routed"
        );
        let incoming = IncomingOffer {
            offer,
            reply_to: txn.clone(),
        };
        match serde_json::to_value(incoming) {
            Ok(payload) => {
                state.pending.insert(
                    txn,
                    PendingOffer {
                        initiator: socket,
                        target,
                    },
                );
                state.send(target, SignalMessage::event(EVENT_REQUEST, payload));
                self.metrics.inc_offers_routed();
            }
            Err(e) => warn!(error = %e, "failed to encode incoming offer"),
        }
    }

    fn on_answer(&self, socket: SocketId, answer: Answer) {
        let mut state = self.state.lock();
        let Some(target) = state.pending.get(&answer.reply_to).map(|p| p.target) else {
            debug!(%socket, reply_to = %answer.reply_to, "answer for unknown offer dropped");
            self.metrics.inc_answers_dropped();
            return;
        };
        if target != socket {
            debug!(%socket, reply_to = %answer.reply_to, "answer from a socket the offer was not sent to dropped");
            self.metrics.inc_answers_dropped();
            return;
        }
        let Some(pending) = state.pending.remove(&answer.reply_to) else {
            return;
        };
        match serde_json::to_value(answer.reply) {
            Ok(payload) => state.send(
                pending.initiator,
                SignalMessage::transaction(EVENT_OFFER, answer.reply_to, payload),
            ),
            Err(e) => warn!(error = %e, "failed to encode offer reply"),
        }
    }

    /// Detach a socket: drop its membership, and reject offers still
    /// waiting on it. Safe to call more than once.
    pub fn disconnect(&self, socket: SocketId) {
        let mut state = self.state.lock();
        if state.sockets.remove(&socket).is_none() && !state.identities.contains_key(&socket) {
            return;
        }
        self.metrics.inc_sockets_closed();

        let identity = state.identities.remove(&socket);
        if let Some(identity) = identity {
            if state.by_identity.get(&identity) == Some(&socket) {
                state.by_identity.remove(&identity);
            }
        }
        let joined: Vec<ChannelId> = state
            .channels
            .iter()
            .filter(|(_, members)| members.contains_key(&socket))
            .map(|(channel, _)| *channel)
            .collect();
        for channel in &joined {
            state.remove_member(channel, socket);
        }

        let orphaned: Vec<(TransactionId, SocketId)> = state
            .pending
            .iter()
            .filter(|(_, p)| p.initiator == socket || p.target == socket)
            .map(|(txn, p)| (txn.clone(), p.initiator))
            .collect();
        for (txn, initiator) in orphaned {
            state.pending.remove(&txn);
            if initiator == socket {
                continue;
            }
            let reply = OfferReply::Rejected {
                code: RejectCode::PeerNotFound,
                reason: "target disconnected".into(),
            };
            if let Ok(payload) = serde_json::to_value(reply) {
                state.send(initiator, SignalMessage::transaction(EVENT_OFFER, txn, payload));
            }
        }

        match identity {
            Some(identity) => info!(
                %socket,
                peer = %identity.short(),
                channels = joined.len(),
                "socket disconnected"
            ),
            None => debug!(%socket, "anonymous socket disconnected"),
        }
    }

    /// Drop every socket, as a service restart would.
    pub fn disconnect_all(&self) {
        let sockets: Vec<SocketId> = self.state.lock().sockets.keys().copied().collect();
        for socket in sockets {
            self.disconnect(socket);
        }
    }

    /// Identities currently announced on `channel`.
    pub fn channel_members(&self, channel: &ChannelId) -> Vec<Identity> {
        self.state.lock().members(channel)
    }

    pub fn stats(&self) -> HubStats {
        let state = self.state.lock();
        HubStats {
            sockets: state.sockets.len(),
            identities: state.by_identity.len(),
            channels: state.channels.len(),
            members: state.channels.values().map(HashMap::len).sum(),
            pending_offers: state.pending.len(),
        }
    }
}
