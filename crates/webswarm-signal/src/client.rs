//! The signaling client.
//!
//! A background driver owns the link to the signaling service: it pumps the
//! transaction channel's outbound queue onto the link, routes inbound frames,
//! and reconnects through the configured bootstrap URLs when the link drops.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use webswarm_config::SignalConfig;
use webswarm_core::protocol::*;
use webswarm_core::{
    ChannelId, ConnectionContext, ConnectionId, Identity, RejectCode, Result, Transport,
    TransportHandle, WebswarmError,
};

use crate::link::{Connector, Link};
use crate::transaction::TransactionChannel;

/// Events pushed by the signaling service, plus link state changes.
#[derive(Debug)]
pub enum SignalEvent {
    /// The link is up. `reconnected` is false only for the first link.
    Connected { reconnected: bool },
    /// The link dropped; the driver is about to reconnect.
    Disconnected,
    /// Membership of a channel, pushed after a `discover`.
    Discover(ChannelPeers),
    /// A remote peer offers a connection.
    Request(Request),
    /// Free-form message relayed by the service.
    Info(serde_json::Value),
}

/// What an outgoing offer is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferMetadata {
    pub channel: ChannelId,
    pub connection_id: ConnectionId,
}

fn discovery_payload(identity: Identity, channel: ChannelId) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(DiscoveryData { identity, channel })?)
}

pub struct SignalClient {
    identity: Identity,
    config: SignalConfig,
    channel: Arc<TransactionChannel>,
    /// Channels re-announced on every new link.
    announced: Arc<Mutex<HashSet<ChannelId>>>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SignalClient {
    /// Spawn the driver and return the client with its event stream.
    pub fn start(
        identity: Identity,
        config: SignalConfig,
        connector: Arc<dyn Connector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalEvent>) {
        let (channel, outbound) = TransactionChannel::new();
        let channel = Arc::new(channel);
        let announced = Arc::new(Mutex::new(HashSet::new()));
        let connected = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            identity,
            config: config.clone(),
            connector,
            channel: channel.clone(),
            announced: announced.clone(),
            connected: connected.clone(),
            events: events_tx,
            outbound,
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(driver.run());

        let client = Arc::new(Self {
            identity,
            config,
            channel,
            announced,
            connected,
            shutdown,
            driver: Mutex::new(Some(handle)),
        });
        (client, events_rx)
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Channels that will be re-announced after a reconnect.
    pub fn announced_channels(&self) -> Vec<ChannelId> {
        self.announced.lock().iter().copied().collect()
    }

    /// Announce presence on `channel`. The service answers with a `discover` push.
    ///
    /// While the link is down the announcement is deferred to the next link.
    pub fn discover(&self, channel: ChannelId) -> Result<()> {
        if self.channel.is_closed() {
            return Err(WebswarmError::SignalClosed);
        }
        self.announced.lock().insert(channel);
        if self.is_connected() {
            self.channel
                .emit(EVENT_DISCOVER, discovery_payload(self.identity, channel)?)?;
        }
        Ok(())
    }

    /// Fetch the current membership of `channel`.
    pub async fn candidates(&self, channel: ChannelId) -> Result<Vec<Identity>> {
        let reply = self
            .channel
            .call(
                EVENT_CANDIDATES,
                discovery_payload(self.identity, channel)?,
                self.config.transaction_timeout(),
            )
            .await?;
        let peers: ChannelPeers = serde_json::from_value(reply)?;
        Ok(peers.peers)
    }

    /// Leave `channel`. It is forgotten for re-announcement even if the
    /// service never acknowledges.
    pub async fn leave(&self, channel: ChannelId) -> Result<()> {
        self.announced.lock().remove(&channel);
        let reply = self
            .channel
            .call(
                EVENT_LEAVE,
                discovery_payload(self.identity, channel)?,
                self.config.transaction_timeout(),
            )
            .await?;
        let ack: LeaveAck = serde_json::from_value(reply)?;
        if ack.channel != channel {
            return Err(WebswarmError::Protocol(format!(
                "leave acknowledged for {} instead of {}",
                ack.channel.short(),
                channel.short()
            )));
        }
        Ok(())
    }

    /// Fire-and-forget message to the service.
    pub fn info(&self, payload: serde_json::Value) -> Result<()> {
        self.channel.emit(EVENT_INFO, payload)
    }

    /// Offer a connection to `remote` and complete it with the remote's answer.
    pub async fn connect(
        &self,
        remote: Identity,
        meta: OfferMetadata,
        transport: &dyn Transport,
    ) -> Result<Arc<dyn TransportHandle>> {
        let ctx = ConnectionContext {
            local: self.identity,
            remote,
            channel: meta.channel,
            connection_id: meta.connection_id,
            initiator: true,
        };
        let signal = transport.offer(&ctx).await?;
        let offer = Offer {
            initiator: self.identity,
            target: remote,
            channel: meta.channel,
            connection_id: meta.connection_id,
            signal,
        };

        let reply = match self.exchange_offer(&offer).await {
            Ok(reply) => reply,
            Err(e) => {
                transport.abort(&ctx).await;
                return Err(e);
            }
        };

        match reply {
            OfferReply::Accepted { signal } => transport.complete(&ctx, signal).await,
            OfferReply::Rejected { code, reason } => {
                debug!(peer = %remote, channel = %meta.channel.short(), %code, "offer rejected");
                transport.abort(&ctx).await;
                Err(WebswarmError::from_rejection(code, reason))
            }
        }
    }

    async fn exchange_offer(&self, offer: &Offer) -> Result<OfferReply> {
        let reply = self
            .channel
            .call(
                EVENT_OFFER,
                serde_json::to_value(offer)?,
                self.config.offer_timeout(),
            )
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Stop the driver. Pending and future calls fail with `SignalClosed`.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        self.channel.close();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
    }
}

/// An incoming connection offer awaiting a decision.
///
/// Dropping an unanswered request rejects it, so the initiator never has to
/// wait for its offer timeout.
pub struct Request {
    local: Identity,
    incoming: IncomingOffer,
    channel: Arc<TransactionChannel>,
    answered: AtomicBool,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("initiator", &self.initiator())
            .field("channel", &self.channel())
            .field("connection_id", &self.connection_id())
            .finish()
    }
}

impl Request {
    fn new(local: Identity, incoming: IncomingOffer, channel: Arc<TransactionChannel>) -> Self {
        Self {
            local,
            incoming,
            channel,
            answered: AtomicBool::new(false),
        }
    }

    pub fn initiator(&self) -> Identity {
        self.incoming.offer.initiator
    }

    pub fn channel(&self) -> ChannelId {
        self.incoming.offer.channel
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.incoming.offer.connection_id
    }

    /// Accept the offer: build the transport answer and send it back.
    pub async fn accept(&self, transport: &dyn Transport) -> Result<Arc<dyn TransportHandle>> {
        let ctx = ConnectionContext {
            local: self.local,
            remote: self.initiator(),
            channel: self.channel(),
            connection_id: self.connection_id(),
            initiator: false,
        };
        let (answer, handle) = match transport
            .accept(&ctx, self.incoming.offer.signal.clone())
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                self.reject(e.reject_code(), e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = self.answer(OfferReply::Accepted { signal: answer }) {
            handle.destroy().await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Reject the offer with a machine-readable code.
    pub fn reject(&self, code: RejectCode, reason: impl Into<String>) {
        let reply = OfferReply::Rejected {
            code,
            reason: reason.into(),
        };
        if let Err(e) = self.answer(reply) {
            debug!(error = %e, "could not send rejection");
        }
    }

    fn answer(&self, reply: OfferReply) -> Result<()> {
        if self.answered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let answer = Answer {
            initiator: self.initiator(),
            reply_to: self.incoming.reply_to.clone(),
            reply,
        };
        self.channel
            .emit(EVENT_ANSWER, serde_json::to_value(answer)?)
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.answered.load(Ordering::SeqCst) {
            self.reject(RejectCode::Transport, "offer dropped");
        }
    }
}

// ── Driver ─────────────────────────────────────────────────────

struct Driver {
    identity: Identity,
    config: SignalConfig,
    connector: Arc<dyn Connector>,
    channel: Arc<TransactionChannel>,
    announced: Arc<Mutex<HashSet<ChannelId>>>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SignalEvent>,
    outbound: mpsc::UnboundedReceiver<SignalMessage>,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown is requested or the client is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl Driver {
    async fn run(mut self) {
        let urls = self.config.bootstrap.clone();
        if urls.is_empty() {
            warn!("no signaling endpoints configured");
            shutdown_requested(&mut self.shutdown).await;
            self.channel.close();
            return;
        }

        let mut next = 0usize;
        let mut delay = self.config.reconnect_delay();
        let mut links = 0u64;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let url = &urls[next % urls.len()];
            next += 1;

            debug!(url = %url, "connecting to signaling service");
            let result = tokio::select! {
                r = self.connector.connect(url) => r,
                _ = shutdown_requested(&mut self.shutdown) => break,
            };
            let mut link = match result {
                Ok(link) => link,
                Err(e) => {
                    warn!(url = %url, error = %e, delay_ms = delay.as_millis() as u64, "signaling connect failed");
                    if self.pause(delay).await {
                        break;
                    }
                    delay = (delay * 2).min(self.config.max_reconnect_delay());
                    continue;
                }
            };

            delay = self.config.reconnect_delay();
            let reconnected = links > 0;
            links += 1;
            self.bring_up(&link);
            info!(url = %url, reconnected, "signaling link up");
            let _ = self.events.send(SignalEvent::Connected { reconnected });

            let stop = self.pump(&mut link).await;
            self.connected.store(false, Ordering::SeqCst);
            if stop {
                break;
            }

            warn!(url = %url, "signaling link lost");
            let _ = self.events.send(SignalEvent::Disconnected);
            if self.pause(delay).await {
                break;
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.channel.close();
        debug!("signal driver stopped");
    }

    /// Sleep for `delay`; true if shutdown was requested meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown_requested(&mut self.shutdown) => true,
        }
    }

    /// Mark the link up and re-announce every remembered channel.
    ///
    /// Frames queued while no link was up are discarded first: they were
    /// addressed to a session the service has already forgotten, and a stale
    /// `leave` flushed after the re-announcement would undo it. Calls waiting
    /// on them run into their timeout. The announced set stays locked
    /// throughout so a concurrent `discover` either lands in the re-announce
    /// or is sent after it.
    fn bring_up(&mut self, link: &Link) {
        let announced = self.announced.lock();
        let mut stale = 0usize;
        while self.outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded frames queued while disconnected");
        }
        self.connected.store(true, Ordering::SeqCst);
        for &channel in announced.iter() {
            match discovery_payload(self.identity, channel) {
                Ok(payload) => {
                    let _ = link.tx.send(SignalMessage::event(EVENT_DISCOVER, payload));
                }
                Err(e) => warn!(channel = %channel.short(), error = %e, "failed to re-announce"),
            }
        }
    }

    /// Shuttle frames until the link drops (false) or shutdown (true).
    async fn pump(&mut self, link: &mut Link) -> bool {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return true,
                out = self.outbound.recv() => match out {
                    Some(msg) => {
                        if link.tx.send(msg).is_err() {
                            return false;
                        }
                    }
                    None => return true,
                },
                inbound = link.rx.recv() => match inbound {
                    Some(msg) => self.route(msg),
                    None => return false,
                },
            }
        }
    }

    fn route(&self, msg: SignalMessage) {
        let Some(msg) = self.channel.dispatch(msg) else {
            return;
        };
        let event = match msg.event.as_str() {
            EVENT_DISCOVER => msg.decode::<ChannelPeers>().map(SignalEvent::Discover),
            EVENT_REQUEST => msg.decode::<IncomingOffer>().map(|incoming| {
                SignalEvent::Request(Request::new(self.identity, incoming, self.channel.clone()))
            }),
            EVENT_INFO => Ok(SignalEvent::Info(msg.payload.clone())),
            other => {
                debug!(event = other, "ignoring unknown signal event");
                return;
            }
        };
        match event {
            Ok(event) => {
                let _ = self.events.send(event);
            }
            Err(e) => warn!(event = %msg.event, error = %e, "malformed signal event"),
        }
    }
}
