//! Request/response over a duplex event channel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use webswarm_core::protocol::SignalMessage;
use webswarm_core::{Result, TransactionId, WebswarmError, new_transaction_id};

/// Turns request/response exchanges with the signaling service into futures.
///
/// Outbound frames go to a queue drained by whoever owns the current link;
/// inbound frames are fed back through [`TransactionChannel::dispatch`].
pub struct TransactionChannel {
    pending: Mutex<HashMap<TransactionId, oneshot::Sender<serde_json::Value>>>,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    closed: AtomicBool,
}

impl TransactionChannel {
    /// Create a channel and the receiving end of its outbound queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                pending: Mutex::new(HashMap::new()),
                outbound,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Send a request and wait for the reply carrying the same transaction id.
    pub async fn call(
        &self,
        event: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if self.is_closed() {
            return Err(WebswarmError::SignalClosed);
        }

        let id = new_transaction_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        trace!(event, transaction = %id, "signal call");
        let msg = SignalMessage::transaction(event, id.clone(), payload);
        if self.outbound.send(msg).is_err() {
            self.pending.lock().remove(&id);
            return Err(WebswarmError::SignalClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Resolver dropped: the channel was closed underneath us.
            Ok(Err(_)) => Err(WebswarmError::SignalClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(WebswarmError::TransactionTimeout {
                    event: event.to_string(),
                })
            }
        }
    }

    /// Send an unsolicited event (no transaction id, no reply).
    pub fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if self.is_closed() {
            return Err(WebswarmError::SignalClosed);
        }
        self.outbound
            .send(SignalMessage::event(event, payload))
            .map_err(|_| WebswarmError::SignalClosed)
    }

    /// Route one inbound frame.
    ///
    /// Replies settle their pending call and return `None`. Frames without a
    /// transaction id are unsolicited events and are handed back to the caller.
    pub fn dispatch(&self, msg: SignalMessage) -> Option<SignalMessage> {
        let Some(id) = msg.transaction_id.as_ref() else {
            return Some(msg);
        };
        let resolver = self.pending.lock().remove(id);
        match resolver {
            Some(tx) => {
                let _ = tx.send(msg.payload);
            }
            None => {
                debug!(event = %msg.event, transaction = %id, "dropping reply to unknown transaction");
            }
        }
        None
    }

    /// Fail every pending call with `SignalClosed` and refuse new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the resolvers wakes the callers.
        self.pending.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reply_to(msg: &SignalMessage, payload: serde_json::Value) -> SignalMessage {
        SignalMessage::transaction(
            msg.event.clone(),
            msg.transaction_id.clone().unwrap(),
            payload,
        )
    }

    #[tokio::test]
    async fn test_call_resolves_with_matching_reply() {
        let (channel, mut outbound) = TransactionChannel::new();
        let channel = Arc::new(channel);

        let caller = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel
                    .call("candidates", serde_json::json!({}), Duration::from_secs(5))
                    .await
            })
        };

        let sent = outbound.recv().await.unwrap();
        assert_eq!(sent.event, "candidates");
        assert!(channel.dispatch(reply_to(&sent, serde_json::json!({"ok": true}))).is_none());

        let reply = caller.await.unwrap().unwrap();
        assert_eq!(reply["ok"], true);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_removes_pending() {
        let (channel, mut outbound) = TransactionChannel::new();
        let err = channel
            .call("leave", serde_json::Value::Null, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_TRANSACTION_TIMEOUT");
        assert_eq!(channel.pending_count(), 0);

        // A late reply is dropped quietly.
        let sent = outbound.recv().await.unwrap();
        assert!(channel.dispatch(reply_to(&sent, serde_json::Value::Null)).is_none());
    }

    #[tokio::test]
    async fn test_unsolicited_events_are_returned() {
        let (channel, _outbound) = TransactionChannel::new();
        let msg = SignalMessage::event("discover", serde_json::json!({"peers": []}));
        let routed = channel.dispatch(msg.clone());
        assert_eq!(routed, Some(msg));
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (channel, mut outbound) = TransactionChannel::new();
        let channel = Arc::new(channel);
        let caller = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel
                    .call("offer", serde_json::Value::Null, Duration::from_secs(30))
                    .await
            })
        };
        outbound.recv().await.unwrap();
        channel.close();

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, WebswarmError::SignalClosed));
        assert!(channel.emit("info", serde_json::Value::Null).is_err());
    }
}
