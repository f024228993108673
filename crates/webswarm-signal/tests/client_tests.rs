#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    use webswarm_config::SignalConfig;
    use webswarm_core::protocol::*;
    use webswarm_core::transport::memory::MemoryNetwork;
    use webswarm_core::*;
    use webswarm_signal::*;

    /// Hands the service side of every link to the test.
    struct ScriptedConnector {
        links: mpsc::UnboundedSender<(String, Link)>,
        refuse: AtomicUsize,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, url: &str) -> Result<Link> {
            if self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(WebswarmError::Transport("refused".into()));
            }
            let (client, service) = Link::pair();
            let _ = self.links.send((url.to_string(), service));
            Ok(client)
        }
    }

    fn config(urls: &[&str]) -> SignalConfig {
        SignalConfig {
            bootstrap: urls.iter().map(|u| u.to_string()).collect(),
            ..SignalConfig::default()
        }
    }

    fn start(
        urls: &[&str],
        refuse: usize,
    ) -> (
        Arc<SignalClient>,
        mpsc::UnboundedReceiver<SignalEvent>,
        mpsc::UnboundedReceiver<(String, Link)>,
    ) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector {
            links: links_tx,
            refuse: AtomicUsize::new(refuse),
        });
        let (client, events) = SignalClient::start(Identity::random(), config(urls), connector);
        (client, events, links_rx)
    }

    async fn expect_connected(events: &mut mpsc::UnboundedReceiver<SignalEvent>) -> bool {
        match events.recv().await {
            Some(SignalEvent::Connected { reconnected }) => reconnected,
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    fn reply(msg: &SignalMessage, payload: impl serde::Serialize) -> SignalMessage {
        SignalMessage::transaction(
            msg.event.clone(),
            msg.transaction_id.clone().unwrap(),
            serde_json::to_value(payload).unwrap(),
        )
    }

    // ── Transactions ───────────────────────────────────────────

    #[tokio::test]
    async fn test_candidates_round_trip() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, mut service) = links.recv().await.unwrap();
        assert!(!expect_connected(&mut events).await);

        let channel = ChannelId::from_name("lobby");
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.candidates(channel).await })
        };

        let frame = service.rx.recv().await.unwrap();
        assert_eq!(frame.event, EVENT_CANDIDATES);
        let data: DiscoveryData = frame.decode().unwrap();
        assert_eq!(data.identity, client.identity());
        assert_eq!(data.channel, channel);

        let other = Identity::random();
        service
            .tx
            .send(reply(
                &frame,
                ChannelPeers {
                    channel,
                    peers: vec![other],
                },
            ))
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), vec![other]);
        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_forgets_channel_even_on_timeout() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, _service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        let channel = ChannelId::from_name("lobby");
        client.discover(channel).unwrap();
        assert_eq!(client.announced_channels(), vec![channel]);

        let err = client.leave(channel).await.unwrap_err();
        assert_eq!(err.code(), "ERR_TRANSACTION_TIMEOUT");
        assert!(client.announced_channels().is_empty());
        client.close().await;
    }

    #[tokio::test]
    async fn test_info_and_unsolicited_events() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, mut service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        client.info(serde_json::json!({"hello": "world"})).unwrap();
        let frame = service.rx.recv().await.unwrap();
        assert_eq!(frame.event, EVENT_INFO);
        assert!(frame.transaction_id.is_none());

        let channel = ChannelId::from_name("lobby");
        service
            .tx
            .send(SignalMessage::event(
                EVENT_DISCOVER,
                serde_json::to_value(ChannelPeers {
                    channel,
                    peers: vec![],
                })
                .unwrap(),
            ))
            .unwrap();
        service
            .tx
            .send(SignalMessage::event(EVENT_INFO, serde_json::json!(42)))
            .unwrap();

        match events.recv().await {
            Some(SignalEvent::Discover(peers)) => assert_eq!(peers.channel, channel),
            other => panic!("expected Discover, got {other:?}"),
        }
        match events.recv().await {
            Some(SignalEvent::Info(value)) => assert_eq!(value, 42),
            other => panic!("expected Info, got {other:?}"),
        }
        client.close().await;
    }

    #[tokio::test]
    async fn test_close_fails_calls() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, _service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        client.close().await;
        let err = client
            .candidates(ChannelId::from_name("lobby"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_SIGNAL_CLOSED");
        assert!(!client.is_connected());
        assert!(client.discover(ChannelId::from_name("lobby")).is_err());
    }

    // ── Reconnection ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cycles_urls_and_reannounces() {
        let (client, mut events, mut links) = start(&["ws://a", "ws://b"], 0);
        let (url, service) = links.recv().await.unwrap();
        assert_eq!(url, "ws://a");
        assert!(!expect_connected(&mut events).await);

        let channel = ChannelId::from_name("lobby");
        client.discover(channel).unwrap();
        drop(service);

        assert!(matches!(
            events.recv().await,
            Some(SignalEvent::Disconnected)
        ));
        let (url, mut service) = links.recv().await.unwrap();
        assert_eq!(url, "ws://b");
        assert!(expect_connected(&mut events).await);

        let frame = service.rx.recv().await.unwrap();
        assert_eq!(frame.event, EVENT_DISCOVER);
        let data: DiscoveryData = frame.decode().unwrap();
        assert_eq!(data.channel, channel);
        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_back_off_and_rotate() {
        let (client, mut events, mut links) = start(&["ws://a", "ws://b", "ws://c"], 2);
        let (url, _service) = links.recv().await.unwrap();
        // a and b refused, c accepted.
        assert_eq!(url, "ws://c");
        assert!(!expect_connected(&mut events).await);
        assert!(client.is_connected());
        client.close().await;
    }

    // ── Offers ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_connect_rejection_maps_to_remote_error() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, mut service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        let net = MemoryNetwork::new();
        let transport = net.transport();
        let remote = Identity::random();
        let meta = OfferMetadata {
            channel: ChannelId::from_name("lobby"),
            connection_id: ConnectionId::random(),
        };
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.connect(remote, meta, transport.as_ref()).await })
        };

        let frame = service.rx.recv().await.unwrap();
        assert_eq!(frame.event, EVENT_OFFER);
        let offer: Offer = frame.decode().unwrap();
        assert_eq!(offer.target, remote);
        assert_eq!(offer.connection_id, meta.connection_id);

        service
            .tx
            .send(reply(
                &frame,
                OfferReply::Rejected {
                    code: RejectCode::MaxPeersReached,
                    reason: "full".into(),
                },
            ))
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, WebswarmError::RemoteMaxPeersReached(_)));
        client.close().await;
    }

    #[tokio::test]
    async fn test_connect_accepted_completes_transport() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, mut service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        let net = MemoryNetwork::new();
        let remote = Identity::random();
        let meta = OfferMetadata {
            channel: ChannelId::from_name("lobby"),
            connection_id: ConnectionId::random(),
        };
        let call = {
            let client = client.clone();
            let transport = net.transport();
            tokio::spawn(async move { client.connect(remote, meta, transport.as_ref()).await })
        };

        let frame = service.rx.recv().await.unwrap();
        let offer: Offer = frame.decode().unwrap();
        let ctx = ConnectionContext {
            local: remote,
            remote: offer.initiator,
            channel: offer.channel,
            connection_id: offer.connection_id,
            initiator: false,
        };
        let (answer, remote_handle) = net.transport().accept(&ctx, offer.signal).await.unwrap();
        service
            .tx
            .send(reply(&frame, OfferReply::Accepted { signal: answer }))
            .unwrap();

        let handle = call.await.unwrap().unwrap();
        let mut local_events = handle.take_events().unwrap();
        assert_eq!(local_events.recv().await, Some(TransportEvent::Connect));
        assert!(remote_handle.is_connected());
        client.close().await;
    }

    #[tokio::test]
    async fn test_request_accept_sends_answer() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, mut service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        let net = MemoryNetwork::new();
        let initiator = Identity::random();
        let channel = ChannelId::from_name("lobby");
        let connection_id = ConnectionId::random();
        let ctx = ConnectionContext {
            local: initiator,
            remote: client.identity(),
            channel,
            connection_id,
            initiator: true,
        };
        let signal = net.transport().offer(&ctx).await.unwrap();
        let incoming = IncomingOffer {
            offer: Offer {
                initiator,
                target: client.identity(),
                channel,
                connection_id,
                signal,
            },
            reply_to: "txn-1".into(),
        };
        service
            .tx
            .send(SignalMessage::event(
                EVENT_REQUEST,
                serde_json::to_value(&incoming).unwrap(),
            ))
            .unwrap();

        let request = match events.recv().await {
            Some(SignalEvent::Request(request)) => request,
            other => panic!("expected Request, got {other:?}"),
        };
        assert_eq!(request.initiator(), initiator);
        assert_eq!(request.channel(), channel);
        assert_eq!(request.connection_id(), connection_id);

        let _handle = request.accept(net.transport().as_ref()).await.unwrap();
        let frame = service.rx.recv().await.unwrap();
        assert_eq!(frame.event, EVENT_ANSWER);
        let answer: Answer = frame.decode().unwrap();
        assert_eq!(answer.reply_to, "txn-1");
        assert_eq!(answer.initiator, initiator);
        assert!(matches!(answer.reply, OfferReply::Accepted { .. }));

        // Answered once only.
        drop(request);
        client.info(serde_json::Value::Null).unwrap();
        assert_eq!(service.rx.recv().await.unwrap().event, EVENT_INFO);
        client.close().await;
    }

    #[tokio::test]
    async fn test_dropped_request_is_rejected() {
        let (client, mut events, mut links) = start(&["ws://a"], 0);
        let (_, mut service) = links.recv().await.unwrap();
        expect_connected(&mut events).await;

        let incoming = IncomingOffer {
            offer: Offer {
                initiator: Identity::random(),
                target: client.identity(),
                channel: ChannelId::from_name("lobby"),
                connection_id: ConnectionId::random(),
                signal: serde_json::Value::Null,
            },
            reply_to: "txn-2".into(),
        };
        service
            .tx
            .send(SignalMessage::event(
                EVENT_REQUEST,
                serde_json::to_value(&incoming).unwrap(),
            ))
            .unwrap();
        let request = events.recv().await.unwrap();
        drop(request);

        let frame = service.rx.recv().await.unwrap();
        let answer: Answer = frame.decode().unwrap();
        assert!(matches!(
            answer.reply,
            OfferReply::Rejected {
                code: RejectCode::Transport,
                ..
            }
        ));
        client.close().await;
    }
}
