//! HTTP and WebSocket tests for the signaling service.

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use webswarm_config::{ServerConfig, SignalConfig};
    use webswarm_core::{ChannelId, Identity};
    use webswarm_server::{MemoryConnector, SignalHub, build_router, serve};
    use webswarm_signal::{Connector, SignalClient, SignalEvent, WsConnector};

    fn setup() -> (axum::Router, Arc<SignalHub>) {
        let hub = SignalHub::new();
        let config = ServerConfig {
            cors: false,
            ..Default::default()
        };
        (build_router(&config, hub.clone()), hub)
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn wait_connected(events: &mut tokio::sync::mpsc::UnboundedReceiver<SignalEvent>) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(SignalEvent::Connected { .. })) => return,
                Ok(Some(_)) => continue,
                other => panic!("signal client never connected: {other:?}"),
            }
        }
    }

    async fn wait_discover(
        events: &mut tokio::sync::mpsc::UnboundedReceiver<SignalEvent>,
    ) -> webswarm_core::protocol::ChannelPeers {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(SignalEvent::Discover(update))) => return update,
                Ok(Some(_)) => continue,
                other => panic!("no discover push: {other:?}"),
            }
        }
    }

    // ── HTTP ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_index_banner() {
        let (app, _) = setup();
        let req = Request::get("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "Signal running OK");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = setup();
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert_eq!(json["hub"]["sockets"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _) = setup();
        let req = Request::get("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(ct.starts_with("text/plain"));
        assert!(body_string(resp).await.contains("webswarm_sockets_opened_total"));
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let (app, _) = setup();
        let req = Request::get("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    // ── Signaling over real sockets ────────────────────────────

    #[tokio::test]
    async fn test_websocket_discovery_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = SignalHub::new();
        let served = hub.clone();
        tokio::spawn(async move {
            let _ = serve(listener, &ServerConfig::default(), served).await;
        });

        let config = SignalConfig {
            bootstrap: vec![format!("ws://{addr}/ws")],
            ..Default::default()
        };
        let channel = ChannelId::from_name("lobby");
        let (a, b) = (Identity::random(), Identity::random());
        let connector: Arc<dyn Connector> = Arc::new(WsConnector);
        let (client_a, mut events_a) = SignalClient::start(a, config.clone(), connector.clone());
        let (client_b, mut events_b) = SignalClient::start(b, config, connector);
        wait_connected(&mut events_a).await;
        wait_connected(&mut events_b).await;

        client_a.discover(channel).unwrap();
        let update = wait_discover(&mut events_a).await;
        assert_eq!(update.peers, vec![a]);
        client_b.discover(channel).unwrap();
        let update = wait_discover(&mut events_b).await;
        assert_eq!(update.channel, channel);
        assert_eq!(update.peers.len(), 2);

        let mut peers = client_b.candidates(channel).await.unwrap();
        peers.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(peers, expected);
        assert_eq!(hub.stats().members, 2);

        client_a.close().await;
        client_b.close().await;
    }

    #[tokio::test]
    async fn test_memory_connector_unknown_url() {
        let connector = MemoryConnector::single("mem://hub", SignalHub::new());
        let err = connector.connect("mem://other").await.err().unwrap();
        assert_eq!(err.code(), "ERR_TRANSPORT");
        assert!(connector.connect("mem://hub").await.is_ok());
    }
}
