use std::sync::Arc;
use std::time::Duration;

use webswarm_config::SwarmConfig;
use webswarm_core::{ChannelId, Identity, WebswarmError};
use webswarm_signal::{SignalClient, SignalEvent, WsConnector};

/// A channel argument is a hex id when it parses as one, a name otherwise.
pub(super) fn parse_channel(raw: &str) -> ChannelId {
    raw.parse().unwrap_or_else(|_| ChannelId::from_name(raw))
}

pub(super) async fn cmd_candidates(
    config: SwarmConfig,
    channel: String,
    url: Option<String>,
) -> webswarm_core::Result<()> {
    let mut signal = config.signal.clone();
    if let Some(url) = url {
        signal.bootstrap = vec![url];
    }
    let target = signal
        .bootstrap
        .first()
        .cloned()
        .ok_or_else(|| WebswarmError::Config("no signaling URL configured".into()))?;
    let connect_timeout = signal.transaction_timeout();
    let channel_id = parse_channel(&channel);

    let identity = config.identity()?.unwrap_or_else(Identity::random);
    let (client, mut events) = SignalClient::start(identity, signal, Arc::new(WsConnector));

    let connected = tokio::time::timeout(connect_timeout, async {
        while let Some(event) = events.recv().await {
            if matches!(event, SignalEvent::Connected { .. }) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    if !connected {
        client.close().await;
        return Err(WebswarmError::Transport(format!("could not reach {target}")));
    }

    let result = client.candidates(channel_id).await;
    client.close().await;
    let peers = result?;

    println!("Channel {} ({}) at {target}", channel, channel_id.short());
    if peers.is_empty() {
        println!("  (no members)");
    }
    for peer in peers {
        println!("  {peer}");
    }
    // Let the close frame flush before the runtime goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
