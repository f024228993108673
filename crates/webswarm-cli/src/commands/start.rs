use webswarm_config::SwarmConfig;

/// Listen address after applying the `--port` flag. `PORT` was already
/// folded into the config by the loader.
pub(super) fn effective_listen(config: &SwarmConfig, port: Option<u16>) -> String {
    match port {
        Some(port) => config.server.with_port(port).listen,
        None => config.server.listen.clone(),
    }
}

pub(super) async fn cmd_start(config: SwarmConfig, port: Option<u16>) -> webswarm_core::Result<()> {
    let mut server = config.server.clone();
    server.listen = effective_listen(&config, port);

    println!("webswarm v{}", env!("CARGO_PKG_VERSION"));
    println!("   Signaling: ws://{}/ws", server.listen);
    println!();

    tokio::select! {
        result = webswarm_server::start_server(server) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
