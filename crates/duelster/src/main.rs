use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use duelster::broker::BrokerConnection;
use duelster::metrics::NodeMetrics;
use duelster::rpc::client::HttpPeerRpc;
use duelster::{Node, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,duelster=info".parse().expect("static filter")),
        )
        .init();

    let config = NodeConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        server_id = %config.server_id,
        addr = %config.addr,
        broker = %config.broker_url,
        peers = config.peers.len(),
        "starting node"
    );

    let broker = BrokerConnection::connect(
        &config.server_id,
        &config.broker_url,
        Duration::from_secs(10),
    )
    .await
    .context("broker unreachable")?;

    let auth = duelster::auth::ClusterAuth::new(&config.cluster_secret);
    let rpc = Arc::new(HttpPeerRpc::new(&config, auth));
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(NodeMetrics::new(&registry).context("metric registration failed")?);

    let bus = Arc::new(broker.bus.clone());
    let node = Node::new(config.clone(), bus, rpc, metrics);
    node.spawn_background();
    tokio::spawn(broker.run(Arc::clone(&node) as _, node.cancel_token()));

    let app = duelster::rpc::api::router(Arc::clone(&node));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.addr.port))
        .await
        .with_context(|| format!("cannot bind {}", config.addr))?;
    tracing::info!(addr = %config.addr, "peer RPC listening, node operational");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("rpc server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    node.shutdown();
    Ok(())
}
