use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use skein_logging::{NodeContextGuard, SkeinSubscriberBuilder};
use skein_mesh::{MeshNode, MeshRuntime};
use skein_node::{Cli, NodeSettings};
use skein_transport::TcpTransport;
use tracing::{Instrument, info, info_span, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = NodeSettings::resolve(Cli::parse())?;

    let _log_guard = SkeinSubscriberBuilder::with_config(settings.log.clone())
        .init()
        .context("failed to initialize logging")?;
    let span = {
        let _context = NodeContextGuard::new(settings.node_id.0);
        info_span!("node", id = %settings.node_id)
    };
    run(settings).instrument(span).await
}

async fn run(settings: NodeSettings) -> anyhow::Result<()> {
    let mut node = MeshNode::new(settings.node_id, settings.mesh)?;
    node.on_receive(|from, msg| info!(%from, msg, "Message received"));
    node.on_new_connection(|peer| info!(%peer, "New connection"));
    node.on_dropped_connection(|peer| info!(%peer, "Dropped connection"));

    let (transport, events) = TcpTransport::new(settings.tcp);
    let (handle, task) = MeshRuntime::spawn(node, events);

    if let Some(addr) = settings.listen {
        let local = transport.listen(addr).await?;
        info!(%local, "Accepting mesh links");
    }
    for addr in &settings.connect {
        if let Err(e) = transport.connect(*addr).await {
            warn!(%addr, error = %e, "Could not reach peer");
        }
    }

    info!(node_id = %settings.node_id, "Mesh node running");
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("Shutting down");
                break;
            }
            _ = status.tick() => {
                let nodes = handle.node_list().await?;
                let stability = handle.stability().await?;
                info!(nodes = nodes.len(), stability, "Mesh status");
            }
        }
    }

    handle.shutdown().await?;
    let node = task.await.context("mesh runtime panicked")?;
    transport.shutdown();
    info!(connections = node.connection_count(), "Node stopped");
    Ok(())
}
