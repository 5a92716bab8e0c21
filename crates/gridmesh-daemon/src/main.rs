//! GridMesh node daemon
//!
//! Brings up the mesh link, the node, and the bus bridge, then processes
//! queued packets on a fixed tick until interrupted.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gridmesh_bridge::{BackendSink, BridgeRelay, HttpBackend, LocalBus, MqttBus};
use gridmesh_logging::{GridmeshSubscriberBuilder, NodeContextGuard, node_span};
use gridmesh_node::MeshNode;
use gridmesh_transport::UdpMeshTransport;
use tracing::{Instrument, debug, info, warn};

use crate::config::{Cli, Command, DaemonConfig};

/// Ticks between status log lines
const STATUS_EVERY_TICKS: u64 = 12;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = DaemonConfig::from_args(&args)?;
            run(config).await
        }
        Command::Check(args) => {
            let config = DaemonConfig::from_args(&args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let _log_guard = GridmeshSubscriberBuilder::new()
        .with_config(config.log.clone())
        .init()?;

    let identity = config.node.resolve_identity()?;
    let _ctx = NodeContextGuard::new(&identity, config.node.gateway);
    let span = node_span(&identity);

    async move {
        let interface = &config.node.transport.interface;
        if interface.configure {
            interface
                .batman()
                .attach()
                .await
                .context("Failed to attach mesh interface")?;
        }

        let transport = UdpMeshTransport::bind(identity.clone(), &config.node.transport)
            .await
            .context("Failed to bind mesh transport")?;
        let node = Arc::new(MeshNode::new(config.node.clone(), Arc::new(transport))?);

        let bus = Arc::new(MqttBus::connect(&config.mqtt, identity.as_str()));
        let backend: Option<Arc<dyn BackendSink>> = if node.is_gateway() {
            let sink: Arc<dyn BackendSink> = Arc::new(HttpBackend::new(&config.backend)?);
            Some(sink)
        } else {
            None
        };
        let local_bus: Arc<dyn LocalBus> = bus.clone();
        let relay = BridgeRelay::new(config.bridge.clone(), node.clone(), local_bus, backend)?;

        node.start().await?;
        relay.start().await?;
        info!(gateway = node.is_gateway(), "GridMesh node running");

        let mut ticker = tokio::time::interval(config.process_interval());
        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let processed = node.drain(config.drain_batch);
                    if processed > 0 {
                        debug!(processed, queued = node.queue_len(), "Processed packets");
                    }
                    ticks += 1;
                    if ticks % STATUS_EVERY_TICKS == 0 {
                        let stats = node.stats();
                        info!(
                            peers = stats.peers,
                            queued = stats.queued,
                            delivered = stats.router.delivered,
                            forwarded = stats.router.forwarded,
                            dropped = stats.router.total_dropped(),
                            bridged = relay.stats().forwarded,
                            "Status"
                        );
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for interrupt");
                    }
                    info!("Interrupted, shutting down");
                    break;
                }
            }
        }

        relay.stop().await?;
        node.stop().await?;
        bus.disconnect().await;
        info!("Shutdown complete");
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}
