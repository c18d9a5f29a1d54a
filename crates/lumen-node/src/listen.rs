use std::net::SocketAddr;
use std::time::Duration;

use lumen_protocol::{ProtocolRuntime, RuntimeChannels, RuntimeConfig};
use lumen_transport::TransportNode;

use crate::events::{emit, EventLifecycle, EventStarted, EventSummary};

pub async fn run(
    node: TransportNode,
    config: RuntimeConfig,
    peers: Vec<SocketAddr>,
    summary_interval: u64,
) -> anyhow::Result<()> {
    let id = config.local_id.clone();
    emit(&EventStarted::new(
        &id,
        "listen",
        node.local_addr().to_string(),
        config.signature.to_string(),
    ));

    let RuntimeChannels {
        handle, mut events, ..
    } = ProtocolRuntime::spawn(node, config);

    for addr in peers {
        match handle.connect(addr).await {
            Ok(conn) => tracing::info!(%addr, connection = %conn, "dialed peer"),
            Err(e) => eprintln!("connect to {addr} failed: {e}"),
        }
    }
    eprintln!("Press Ctrl+C to stop.\n");

    let mut summary = tokio::time::interval(Duration::from_secs(summary_interval.max(1)));
    summary.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("\nCtrl+C received, shutting down...");
                break;
            }
            event = events.recv() => match event {
                Some(event) => emit(&EventLifecycle::new(&event)),
                None => break,
            },
            _ = summary.tick(), if summary_interval > 0 => print_summary(&id, &handle).await?,
        }
    }

    print_summary(&id, &handle).await?;
    handle.shutdown().await;
    Ok(())
}

async fn print_summary(id: &str, handle: &lumen_protocol::RuntimeHandle) -> anyhow::Result<()> {
    let stats = handle.stats().await?;
    let field = handle.field().await?;
    emit(&EventSummary::new(id, &stats, &field));
    Ok(())
}
