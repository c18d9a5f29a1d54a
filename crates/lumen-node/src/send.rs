use std::net::SocketAddr;
use std::time::Duration;

use lumen_protocol::{
    AckType, LifecycleEvent, PacketBuilder, ProtocolRuntime, RuntimeChannels, RuntimeConfig,
    TimingWindow,
};
use lumen_transport::TransportNode;
use uuid::Uuid;

use crate::events::{emit, EventLifecycle, EventStarted};

pub struct SendConfig {
    pub to: SocketAddr,
    pub purpose: String,
    pub content: serde_json::Value,
    pub coherence: f64,
    pub ack: AckType,
    pub window: TimingWindow,
    pub wait_secs: u64,
}

pub async fn run(node: TransportNode, config: RuntimeConfig, send: SendConfig) -> anyhow::Result<()> {
    emit(&EventStarted::new(
        &config.local_id,
        "send",
        node.local_addr().to_string(),
        config.signature.to_string(),
    ));

    let RuntimeChannels {
        handle, mut events, ..
    } = ProtocolRuntime::spawn(node, config);

    let conn = handle.connect(send.to).await?;
    let packet = PacketBuilder::new(send.purpose)
        .content(send.content)
        .coherence(send.coherence)
        .ack(send.ack)
        .window(send.window);
    let packet_id = handle.send(conn, packet).await?;
    eprintln!("sent {packet_id} to {} ({conn})", send.to);

    let deadline = tokio::time::sleep(Duration::from_secs(send.wait_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                eprintln!("no answer within {}s", send.wait_secs);
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                emit(&EventLifecycle::new(&event));
                if answers(&event, packet_id) {
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Whether `event` settles the packet we sent.
fn answers(event: &LifecycleEvent, packet_id: Uuid) -> bool {
    match event {
        LifecycleEvent::PacketAdmitted { packet, .. } => {
            packet.metadata.in_reply_to == Some(packet_id)
        }
        LifecycleEvent::PeerResponse { .. } => true,
        LifecycleEvent::PacketAbandoned { packet_id: id, .. } => *id == packet_id,
        LifecycleEvent::ConnectionClosed { .. } => true,
        _ => false,
    }
}
