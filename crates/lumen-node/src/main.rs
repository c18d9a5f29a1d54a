mod events;
mod listen;
mod send;

use std::net::SocketAddr;

use clap::{Parser, Subcommand, ValueEnum};
use lumen_protocol::{AckType, IdentitySignature, RuntimeConfig, TimingWindow};
use lumen_transport::{TransportConfig, TransportNode};

#[derive(Parser)]
#[command(name = "lumen-node", about = "Lumen protocol node")]
struct Cli {
    /// Node identifier, stamped on outbound packets.
    #[arg(short, long, default_value = "node")]
    id: String,

    /// Identity signature, e.g. "[T(keeper):M(ionian):K(C):A(ψ):I(harmonize)]".
    #[arg(short, long)]
    signature: Option<IdentitySignature>,

    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Admission threshold for packet coherence and presence.
    #[arg(long)]
    min_coherence: Option<f64>,

    /// Max frame size in bytes.
    #[arg(long, default_value = "1048576")]
    max_frame_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept peers and print lifecycle events until Ctrl+C.
    Listen {
        /// Peers to dial at startup.
        #[arg(long, value_delimiter = ',')]
        connect: Vec<SocketAddr>,
        /// Print a stats summary every N seconds (0 = only at exit).
        #[arg(long, default_value = "0")]
        summary_interval: u64,
    },

    /// Dial a peer, send one packet and print what comes back.
    Send {
        /// Peer address.
        #[arg(long)]
        to: SocketAddr,
        /// Intention purpose, e.g. offer_healing.
        #[arg(long, default_value = "share_presence")]
        purpose: String,
        /// JSON content.
        #[arg(long, default_value = "null")]
        content: String,
        /// Sender field coherence, 0–1.
        #[arg(long, default_value = "0.8")]
        coherence: f64,
        #[arg(long, value_enum, default_value = "presence")]
        ack: Ack,
        #[arg(long, value_enum, default_value = "standard")]
        window: Window,
        /// Seconds to wait for an answer.
        #[arg(long, default_value = "5")]
        wait: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Ack {
    None,
    Presence,
    Gratitude,
}

impl From<Ack> for AckType {
    fn from(ack: Ack) -> Self {
        match ack {
            Ack::None => AckType::None,
            Ack::Presence => AckType::Presence,
            Ack::Gratitude => AckType::Gratitude,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Window {
    Immediate,
    Standard,
    Patient,
    Unbounded,
}

impl From<Window> for TimingWindow {
    fn from(window: Window) -> Self {
        match window {
            Window::Immediate => TimingWindow::Immediate,
            Window::Standard => TimingWindow::Standard,
            Window::Patient => TimingWindow::Patient,
            Window::Unbounded => TimingWindow::Unbounded,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = RuntimeConfig {
        local_id: cli.id.clone(),
        ..RuntimeConfig::default()
    };
    if let Some(signature) = cli.signature {
        config.signature = signature;
    }
    if let Some(min) = cli.min_coherence {
        config = config.with_min_coherence(min);
    }

    let transport = TransportConfig::new().max_frame_size(cli.max_frame_size);
    let node = TransportNode::bind(cli.bind, transport).await?;

    eprintln!("lumen-node v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Listening on {} as {}", node.local_addr(), cli.id);
    eprintln!("Signature: {}", config.signature);
    eprintln!();

    match cli.command {
        Command::Listen {
            connect,
            summary_interval,
        } => {
            listen::run(node, config, connect, summary_interval).await?;
        }

        Command::Send {
            to,
            purpose,
            content,
            coherence,
            ack,
            window,
            wait,
        } => {
            let content: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("--content is not valid JSON: {e}"))?;
            send::run(
                node,
                config,
                send::SendConfig {
                    to,
                    purpose,
                    content,
                    coherence,
                    ack: ack.into(),
                    window: window.into(),
                    wait_secs: wait,
                },
            )
            .await?;
        }
    }

    Ok(())
}
