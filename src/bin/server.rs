//! # Echo Server Binary
//!
//! Binds a listener whose connections send every received message straight back.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --bind 0.0.0.0:8080
//! cargo run --bin server -- --config config/echo.toml --raw
//! ```
//!
//! `--raw` echoes opaque byte payloads (needed by `client ladder`); the default echoes
//! JSON values. Runs until Ctrl-C, then closes the listener and every open connection.

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use qsocket::{
    BytesCodec, Codec, Connection, Echo, HandlerFactory, JsonCodec, Listener, State,
    TransportConfig,
};

/// How often finished connections are dropped from the open list
const PRUNE_INTERVAL_SECS: u64 = 5;

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a transport configuration file (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on, overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// Echo raw byte payloads instead of JSON values
    #[arg(long)]
    raw: bool,
}

/// Initialize logging; `RUST_LOG` overrides the INFO default
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TransportConfig::from_file(path)?,
        None => TransportConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    if args.raw {
        serve(BytesCodec, config).await
    } else {
        serve(JsonCodec::<serde_json::Value>::new(), config).await
    }
}

/// Accept echo connections until Ctrl-C.
async fn serve<C: Codec>(codec: C, config: TransportConfig) -> anyhow::Result<()> {
    let factory = HandlerFactory::new(Arc::new(codec), Arc::new(Echo));
    let listener: Listener<C> =
        Listener::bind(config.bind_address.clone(), config, factory).await?;
    info!("🚀 Echo server ready on {}", listener.local_addr());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut prune = tokio::time::interval(Duration::from_secs(PRUNE_INTERVAL_SECS));
    let mut connections: Vec<Connection<C>> = Vec::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Some(conn) => {
                    info!("🤝 Client {:?} connected", conn.peer_addr());
                    connections.push(conn);
                }
                None => break,
            },
            _ = prune.tick() => {
                connections.retain(|c| c.state() != State::Closed);
            }
            _ = &mut shutdown => {
                info!("🛑 Shutdown requested");
                break;
            }
        }
    }

    listener.close(true).await;
    for conn in &connections {
        conn.close(true).await;
    }
    info!("👋 Echo server stopped");

    Ok(())
}
