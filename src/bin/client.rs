//! # Client Binary
//!
//! Talks to an echo server.
//!
//! ## Usage
//!
//! ```bash
//! # Send one JSON value and print the reply (server in JSON mode)
//! cargo run --bin client -- --address 127.0.0.1:8080 send '{"action":"subscribe","name":"foo"}'
//!
//! # Round-trip payloads of 100 B .. 10 MB and report throughput (server in --raw mode)
//! cargo run --bin client -- --address 127.0.0.1:8080 ladder
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;
use std::time::{Duration, Instant};

use qsocket::{connect, BytesCodec, JsonCodec, TransportConfig};

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the echo server
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    address: String,

    /// Path to a transport configuration file (TOML format)
    #[arg(short, long)]
    config: Option<String>,

    /// How long to wait for each reply (seconds)
    #[arg(long, default_value_t = 30)]
    reply_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one JSON value and print the echoed reply
    Send {
        /// JSON text, e.g. '{"action":"subscribe","name":"foo"}'
        json: String,
    },
    /// Echo payloads of growing size and print timing
    Ladder {
        /// Largest payload in bytes
        #[arg(long, default_value_t = 10_000_000)]
        max_size: usize,
    },
}

/// Initialize logging; `RUST_LOG` overrides the INFO default
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
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

    let config = match &args.config {
        Some(path) => TransportConfig::from_file(path)?,
        None => TransportConfig::default(),
    };
    let reply_timeout = Duration::from_secs(args.reply_timeout);

    match args.command {
        Command::Send { json } => send_one(&args.address, config, &json, reply_timeout).await,
        Command::Ladder { max_size } => {
            size_ladder(&args.address, config, max_size, reply_timeout).await
        }
    }
}

async fn send_one(
    address: &str,
    config: TransportConfig,
    json: &str,
    reply_timeout: Duration,
) -> anyhow::Result<()> {
    let value: serde_json::Value = serde_json::from_str(json).context("invalid JSON argument")?;

    let conn = connect(address, JsonCodec::<serde_json::Value>::new(), config).await?;
    info!("📤 Sending to {}", address);
    conn.send(&value).await?;

    let reply = tokio::time::timeout(reply_timeout, conn.receive())
        .await
        .context("no reply before timeout")?;
    match reply {
        Some(reply) => println!("{}", reply),
        None => bail!("connection closed before a reply arrived"),
    }

    conn.close(true).await;
    Ok(())
}

async fn size_ladder(
    address: &str,
    config: TransportConfig,
    max_size: usize,
    reply_timeout: Duration,
) -> anyhow::Result<()> {
    let conn = connect(address, BytesCodec, config).await?;

    let sizes = std::iter::successors(Some(100usize), |s| s.checked_mul(10))
        .take_while(|s| *s <= max_size);

    for size in sizes {
        let payload = vec![b'i'; size];
        let start = Instant::now();

        conn.send(&payload).await?;
        let reply = tokio::time::timeout(reply_timeout, conn.receive())
            .await
            .with_context(|| format!("no echo for {} bytes before timeout", size))?;

        let elapsed = start.elapsed().as_secs_f64();
        match reply {
            Some(reply) if reply == payload => {}
            Some(reply) => bail!("echo mismatch: sent {} bytes, got {} bytes", size, reply.len()),
            None => bail!("connection closed during {} byte round trip", size),
        }

        println!(
            "echo ping-pong of {:10} bytes took {:4.4}s, {:9.0}kB/s",
            size,
            elapsed,
            size as f64 / 1000.0 / elapsed
        );
    }

    conn.close(true).await;
    Ok(())
}
