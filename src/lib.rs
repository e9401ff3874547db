//! # qsocket
//!
//! Message-oriented transport over a single TCP stream.
//!
//! Values are encoded by a pluggable [`Codec`], framed with a 4-byte big-endian length
//! prefix, and read back by a background pump into a per-connection queue. A [`Listener`]
//! accepts inbound streams and hands each one out as a [`Connection`].
//!
//! ```ignore
//! let listener = Listener::bind("127.0.0.1:8080", config.clone(),
//!     HandlerFactory::new(Arc::new(JsonCodec::<Value>::new()), Arc::new(Echo))).await?;
//! let alice = connect("127.0.0.1:8080", JsonCodec::<Value>::new(), config).await?;
//! alice.send(&json!("Hello echo!")).await?;
//! assert_eq!(alice.receive().await, Some(json!("Hello echo!")));
//! ```

pub mod client;
pub mod common;
pub mod server;

pub use client::{connect, connect_with};
pub use common::codec::{BytesCodec, Codec, JsonCodec};
pub use common::config::{load_config, TransportConfig};
pub use common::connection::{Connection, ConnectionHandle, State};
pub use common::error::{CodecError, Result, TransportError};
pub use common::handler::{Context, Deliver, Handler};
pub use common::metrics::StatsSnapshot;
pub use server::{ConnectionFactory, Echo, HandlerFactory, Listener};
