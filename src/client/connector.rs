use log::debug;
use std::sync::Arc;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::common::codec::Codec;
use crate::common::config::TransportConfig;
use crate::common::connection::Connection;
use crate::common::error::Result;
use crate::common::handler::{Deliver, Handler};

/// Open a TCP connection to `addr` and wrap it, queueing every inbound value.
///
/// # Arguments
/// - `addr`: Address of a listening peer (e.g. `"127.0.0.1:8080"`)
/// - `codec`: Value codec; the peer must use a compatible one
/// - `config`: Poll interval, frame limit and socket options
///
/// # Returns
/// - `Ok(Connection)`: Connected, receive pump running
/// - `Err(TransportError::Io)`: Resolution or connect failed
///
/// # Example
/// ```ignore
/// let conn = connect("127.0.0.1:8080", JsonCodec::<Value>::new(), TransportConfig::default()).await?;
/// conn.send(&json!({"action": "subscribe", "name": "foo"})).await?;
/// let reply = conn.receive().await;
/// ```
pub async fn connect<A, C>(addr: A, codec: C, config: TransportConfig) -> Result<Connection<C>>
where
    A: ToSocketAddrs,
    C: Codec,
{
    connect_with(addr, Arc::new(codec), config, Arc::new(Deliver)).await
}

/// Like [`connect`], with a shared codec and a custom processing hook.
pub async fn connect_with<A, C>(
    addr: A,
    codec: Arc<C>,
    config: TransportConfig,
    handler: Arc<dyn Handler<C>>,
) -> Result<Connection<C>>
where
    A: ToSocketAddrs,
    C: Codec,
{
    let stream = TcpStream::connect(addr).await?;
    debug!(
        "🔗 connected {:?} -> {:?}",
        stream.local_addr().ok(),
        stream.peer_addr().ok()
    );
    Connection::with_handler(stream, codec, config, handler)
}
