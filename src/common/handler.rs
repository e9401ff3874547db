//! # Processing Hooks
//!
//! A [`Handler`] decides what the receive pump does with each decoded value. It is
//! injected at construction, so per-connection behavior (queueing, echoing, routing) is
//! composed in without a new connection type.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::mpsc;

use super::codec::Codec;
use super::connection::ConnectionHandle;
use super::error::{Result, TransportError};

/// Per-call view of the connection given to a [`Handler`].
///
/// Lets the hook push onto the inbound queue, send on the same connection or request a
/// close. It is only lent to the handler, so the queue is guaranteed to close when the
/// pump exits.
pub struct Context<C: Codec> {
    conn: ConnectionHandle<C>,
    inbound: mpsc::UnboundedSender<C::Item>,
}

impl<C: Codec> Context<C> {
    pub(crate) fn new(conn: ConnectionHandle<C>, inbound: mpsc::UnboundedSender<C::Item>) -> Self {
        Self { conn, inbound }
    }

    /// Append a value to the connection's inbound queue.
    ///
    /// Fails with [`TransportError::Closed`] once the owning
    /// [`Connection`](super::connection::Connection) has been dropped.
    pub fn deliver(&self, item: C::Item) -> Result<()> {
        self.inbound.send(item).map_err(|_| TransportError::Closed)
    }

    /// Send a value back to the peer on this connection.
    pub async fn send(&self, item: &C::Item) -> Result<()> {
        self.conn.send(item).await
    }

    /// Request a close. Waiting here is a no-op; the pump finishes after the hook returns.
    pub async fn close(&self) {
        self.conn.close(true).await;
    }

    /// A handle that outlives this call, e.g. for replies sent from another task.
    pub fn connection(&self) -> &ConnectionHandle<C> {
        &self.conn
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }
}

/// Customization point of the receive pump.
#[async_trait]
pub trait Handler<C: Codec>: Send + Sync + 'static {
    /// Called for every decoded value, in wire order. An error stops the connection.
    async fn on_message(&self, ctx: &Context<C>, item: C::Item) -> Result<()>;

    /// Called once when the pump stops, before the socket is shut down.
    async fn on_close(&self, _ctx: &Context<C>) {}
}

/// Default handler: every value goes to the inbound queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deliver;

#[async_trait]
impl<C: Codec> Handler<C> for Deliver {
    async fn on_message(&self, ctx: &Context<C>, item: C::Item) -> Result<()> {
        ctx.deliver(item)
    }
}
