//! # Message Connection
//!
//! Wraps one TCP stream into a message-oriented, thread-safe connection.
//!
//! ## Architecture
//!
//! ```text
//!             send(&value)                      receive() -> Option<value>
//!                  |                                     ^
//!            [codec.encode]                              |
//!                  |                             [inbound queue]
//!           [send-mutex] ---> write half             ^
//!                                                     | Handler::on_message
//!   read half ---> [receive pump: FrameReader (timed reads) -> codec.decode]
//! ```
//!
//! The pump is a background task started at construction. Every read it issues is bounded
//! by the poll interval, so a `close` request is noticed within one interval even on an
//! idle connection or in the middle of a frame. Once a frame is complete it is decoded and
//! handed to the [`Handler`]. The default handler,
//! [`Deliver`], pushes it onto the inbound queue.
//!
//! The read half belongs to the pump alone and is never locked. Writes go through the
//! send-mutex, one complete frame per lock, so concurrent senders cannot interleave bytes.
//!
//! ## Shutdown
//!
//! The pump stops on cancellation, remote close, a decode error, an I/O error or a handler
//! error. Teardown then always runs in this order:
//! 1. `Handler::on_close` while the socket is still usable
//! 2. shutdown of both directions, then the socket is closed
//! 3. the inbound queue is closed, so `receive` returns `None` from then on
//!
//! A send racing a close may either complete or fail with an I/O-class error. Both are
//! valid outcomes.

use log::{debug, error, info, warn};
use std::fmt;
use std::future::Future;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use super::codec::Codec;
use super::config::TransportConfig;
use super::error::{Result, TransportError};
use super::framing;
use super::handler::{Context, Deliver, Handler};
use super::metrics::{ConnectionStats, StatsSnapshot};

tokio::task_local! {
    /// Id of the connection whose pump is running the current task.
    static PUMP: Uuid;
}

/// Lifecycle of a connection pump or listener accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Closing,
    Closed,
}

// ============================================================================
// SHARED STATE - Reachable from the pump, the owner and every handle
// ============================================================================

struct Shared<C: Codec> {
    id: Uuid,
    codec: Arc<C>,
    config: TransportConfig,
    /// The send-mutex. `None` once the pump has torn the socket down.
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: AtomicBool,
    state: watch::Sender<State>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    stats: ConnectionStats,
}

impl<C: Codec> Shared<C> {
    async fn send(&self, item: &C::Item) -> Result<()> {
        // Encode outside the lock; a codec failure writes nothing.
        let payload = self.codec.encode(item)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        framing::write_frame(writer, &payload, self.config.max_frame_len).await?;
        drop(guard);

        self.stats.record_sent(payload.len());
        debug!("📤 [{}] sent {} bytes", self.label(), payload.len());
        Ok(())
    }

    /// Set the cancellation flag. Returns `true` only for the first request.
    fn request_close(&self) -> bool {
        let first = !self.cancel.swap(true, Ordering::SeqCst);
        if first {
            debug!("🛑 [{}] close requested", self.label());
        }
        first
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Whether the calling task is this connection's own pump.
    fn in_pump(&self) -> bool {
        PUMP.try_with(|id| *id == self.id).unwrap_or(false)
    }

    async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only fails if it was dropped mid-wait.
        let _ = rx.wait_for(|s| *s == State::Closed).await;
    }

    fn label(&self) -> String {
        format!(
            "{} -> {}",
            fmt_addr(self.local_addr),
            fmt_addr(self.peer_addr)
        )
    }
}

fn fmt_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|| "?".to_string())
}

// ============================================================================
// CONNECTION - Owner of the inbound queue
// ============================================================================

/// A message connection over one TCP stream.
///
/// Created by [`connect`](crate::client::connect) or handed out by a
/// [`Listener`](crate::server::Listener). Dropping it requests a close; the pump then
/// exits within one poll interval.
pub struct Connection<C: Codec> {
    shared: Arc<Shared<C>>,
    inbound: Mutex<mpsc::UnboundedReceiver<C::Item>>,
}

impl<C: Codec> Connection<C> {
    /// Wrap a connected stream, delivering every inbound value to the queue.
    ///
    /// Must be called from within a tokio runtime; the receive pump is spawned here.
    pub fn new(stream: TcpStream, codec: Arc<C>, config: TransportConfig) -> Result<Self> {
        Self::with_handler(stream, codec, config, Arc::new(Deliver))
    }

    /// Wrap a connected stream with a custom processing hook.
    ///
    /// # Arguments
    /// - `stream`: An established TCP connection
    /// - `codec`: Value codec, shared with the peer by convention
    /// - `config`: Poll interval, frame limit and socket options
    /// - `handler`: Called by the pump for every decoded value and once at teardown
    ///
    /// # Example
    /// ```ignore
    /// let stream = TcpStream::connect("127.0.0.1:8080").await?;
    /// let conn = Connection::with_handler(stream, Arc::new(BytesCodec), config, Arc::new(Echo))?;
    /// ```
    pub fn with_handler(
        stream: TcpStream,
        codec: Arc<C>,
        config: TransportConfig,
        handler: Arc<dyn Handler<C>>,
    ) -> Result<Self> {
        config.validate()?;
        stream.set_nodelay(config.nodelay)?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (state, _) = watch::channel(State::Running);
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            codec,
            config,
            writer: Mutex::new(Some(writer)),
            cancel: AtomicBool::new(false),
            state,
            local_addr,
            peer_addr,
            stats: ConnectionStats::new(),
        });

        info!("🔗 [{}] connection {} opened", shared.label(), shared.id);
        tokio::spawn(run_pump(shared.clone(), handler, reader, tx));

        Ok(Self {
            shared,
            inbound: Mutex::new(rx),
        })
    }

    /// Encode `item` and write it as one frame.
    ///
    /// # Returns
    /// - `Ok(())`: The whole frame was handed to the socket
    /// - `Err(TransportError::Encode | FrameTooLarge)`: Nothing was written
    /// - `Err(TransportError::Io | Closed)`: The connection should be considered broken
    pub async fn send(&self, item: &C::Item) -> Result<()> {
        self.shared.send(item).await
    }

    /// Wait for the next inbound value.
    ///
    /// Returns `None` once the connection has been torn down, and on every call after that.
    pub async fn receive(&self) -> Option<C::Item> {
        self.inbound.lock().await.recv().await
    }

    /// Blocking variant of [`receive`](Self::receive) for threads outside the runtime.
    ///
    /// Panics if called from within an async context, like every tokio `blocking_*` call.
    pub fn blocking_receive(&self) -> Option<C::Item> {
        self.inbound.blocking_lock().blocking_recv()
    }

    /// Ask the pump to stop. With `wait`, also wait until teardown is complete.
    ///
    /// Idempotent. The socket itself is only touched by the pump. Called from inside this
    /// connection's handler, the wait is skipped because the pump cannot wait for itself.
    pub async fn close(&self, wait: bool) {
        close_shared(&self.shared, wait).await;
    }

    /// Resolve once teardown has finished.
    pub async fn closed(&self) {
        self.shared.wait_closed().await;
    }

    /// A cloneable handle that can send and close but does not own the inbound queue.
    pub fn handle(&self) -> ConnectionHandle<C> {
        ConnectionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<C: Codec> Drop for Connection<C> {
    fn drop(&mut self) {
        self.shared.request_close();
    }
}

impl<C: Codec> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("local_addr", &self.shared.local_addr)
            .field("peer_addr", &self.shared.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

async fn close_shared<C: Codec>(shared: &Shared<C>, wait: bool) {
    shared.request_close();
    if wait {
        if shared.in_pump() {
            debug!("⏭️ [{}] close(wait) from own pump, not waiting", shared.label());
        } else {
            shared.wait_closed().await;
        }
    }
}

// ============================================================================
// CONNECTION HANDLE - Send side, shareable across tasks
// ============================================================================

/// Cloneable send/close handle for a [`Connection`].
///
/// Holding a handle does not keep the connection open: dropping the owning
/// [`Connection`] still closes it.
pub struct ConnectionHandle<C: Codec> {
    shared: Arc<Shared<C>>,
}

impl<C: Codec> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Codec> ConnectionHandle<C> {
    pub async fn send(&self, item: &C::Item) -> Result<()> {
        self.shared.send(item).await
    }

    pub async fn close(&self, wait: bool) {
        close_shared(&self.shared, wait).await;
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }
}

// ============================================================================
// RECEIVE PUMP
// ============================================================================

/// Body of the background task owned by one connection.
///
/// The receive loop and the close hook each run in their own task so that a panic in
/// either still leads to socket teardown and the closed sentinel.
async fn run_pump<C: Codec>(
    shared: Arc<Shared<C>>,
    handler: Arc<dyn Handler<C>>,
    reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<C::Item>,
) {
    let label = shared.label();

    let receive = {
        let ctx = Context::new(ConnectionHandle { shared: shared.clone() }, inbound.clone());
        let shared = shared.clone();
        let handler = handler.clone();
        async move {
            let mut reader = reader;
            let result = receive_loop(&shared, handler.as_ref(), &ctx, &mut reader).await;
            (reader, result)
        }
    };

    let reader = match isolate(shared.id, receive).await {
        Some((reader, result)) => {
            report_exit(&label, &result);
            Some(reader)
        }
        None => {
            error!("❌ [{}] receive loop panicked", label);
            None
        }
    };

    shared.state.send_replace(State::Closing);

    let on_close = {
        let ctx = Context::new(ConnectionHandle { shared: shared.clone() }, inbound.clone());
        async move { handler.on_close(&ctx).await }
    };
    if isolate(shared.id, on_close).await.is_none() {
        error!("❌ [{}] close hook panicked", label);
    }

    teardown(&shared, reader).await;

    // Last sender gone: every blocked and future `receive` yields `None`.
    drop(inbound);
    shared.state.send_replace(State::Closed);

    let stats = shared.stats.snapshot();
    info!(
        "🔌 [{}] connection {} closed ({} frames in, {} frames out)",
        label, shared.id, stats.frames_received, stats.frames_sent
    );
}

/// Run `fut` in its own task tagged as this connection's pump. `None` if it panicked.
async fn isolate<F>(id: Uuid, fut: F) -> Option<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(PUMP.scope(id, fut)).await.ok()
}

async fn receive_loop<C: Codec>(
    shared: &Shared<C>,
    handler: &dyn Handler<C>,
    ctx: &Context<C>,
    reader: &mut OwnedReadHalf,
) -> Result<()> {
    let poll = shared.config.poll_interval();
    let max_len = shared.config.max_frame_len;

    let mut frames = framing::FrameReader::new(max_len);

    while !shared.is_cancelled() {
        // Every read is bounded, mid-frame included, so a close is seen within one interval
        let payload = match tokio::time::timeout(poll, frames.read_some(reader)).await {
            Err(_) => continue,
            Ok(Ok(Some(payload))) => payload,
            Ok(Ok(None)) => continue,
            Ok(Err(TransportError::RemoteClosed { .. })) => {
                return Err(TransportError::remote_closed(
                    shared.local_addr,
                    shared.peer_addr,
                ))
            }
            Ok(Err(e)) => return Err(e),
        };
        shared.stats.record_received(payload.len());

        let item = shared
            .codec
            .decode(&payload)
            .map_err(TransportError::Decode)?;
        handler.on_message(ctx, item).await?;
    }
    Ok(())
}

fn report_exit(label: &str, result: &Result<()>) {
    match result {
        Ok(()) => debug!("🛑 [{}] receive pump cancelled", label),
        Err(e @ TransportError::RemoteClosed { .. }) => info!("👋 [{}] {}", label, e),
        Err(e @ TransportError::Decode(_)) => error!("❌ [{}] {}", label, e),
        Err(e) => warn!("⚠️ [{}] receive pump stopped: {}", label, e),
    }
}

/// Shut both directions down and close the socket.
///
/// The shutdown goes through the read half first, without the send-mutex, so that a
/// sender blocked in `write` is released with an error instead of holding the lock.
async fn teardown<C: Codec>(shared: &Shared<C>, reader: Option<OwnedReadHalf>) {
    let label = shared.label();
    if let Some(reader) = &reader {
        shutdown_both(&label, reader.as_ref());
    }

    let writer = shared.writer.lock().await.take();
    if reader.is_none() {
        if let Some(writer) = &writer {
            shutdown_both(&label, writer.as_ref());
        }
    }

    // Dropping both halves closes the file descriptor.
    drop(writer);
    drop(reader);
}

fn shutdown_both(label: &str, stream: &TcpStream) {
    if let Err(e) = socket2::SockRef::from(stream).shutdown(Shutdown::Both) {
        // The peer may already have reset the connection
        debug!("[{}] shutdown: {}", label, e);
    }
}
