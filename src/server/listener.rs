//! # Listener - Accept Loop
//!
//! Owns a listening socket and a background accept loop. Every accepted stream is wrapped
//! into a [`Connection`] by a [`ConnectionFactory`] (its receive pump starts right away)
//! and queued until the application calls [`Listener::accept`].
//!
//! The loop waits for clients with a bounded timeout and re-checks the cancellation flag
//! after each expiry, the same pattern the connection pump uses for reads. An accept error
//! that is neither a timeout nor caused by the listener closing ends the loop.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch, Mutex};

use crate::common::codec::Codec;
use crate::common::config::TransportConfig;
use crate::common::connection::{Connection, State};
use crate::common::error::Result;
use crate::common::handler::{Deliver, Handler};

/// Builds the [`Connection`] for each accepted stream.
///
/// Closures `Fn(TcpStream, &TransportConfig) -> Result<Connection<C>>` implement it too.
pub trait ConnectionFactory<C: Codec>: Send + Sync + 'static {
    fn make(&self, stream: TcpStream, config: &TransportConfig) -> Result<Connection<C>>;
}

impl<C, F> ConnectionFactory<C> for F
where
    C: Codec,
    F: Fn(TcpStream, &TransportConfig) -> Result<Connection<C>> + Send + Sync + 'static,
{
    fn make(&self, stream: TcpStream, config: &TransportConfig) -> Result<Connection<C>> {
        self(stream, config)
    }
}

/// Factory sharing one codec and one handler between all accepted connections.
pub struct HandlerFactory<C: Codec> {
    codec: Arc<C>,
    handler: Arc<dyn Handler<C>>,
}

impl<C: Codec> HandlerFactory<C> {
    pub fn new(codec: Arc<C>, handler: Arc<dyn Handler<C>>) -> Self {
        Self { codec, handler }
    }

    /// Plain connections that queue every inbound value.
    pub fn deliver(codec: Arc<C>) -> Self {
        Self::new(codec, Arc::new(Deliver))
    }
}

impl<C: Codec> ConnectionFactory<C> for HandlerFactory<C> {
    fn make(&self, stream: TcpStream, config: &TransportConfig) -> Result<Connection<C>> {
        Connection::with_handler(
            stream,
            self.codec.clone(),
            config.clone(),
            self.handler.clone(),
        )
    }
}

/// Accepts inbound connections in the background and hands them out in arrival order.
pub struct Listener<C: Codec> {
    accepted: Mutex<mpsc::UnboundedReceiver<Connection<C>>>,
    cancel: Arc<AtomicBool>,
    state: Arc<watch::Sender<State>>,
    local_addr: SocketAddr,
}

impl<C: Codec> Listener<C> {
    /// Bind `addr` and start the accept loop.
    ///
    /// # Arguments
    /// - `addr`: Address to bind, e.g. `"0.0.0.0:8080"` (port 0 picks a free port)
    /// - `config`: Accept poll interval, plus the settings passed to each connection
    /// - `factory`: Turns each accepted stream into a [`Connection`]
    ///
    /// # Example
    /// ```ignore
    /// let codec = Arc::new(JsonCodec::<Value>::new());
    /// let listener = Listener::bind("0.0.0.0:8080", config, HandlerFactory::new(codec, Arc::new(Echo))).await?;
    /// while let Some(conn) = listener.accept().await { ... }
    /// ```
    pub async fn bind<A, F>(addr: A, config: TransportConfig, factory: F) -> Result<Self>
    where
        A: ToSocketAddrs,
        F: ConnectionFactory<C>,
    {
        config.validate()?;
        let socket = TcpListener::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        let cancel = Arc::new(AtomicBool::new(false));
        let (state, _) = watch::channel(State::Running);
        let state = Arc::new(state);
        let (tx, rx) = mpsc::unbounded_channel();

        info!("📡 [Port-{}] listening on {}", local_addr.port(), local_addr);
        tokio::spawn(accept_loop(
            socket,
            config,
            Arc::new(factory),
            cancel.clone(),
            state.clone(),
            tx,
        ));

        Ok(Self {
            accepted: Mutex::new(rx),
            cancel,
            state,
            local_addr,
        })
    }

    /// Bind `config.bind_address` with plain queueing connections.
    pub async fn bind_default(codec: C, config: TransportConfig) -> Result<Self> {
        let addr = config.bind_address.clone();
        Self::bind(addr, config, HandlerFactory::deliver(Arc::new(codec))).await
    }

    /// Wait for the next accepted connection.
    ///
    /// Returns `None` once the accept loop has stopped, and on every call after that.
    pub async fn accept(&self) -> Option<Connection<C>> {
        self.accepted.lock().await.recv().await
    }

    /// Ask the accept loop to stop. With `wait`, also wait until the listening socket is
    /// closed. Idempotent.
    ///
    /// Connections already accepted are not affected.
    pub async fn close(&self, wait: bool) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            debug!("🛑 [Port-{}] close requested", self.local_addr.port());
        }
        if wait {
            self.closed().await;
        }
    }

    /// Resolve once the accept loop has exited.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == State::Closed).await;
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl<C: Codec> Drop for Listener<C> {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Marks the loop closed however it exits.
struct ClosedOnDrop(Arc<watch::Sender<State>>);

impl Drop for ClosedOnDrop {
    fn drop(&mut self) {
        self.0.send_replace(State::Closed);
    }
}

async fn accept_loop<C: Codec>(
    socket: TcpListener,
    config: TransportConfig,
    factory: Arc<dyn ConnectionFactory<C>>,
    cancel: Arc<AtomicBool>,
    state: Arc<watch::Sender<State>>,
    accepted: mpsc::UnboundedSender<Connection<C>>,
) {
    let _closed = ClosedOnDrop(state.clone());
    let name = format!("Port-{}", socket.local_addr().map(|a| a.port()).unwrap_or(0));
    let poll = config.accept_poll_interval();

    while !cancel.load(Ordering::SeqCst) {
        let (stream, addr) = match tokio::time::timeout(poll, socket.accept()).await {
            // Timed out: re-check the cancellation flag
            Err(_) => continue,
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                if !cancel.load(Ordering::SeqCst) {
                    error!("❌ [{}] accept failed: {}", name, e);
                }
                break;
            }
        };

        debug!("🔗 [{}] accepted connection from {}", name, addr);
        match factory.make(stream, &config) {
            Ok(conn) => {
                if accepted.send(conn).is_err() {
                    // Listener handle gone; nobody will ever accept this
                    break;
                }
            }
            Err(e) => warn!("⚠️ [{}] could not set up connection from {}: {}", name, addr, e),
        }
    }

    state.send_replace(State::Closing);
    drop(socket);
    // Dropping the sender releases any task blocked in `accept`
    drop(accepted);
    info!("🔌 [{}] listener closed", name);
}
