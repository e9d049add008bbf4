//! Relay server core: shared state, accept loop and per-connection tasks.
//!
//! Each accepted socket gets its own task. The task reads the identity
//! handshake, registers the connection, then loops over frames, handing text
//! to the [`Router`] and file transfers to the [`FileReceiver`]. A separate
//! writer task per connection drains the connection's outbox onto the
//! socket, so deliveries from other connections never block on this one's
//! reader.
//!
//! Connection lifecycle:
//! 1. Read the handshake frame (the raw username).
//! 2. Register the connection under that username.
//! 3. Loop: read a frame, dispatch it.
//! 4. On EOF, protocol error, timeout or shutdown: unregister and close.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_proto::codec::{self, CodecError};
use parley_proto::record::{self, RecordError};
use parley_proto::{FileHeader, Frame};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;

use crate::config::RelayConfig;
use crate::files::FileReceiver;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::router::Router;
use crate::store::Stores;
use crate::transform::{BodyTransform, Passthrough};

/// How long a closing connection waits for its writer to flush queued
/// deliveries before aborting it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does
/// not spin the accept loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that end a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Framing or stream failure.
    #[error(transparent)]
    Framing(#[from] CodecError),

    /// A frame payload is not a valid record.
    #[error("malformed record: {0}")]
    Malformed(#[from] RecordError),

    /// The peer stayed silent for longer than the read timeout.
    #[error("no data received for {0:?}")]
    Timeout(Duration),
}

/// Per-connection limits taken from the resolved configuration.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Maximum frame payload size in bytes.
    pub max_frame_size: usize,
    /// Bound on concurrently served connections.
    pub max_connections: Option<usize>,
    /// Idle read timeout.
    pub read_timeout: Option<Duration>,
}

impl ServerSettings {
    /// Extracts the server settings from `config`.
    #[must_use]
    pub const fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            max_connections: config.max_connections,
            read_timeout: config.read_timeout,
        }
    }
}

/// Shared relay server state.
pub struct RelayState {
    registry: Arc<ConnectionRegistry>,
    stores: Stores,
    router: Router,
    files: FileReceiver,
    settings: ServerSettings,
    shutdown: watch::Sender<bool>,
}

impl RelayState {
    /// Creates relay state over `stores` that delivers bodies unchanged.
    #[must_use]
    pub fn new(stores: Stores, config: &RelayConfig) -> Self {
        Self::with_transform(stores, config, Arc::new(Passthrough))
    }

    /// Creates relay state whose router applies `transform` to text bodies.
    #[must_use]
    pub fn with_transform(
        stores: Stores,
        config: &RelayConfig,
        transform: Arc<dyn BodyTransform>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Router::new(
            Arc::clone(&registry),
            stores.follows.clone(),
            stores.messages.clone(),
            transform,
            config.denial_policy,
        );
        let files = FileReceiver::new(
            stores.follows.clone(),
            config.files_dir.clone(),
            config.max_file_size,
        );
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            stores,
            router,
            files,
            settings: ServerSettings::from_config(config),
            shutdown,
        }
    }

    /// Live connections and their usernames.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The persistent stores.
    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Limits applied to every connection.
    #[must_use]
    pub const fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Reads the next frame, honoring the read timeout and shutdown.
    ///
    /// Returns `Ok(None)` on clean EOF or when shutdown is signalled.
    async fn next_frame<R>(
        &self,
        reader: &mut R,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<u8>>, ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let read = codec::read_frame(reader, self.settings.max_frame_size);
        tokio::select! {
            biased;
            () = stopped(shutdown) => Ok(None),
            frame = with_timeout(self.settings.read_timeout, read) => frame,
        }
    }

    /// Reads frames from an identified connection until it ends.
    async fn serve_frames<R>(
        &self,
        reader: &mut R,
        handle: &ConnectionHandle,
        username: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        while let Some(payload) = self.next_frame(reader, shutdown).await? {
            match Frame::parse(&payload)? {
                Frame::Text(text) => {
                    warn_on_spoofed_sender(username, &text.sender);
                    self.router
                        .route(handle, username, &text.recipient, &text.body)
                        .await;
                }
                Frame::FileHeader(header) => {
                    warn_on_spoofed_sender(username, &header.sender);
                    let header = FileHeader {
                        sender: username.to_string(),
                        ..header
                    };
                    let receive = with_timeout(
                        self.settings.read_timeout,
                        self.files.receive(reader, &header),
                    );
                    let outcome = tokio::select! {
                        biased;
                        () = stopped(shutdown) => {
                            tracing::info!(
                                username = %username,
                                filename = %header.filename,
                                "shutdown during file transfer, closing"
                            );
                            return Ok(());
                        }
                        outcome = receive => outcome?,
                    };
                    tracing::debug!(username = %username, outcome = ?outcome, "file transfer handled");
                }
            }
        }
        Ok(())
    }
}

/// A running relay server.
pub struct RelayServer {
    local_addr: SocketAddr,
    state: Arc<RelayState>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl RelayServer {
    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared state of the running server.
    #[must_use]
    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Stops accepting, closes every connection and waits for their tasks.
    pub async fn shutdown(self) {
        self.state.shutdown.send_replace(true);
        if let Err(e) = self.accept_task.await {
            tracing::error!(error = %e, "accept task failed");
        }
        tracing::info!("relay server stopped");
    }
}

/// Binds the listener on `addr` and starts accepting connections.
///
/// This is the entry point used by both `main.rs` and test code. Binding to
/// port 0 picks a free port; see [`RelayServer::local_addr`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(addr: &str, state: Arc<RelayState>) -> std::io::Result<RelayServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
    Ok(RelayServer {
        local_addr,
        state,
        accept_task,
    })
}

async fn accept_loop(listener: TcpListener, state: Arc<RelayState>) {
    let limit = state
        .settings
        .max_connections
        .map(|n| Arc::new(Semaphore::new(n)));
    let mut shutdown = state.shutdown.subscribe();
    let mut connections = JoinSet::new();

    loop {
        let permit = match &limit {
            Some(semaphore) => {
                tokio::select! {
                    () = stopped(&mut shutdown) => break,
                    permit = Arc::clone(semaphore).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                }
            }
            None => None,
        };

        tokio::select! {
            () = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    connections.spawn(async move {
                        handle_connection(stream, peer, state).await;
                        drop(permit);
                    });
                }
                Err(e) => pause_after_accept_error(&e).await,
            },
        }

        while let Some(finished) = connections.try_join_next() {
            log_task_result(finished);
        }
    }

    drop(listener);
    tracing::info!(active = connections.len(), "listener closed, draining connections");
    while let Some(finished) = connections.join_next().await {
        log_task_result(finished);
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<RelayState>) {
    tracing::debug!(peer = %peer, "connection accepted");
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut shutdown = state.shutdown.subscribe();

    let username = match read_handshake(&state, &mut reader, &mut shutdown).await {
        Ok(Some(username)) => username,
        Ok(None) => {
            tracing::debug!(peer = %peer, "connection closed before handshake");
            return;
        }
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "handshake failed");
            return;
        }
    };

    let (handle, outbox) = ConnectionHandle::channel();
    let id = handle.id();
    state.registry.register(handle.clone(), &username);
    tracing::info!(peer = %peer, username = %username, connection = %id, "connection identified");

    let mut writer = tokio::spawn(write_loop(write_half, outbox, id));

    match state
        .serve_frames(&mut reader, &handle, &username, &mut shutdown)
        .await
    {
        Ok(()) => tracing::debug!(username = %username, connection = %id, "connection ended"),
        Err(e) => {
            tracing::warn!(username = %username, connection = %id, error = %e, "connection closed on error");
        }
    }

    state.registry.unregister(id);
    drop(handle);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    tracing::info!(username = %username, connection = %id, "connection closed and unregistered");
}

async fn read_handshake<R>(
    state: &RelayState,
    reader: &mut R,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<String>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let Some(payload) = state.next_frame(reader, shutdown).await? else {
        return Ok(None);
    };
    Ok(Some(record::parse_handshake(&payload)?))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<String>,
    id: ConnectionId,
) {
    while let Some(record) = outbox.recv().await {
        if let Err(e) = codec::write_frame(&mut writer, record.as_bytes()).await {
            tracing::warn!(connection = %id, error = %e, "socket write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// The sender named in a frame must be the identified user; the server
/// always routes under the identified name.
fn warn_on_spoofed_sender(username: &str, claimed: &str) {
    if claimed != username {
        tracing::warn!(
            username = %username,
            claimed = %claimed,
            "frame sender does not match identified user, overriding"
        );
    }
}

async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T, ConnectionError>
where
    F: Future<Output = Result<T, CodecError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ConnectionError::Timeout(limit))?
            .map_err(ConnectionError::from),
        None => fut.await.map_err(ConnectionError::from),
    }
}

async fn pause_after_accept_error(error: &std::io::Error) {
    tracing::warn!(error = %error, "failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Resolves once shutdown has been signalled.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::error!(error = %e, "connection task panicked");
    }
}
