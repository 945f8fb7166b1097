//! TCP listener and per-connection I/O.
//!
//! Each accepted socket gets two tasks: a reader that decodes frames and
//! drives a `ConnectionHandler`, and a writer that drains the connection's
//! bounded frame queue in order. Broadcasts only ever push onto queues, so a
//! slow peer never holds up delivery to anyone else; a peer whose queue fills
//! up is closed.

use crate::connection::{ConnectionId, Frame, Outbox, FRAME_QUEUE_CAPACITY};
use crate::error::{Error, RelayErrorKind};
use crate::handler::ConnectionHandler;
use crate::manager::Manager;
use events::codec::{DELIMITER, MAX_FRAME_BYTES};
use log::*;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinSet;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bytes a single `read_until` may consume: one maximal frame plus its terminator.
const READ_LIMIT: u64 = MAX_FRAME_BYTES as u64 + 1;

pub struct Server {
    listener: TcpListener,
    manager: Arc<Manager>,
    shutdown_grace: Duration,
}

impl Server {
    /// Bind the listener. Failure here is a `RelayErrorKind::Bind` error.
    pub async fn bind(addr: impl ToSocketAddrs, manager: Arc<Manager>) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await.map_err(Error::bind)?;
        Ok(Self {
            listener,
            manager,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Upper bound on how long `run` waits for connections to flush after shutdown.
    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves, then close every
    /// connection and wait for queued frames to be written.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Server {
            listener,
            manager,
            shutdown_grace,
        } = self;
        let (close_tx, _) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {peer_addr}: {e}");
                        }
                        let (read_half, write_half) = stream.into_split();
                        connections.spawn(serve_connection(
                            read_half,
                            write_half,
                            peer_addr,
                            Arc::clone(&manager),
                            close_tx.subscribe(),
                        ));
                    }
                    Err(e) => warn!("Failed to accept connection: {e}"),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {e}");
                    }
                }
            }
        }

        drop(listener);
        let _ = close_tx.send(true);

        let drained = tokio::time::timeout(shutdown_grace, async {
            while let Some(finished) = connections.join_next().await {
                if let Err(e) = finished {
                    error!("Connection task failed during shutdown: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connection(s) still open after {:?}, aborting them",
                connections.len(),
                shutdown_grace
            );
            connections.shutdown().await;
        }

        info!("Server closed");
        Ok(())
    }
}

async fn serve_connection<R, W>(
    read_half: R,
    write_half: W,
    peer_addr: SocketAddr,
    manager: Arc<Manager>,
    mut close_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, frame_rx) = Outbox::new(FRAME_QUEUE_CAPACITY);
    let overflowed = outbox.overflow_signal();
    let (write_failed_tx, mut write_failed_rx) = oneshot::channel();
    let connection_id = manager.register_connection(peer_addr, outbox);
    let writer = tokio::spawn(write_frames(write_half, frame_rx, write_failed_tx, peer_addr));

    let mut handler = ConnectionHandler::new(
        connection_id.clone(),
        peer_addr,
        Arc::clone(manager.registry()),
    );

    let outcome = read_frames(
        read_half,
        &mut handler,
        &manager,
        &mut close_rx,
        &mut write_failed_rx,
        &overflowed,
    )
    .await;

    // A stalled writer would never see its queue drain.
    let writer_stalled = matches!(
        &outcome,
        Err(e) if e.error_kind == RelayErrorKind::Backpressure
    );
    if let Err(e) = outcome {
        warn!("Connection {peer_addr} closed after error: {e}");
    }

    close_connection(&mut handler, &manager, &connection_id);

    if writer_stalled {
        writer.abort();
    }
    match writer.await {
        Err(e) if !e.is_cancelled() => error!("Writer task for {peer_addr} failed: {e}"),
        _ => {}
    }
    info!("Client disconnected: {peer_addr}");
}

/// Close path shared by EOF, transport errors, explicit disconnects and shutdown.
fn close_connection(handler: &mut ConnectionHandler, manager: &Manager, connection_id: &ConnectionId) {
    if let Some(farewell) = handler.close() {
        manager.send_message(farewell);
    }
    // Drops the outbox; the writer flushes what is left and exits.
    manager.unregister_connection(connection_id);
}

async fn read_frames<R: AsyncRead + Unpin>(
    read_half: R,
    handler: &mut ConnectionHandler,
    manager: &Manager,
    close_rx: &mut watch::Receiver<bool>,
    write_failed_rx: &mut oneshot::Receiver<()>,
    overflowed: &Notify,
) -> Result<(), Error> {
    let mut reader = BufReader::new(read_half).take(READ_LIMIT);
    let mut frame = Vec::new();

    loop {
        frame.clear();
        reader.set_limit(READ_LIMIT);
        let read = tokio::select! {
            read = reader.read_until(DELIMITER, &mut frame) => read?,
            _ = close_rx.changed() => {
                debug!("Closing connection {} for shutdown", handler.connection_id());
                return Ok(());
            }
            _ = &mut *write_failed_rx => {
                return Err(Error {
                    source: Some("write to peer failed".into()),
                    error_kind: RelayErrorKind::Transport,
                });
            }
            _ = overflowed.notified() => {
                return Err(Error {
                    source: Some(format!("more than {FRAME_QUEUE_CAPACITY} frames queued").into()),
                    error_kind: RelayErrorKind::Backpressure,
                });
            }
        };

        if read == 0 {
            return Ok(());
        }

        if frame.len() > MAX_FRAME_BYTES && frame.last() != Some(&DELIMITER) {
            return Err(Error {
                source: Some(format!("frame exceeds {MAX_FRAME_BYTES} bytes").into()),
                error_kind: RelayErrorKind::Protocol,
            });
        }

        match events::decode(&frame) {
            Ok(event) => {
                if let Some(message) = handler.handle(event) {
                    manager.send_message(message);
                }
                if handler.is_terminated() {
                    return Ok(());
                }
            }
            Err(e) => warn!(
                "Dropping frame from connection {}: {e}",
                handler.connection_id()
            ),
        }
    }
}

async fn write_frames<W: AsyncWrite + Unpin>(
    mut write_half: W,
    mut frames: mpsc::Receiver<Frame>,
    write_failed: oneshot::Sender<()>,
    peer_addr: SocketAddr,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_half.write_all(frame.as_bytes()).await {
            warn!("Failed to write to {peer_addr}: {e}");
            let _ = write_failed.send(());
            return;
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!("Failed to shut down write half for {peer_addr}: {e}");
    }
}
