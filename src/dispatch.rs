//! Turning accepted connections into running sessions.
//!
//! The accept loop only registers and spawns; it never waits on a session.
//! When a session limit is configured and reached, the connection is still
//! accepted, told `ERROR server busy`, and closed.
//!
//! Datagram transports have no accept step. The dispatcher groups datagrams
//! by peer address and feeds each group to its own session through a bounded
//! queue.

use crate::registry::{Registry, SessionGuard};
use crate::session::{self, DatagramConnection, SessionContext, StreamConnection};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Sent to connections rejected because the session limit is reached.
pub const BUSY_RESPONSE: &[u8] = b"ERROR server busy\n";

/// Largest datagram accepted.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Datagrams queued per peer before new ones are dropped.
const DATAGRAM_QUEUE_DEPTH: usize = 64;

/// Pause after accept fails for lack of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Time allowed for telling a rejected client the server is busy.
const BUSY_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

enum Admission {
    Admitted(Option<OwnedSemaphorePermit>),
    Busy,
}

/// Shared state for spawning sessions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    limit: Option<Arc<Semaphore>>,
    context: SessionContext,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        limit: Option<Arc<Semaphore>>,
        context: SessionContext,
    ) -> Self {
        Dispatcher {
            registry,
            limit,
            context,
        }
    }

    fn admit(&self) -> Admission {
        match &self.limit {
            None => Admission::Admitted(None),
            Some(limit) => match Arc::clone(limit).try_acquire_owned() {
                Ok(permit) => Admission::Admitted(Some(permit)),
                Err(_) => Admission::Busy,
            },
        }
    }

    /// Accept stream connections until shutdown is requested. The listener
    /// is dropped on return, so new connections are refused from then on.
    pub async fn serve_stream(self, listener: TcpListener) {
        let mut shutdown = self.registry.shutdown_signal();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.dispatch_stream(stream, peer),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    if is_resource_exhaustion(&e) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        info!(live = self.registry.live_count(), "Stopped accepting connections");
    }

    fn dispatch_stream(&self, stream: TcpStream, peer: SocketAddr) {
        let permit = match self.admit() {
            Admission::Admitted(permit) => permit,
            Admission::Busy => {
                warn!(peer = %peer, "Session limit reached, rejecting connection");
                tokio::spawn(reject_stream(stream));
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = self.registry.register(peer, permit);
        let conn = StreamConnection::new(stream, peer);
        self.spawn_session(conn, guard);
    }

    /// Receive datagrams until shutdown is requested, demultiplexing them
    /// into per-peer sessions.
    pub async fn serve_datagram(self, socket: UdpSocket) {
        let socket = Arc::new(socket);
        let mut shutdown = self.registry.shutdown_signal();
        let mut peers = PeerQueues::default();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            let (n, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "Failed to receive datagram");
                    continue;
                }
            };

            let frame = match peers.route(peer, Bytes::copy_from_slice(&buf[..n])) {
                Route::Queued => continue,
                Route::Dropped => {
                    warn!(peer = %peer, "Session queue full, dropping datagram");
                    continue;
                }
                Route::Unrouted(frame) => frame,
            };

            let permit = match self.admit() {
                Admission::Admitted(permit) => permit,
                Admission::Busy => {
                    warn!(peer = %peer, "Session limit reached, rejecting datagram");
                    let _ = socket.try_send_to(BUSY_RESPONSE, peer);
                    continue;
                }
            };

            let inbox = peers.open(peer, frame);
            let guard = self.registry.register(peer, permit);
            let conn = DatagramConnection::new(Arc::clone(&socket), peer, inbox);
            self.spawn_session(conn, guard);
        }

        info!(live = self.registry.live_count(), "Stopped receiving datagrams");
    }

    fn spawn_session<C>(&self, conn: C, guard: SessionGuard)
    where
        C: session::Connection + 'static,
    {
        let id = guard.id();
        let handle = tokio::spawn(session::run(conn, guard, self.context.clone()));
        self.registry.attach(id, handle.abort_handle());
    }
}

/// Where a received datagram went.
enum Route {
    /// Queued for the peer's running session.
    Queued,
    /// The peer's session is not keeping up.
    Dropped,
    /// No running session for the peer.
    Unrouted(Bytes),
}

/// Queues feeding the running datagram sessions, by peer.
#[derive(Debug, Default)]
struct PeerQueues {
    inboxes: HashMap<SocketAddr, mpsc::Sender<Bytes>>,
}

impl PeerQueues {
    fn route(&mut self, peer: SocketAddr, frame: Bytes) -> Route {
        let Some(inbox) = self.inboxes.get(&peer) else {
            return Route::Unrouted(frame);
        };
        match inbox.try_send(frame) {
            Ok(()) => Route::Queued,
            Err(TrySendError::Full(_)) => Route::Dropped,
            Err(TrySendError::Closed(frame)) => {
                // Previous session for this peer has ended
                self.inboxes.remove(&peer);
                Route::Unrouted(frame)
            }
        }
    }

    /// Open the queue for a new session, starting with `first`.
    fn open(&mut self, peer: SocketAddr, first: Bytes) -> mpsc::Receiver<Bytes> {
        self.inboxes.retain(|_, inbox| !inbox.is_closed());

        let (inbox, rx) = mpsc::channel(DATAGRAM_QUEUE_DEPTH);
        // Fresh queue with room to spare
        let _ = inbox.try_send(first);
        self.inboxes.insert(peer, inbox);
        rx
    }
}

async fn reject_stream(mut stream: TcpStream) {
    let _ = tokio::time::timeout(BUSY_WRITE_TIMEOUT, async {
        stream.write_all(BUSY_RESPONSE).await?;
        stream.shutdown().await
    })
    .await;
}

#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}
