//! Per-connection session loop.
//!
//! A session owns exactly one [`Connection`] and walks it through
//! Reading -> Processing -> Writing until the peer leaves, the handler asks to
//! close, a transport error occurs, or shutdown is requested while the session
//! is waiting for input. Request N's response is always written before request
//! N+1 is read.
//!
//! Shutdown is only observed in the Reading phase, so an exchange that has
//! been read is always answered before the session closes. Once shutdown is
//! requested, requests the peer has already delivered are still answered;
//! the session closes as soon as reading would have to wait.

use crate::error::TransportError;
use crate::observe::ExchangeLog;
use crate::registry::{SessionGuard, ShutdownSignal};
use crate::service::Service;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Longest line a stream session accepts.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

const LINE_TOO_LONG: &[u8] = b"ERROR line too long\n";

/// A duplex channel carrying request frames in and response frames out.
pub trait Connection: Send {
    fn peer(&self) -> SocketAddr;

    /// Wait for the next request frame. `Ok(None)` means the peer is gone.
    ///
    /// Must be cancel-safe: a dropped call loses no buffered input.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send + '_;

    /// Write one response frame in full.
    fn send_frame<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a;

    /// Release the connection. Errors are ignored; the session is over.
    fn close(&mut self) -> impl Future<Output = ()> + Send + '_;
}

/// Newline-delimited frames over a byte stream.
pub struct StreamConnection<S> {
    stream: S,
    peer: SocketAddr,
    /// Bytes read but not yet returned as a frame.
    buffer: BytesMut,
    /// Prefix of `buffer` known to hold no newline.
    scanned: usize,
    max_line: usize,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self::with_max_line(stream, peer, MAX_LINE_LENGTH)
    }

    pub fn with_max_line(stream: S, peer: SocketAddr, max_line: usize) -> Self {
        StreamConnection {
            stream,
            peer,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            scanned: 0,
            max_line,
        }
    }
}

impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send + '_ {
        async move {
            loop {
                let unscanned = &self.buffer[self.scanned..];
                if let Some(pos) = unscanned.iter().position(|&b| b == b'\n') {
                    let end = self.scanned + pos + 1;
                    self.scanned = 0;
                    return Ok(Some(self.buffer.split_to(end).freeze()));
                }
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_line {
                    return Err(TransportError::LineTooLong { max: self.max_line });
                }

                let n = self.stream.read_buf(&mut self.buffer).await?;
                if n == 0 {
                    if !self.buffer.is_empty() {
                        debug!(
                            peer = %self.peer,
                            bytes = self.buffer.len(),
                            "Discarding unterminated line at EOF"
                        );
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn send_frame<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
        async move {
            self.stream.write_all(frame).await?;
            self.stream.flush().await?;
            Ok(())
        }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send + '_ {
        async move {
            let _ = self.stream.shutdown().await;
        }
    }
}

/// One datagram per frame, fed by the datagram dispatcher.
pub struct DatagramConnection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: mpsc::Receiver<Bytes>,
}

impl DatagramConnection {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, inbox: mpsc::Receiver<Bytes>) -> Self {
        DatagramConnection {
            socket,
            peer,
            inbox,
        }
    }
}

impl Connection for DatagramConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send + '_ {
        async move { Ok(self.inbox.recv().await) }
    }

    fn send_frame<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
        async move {
            self.socket.send_to(frame, self.peer).await?;
            Ok(())
        }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send + '_ {
        async move {
            self.inbox.close();
        }
    }
}

/// Session phase, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    Processing,
    Writing,
    Closing,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Peer closed its side.
    PeerClosed,
    /// Handler asked to close after replying.
    Stopped,
    /// Shutdown was requested and no delivered input was left unanswered.
    Shutdown,
    /// Read or write failed, or the idle timeout expired.
    Failed(TransportError),
}

/// Everything a session needs besides its connection.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub service: Arc<Service>,
    pub exchanges: ExchangeLog,
    pub idle_timeout: Option<Duration>,
    pub shutdown: ShutdownSignal,
}

/// Run one session to completion. The guard is dropped on return, which
/// deregisters the session.
pub async fn run<C: Connection>(
    mut conn: C,
    guard: SessionGuard,
    ctx: SessionContext,
) -> SessionEnd {
    let id = guard.id();
    let peer = conn.peer();
    let SessionContext {
        service,
        exchanges,
        idle_timeout,
        mut shutdown,
    } = ctx;

    debug!(session = %id, peer = %peer, service = service.name(), "Session opened");
    let mut handled: u64 = 0;

    let end = loop {
        trace!(session = %id, phase = ?Phase::Reading);
        let frame = if shutdown.is_triggered() {
            match ready_frame(&mut conn).await {
                Some(frame) => frame,
                None => break SessionEnd::Shutdown,
            }
        } else {
            tokio::select! {
                biased;
                _ = shutdown.recv() => continue,
                frame = read_frame(&mut conn, idle_timeout) => frame,
            }
        };

        let request = match frame {
            Ok(Some(request)) => request,
            Ok(None) => break SessionEnd::PeerClosed,
            Err(TransportError::LineTooLong { max }) => {
                warn!(session = %id, peer = %peer, max, "Line too long");
                let _ = conn.send_frame(LINE_TOO_LONG).await;
                break SessionEnd::Failed(TransportError::LineTooLong { max });
            }
            Err(e) => break SessionEnd::Failed(e),
        };

        trace!(session = %id, phase = ?Phase::Processing);
        exchanges.received(id, peer, &request);
        let reply = service.handle(&request);
        exchanges.replied(id, peer, &reply.payload);

        trace!(session = %id, phase = ?Phase::Writing);
        if let Err(e) = conn.send_frame(&reply.payload).await {
            break SessionEnd::Failed(e);
        }
        handled += 1;

        if reply.close {
            break SessionEnd::Stopped;
        }
    };

    trace!(session = %id, phase = ?Phase::Closing);
    conn.close().await;

    match &end {
        SessionEnd::Failed(e) => {
            debug!(session = %id, peer = %peer, handled, error = %e, "Session failed")
        }
        other => debug!(session = %id, peer = %peer, handled, reason = ?other, "Session closed"),
    }
    drop(guard);
    end
}

/// A frame that has already been delivered, without waiting for more input.
async fn ready_frame<C: Connection>(
    conn: &mut C,
) -> Option<Result<Option<Bytes>, TransportError>> {
    // Lets the I/O driver record readiness for bytes that are already queued
    tokio::task::yield_now().await;
    tokio::time::timeout(Duration::ZERO, conn.next_frame()).await.ok()
}

async fn read_frame<C: Connection>(
    conn: &mut C,
    idle_timeout: Option<Duration>,
) -> Result<Option<Bytes>, TransportError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, conn.next_frame())
            .await
            .map_err(|_| TransportError::IdleTimeout(limit))?,
        None => conn.next_frame().await,
    }
}
