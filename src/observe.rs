//! Request/response observation.
//!
//! Every request is reported before the handler sees it and every response
//! after the handler returns. Reports go to `tracing` at debug level and, when
//! anyone is subscribed, to a broadcast channel of [`Exchange`] events.

use crate::registry::SessionId;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1024;

/// One side of a request/response pair on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Received { session: SessionId, request: Bytes },
    Replied { session: SessionId, response: Bytes },
}

impl Exchange {
    pub fn session(&self) -> SessionId {
        match self {
            Exchange::Received { session, .. } | Exchange::Replied { session, .. } => *session,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeLog {
    tx: broadcast::Sender<Exchange>,
}

impl ExchangeLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        ExchangeLog { tx }
    }

    /// Receive every exchange published from now on. Slow subscribers lag
    /// and lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<Exchange> {
        self.tx.subscribe()
    }

    pub fn received(&self, session: SessionId, peer: SocketAddr, request: &Bytes) {
        debug!(
            session = %session,
            peer = %peer,
            request = %printable(request),
            "Received"
        );
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(Exchange::Received {
                session,
                request: request.clone(),
            });
        }
    }

    pub fn replied(&self, session: SessionId, peer: SocketAddr, response: &Bytes) {
        debug!(
            session = %session,
            peer = %peer,
            response = %printable(response),
            "Replied"
        );
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(Exchange::Replied {
                session,
                response: response.clone(),
            });
        }
    }
}

impl Default for ExchangeLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Lossy text form of a frame with the line ending stripped.
fn printable(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
