//! Live-session registry and shutdown coordination.
//!
//! The registry is the only state shared between sessions. A session is
//! registered by the dispatcher in the same step that accepts it, and is
//! deregistered when its [`SessionGuard`] drops, which happens on every exit
//! path of the session task (normal close, transport error, panic, or abort).

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// How long to wait for aborted sessions to release their connections.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Unique, never reused, session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct SessionEntry {
    peer: SocketAddr,
    opened_at: Instant,
    abort: Option<AbortHandle>,
}

/// Result of draining sessions at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every session closed within the grace period.
    Drained,
    /// The grace period elapsed; these sessions were force-closed.
    TimedOut { forced: Vec<SessionId> },
}

/// Process-wide set of live sessions plus the shutdown flag.
#[derive(Debug)]
pub struct Registry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    /// Live session count, published for drain waiters.
    live: watch::Sender<usize>,
    shutdown: watch::Sender<bool>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let (live, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Registry {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            live,
            shutdown,
        })
    }

    /// Register a newly accepted session. The returned guard deregisters it
    /// on drop and releases `permit` with it.
    pub fn register(
        self: &Arc<Self>,
        peer: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) -> SessionGuard {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut sessions = self.lock();
        sessions.insert(
            id,
            SessionEntry {
                peer,
                opened_at: Instant::now(),
                abort: None,
            },
        );
        self.live.send_replace(sessions.len());
        drop(sessions);

        debug!(session = %id, peer = %peer, "Session registered");
        SessionGuard {
            registry: Arc::clone(self),
            id,
            peer,
            _permit: permit,
        }
    }

    /// Attach the task handle used to force-close a session. No-op if the
    /// session already ended.
    pub fn attach(&self, id: SessionId, abort: AbortHandle) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.abort = Some(abort);
        }
    }

    /// Remove a session. Called from [`SessionGuard`]'s drop.
    pub fn deregister(&self, id: SessionId) {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.remove(&id) {
            self.live.send_replace(sessions.len());
            drop(sessions);
            debug!(
                session = %id,
                peer = %entry.peer,
                elapsed_ms = entry.opened_at.elapsed().as_millis() as u64,
                "Session deregistered"
            );
        }
    }

    /// Number of sessions currently open.
    pub fn live_count(&self) -> usize {
        *self.live.borrow()
    }

    /// Total sessions registered since startup.
    pub fn total_registered(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    pub fn live_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Flip the shutdown flag. Dispatchers stop accepting and idle sessions
    /// close; sessions mid-exchange finish their current reply first.
    pub fn request_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(live = self.live_count(), "Shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal(self.shutdown.subscribe())
    }

    /// Request shutdown and wait up to `grace` for live sessions to close.
    /// Sessions still open after that are aborted and reported.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.request_shutdown();

        let mut live = self.live.subscribe();
        let drained = tokio::time::timeout(grace, live.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if drained {
            info!("All sessions drained");
            return DrainOutcome::Drained;
        }

        let forced = self.force_close();
        warn!(
            count = forced.len(),
            sessions = ?forced,
            grace_ms = grace.as_millis() as u64,
            "Grace period elapsed, force-closed sessions"
        );

        let _ = tokio::time::timeout(FORCE_CLOSE_WAIT, live.wait_for(|n| *n == 0)).await;
        DrainOutcome::TimedOut { forced }
    }

    fn force_close(&self) -> Vec<SessionId> {
        let sessions = self.lock();
        let mut forced = Vec::with_capacity(sessions.len());
        for (id, entry) in sessions.iter() {
            warn!(session = %id, peer = %entry.peer, "Force-closing session");
            if let Some(abort) = &entry.abort {
                abort.abort();
            }
            forced.push(*id);
        }
        forced.sort();
        forced
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        // A panicking session cannot leave the map half-updated
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped registration of one session.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<Registry>,
    id: SessionId,
    peer: SocketAddr,
    _permit: Option<OwnedSemaphorePermit>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// Receiver side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once shutdown has been requested (or the registry is gone).
    pub async fn recv(&mut self) {
        let _ = self.0.wait_for(|requested| *requested).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}
