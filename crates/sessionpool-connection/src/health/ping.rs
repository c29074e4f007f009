//! Session ping
//!
//! Idle sessions are pinged before reuse when they have been sitting longer
//! than the pool's ping interval.

use std::time::{Duration, Instant};

use sessionpool_core::Session;

/// How long a ping may take before the session is treated as dead
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Round-trip time of a successful ping
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    /// The session reports itself closed
    SessionClosed,
    /// The collaborator's ping failed
    Failed(String),
    /// Ping timed out
    Timeout,
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::SessionClosed => write!(f, "Session is closed"),
            PingError::Failed(msg) => write!(f, "Ping failed: {}", msg),
            PingError::Timeout => write!(f, "Ping timed out"),
        }
    }
}

impl std::error::Error for PingError {}

/// Ping a session and return the round-trip time.
///
/// A closed session fails without touching the collaborator.
pub async fn ping_session(session: &dyn Session, timeout: Duration) -> PingResult {
    if session.is_closed() {
        return Err(PingError::SessionClosed);
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, session.ping()).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::Failed(e.to_string())),
        Err(_) => Err(PingError::Timeout),
    }
}

/// Whether a session idle for `idle_for` is due a ping under `interval`
pub fn ping_due(interval: Option<Duration>, idle_for: Duration) -> bool {
    match interval {
        Some(interval) => idle_for >= interval,
        None => false,
    }
}
