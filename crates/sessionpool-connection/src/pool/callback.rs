//! Session fix-up callbacks
//!
//! A callback brings a reused session's state in line with the tag the
//! caller asked for. It runs at most once per acquire, and only when the
//! session's tag differs from the requested one.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sessionpool_core::Result;

use super::connection::PooledConnection;

/// An in-process fix-up routine.
///
/// The routine is responsible for setting the connection's tag once it
/// has applied the requested state; the pool does not do it for it.
#[async_trait]
pub trait SessionFixup: Send + Sync + 'static {
    async fn fixup(&self, conn: &mut PooledConnection, requested_tag: Option<&str>) -> Result<()>;
}

/// The callback configured on a pool
#[derive(Clone)]
pub enum SessionCallback {
    /// Run in-process against the pooled connection
    Callable(Arc<dyn SessionFixup>),
    /// Run by the session collaborator under this name; the collaborator
    /// reports the tag it reached and the pool records it
    Procedure(String),
}

impl SessionCallback {
    pub fn callable<F: SessionFixup>(fixup: F) -> Self {
        SessionCallback::Callable(Arc::new(fixup))
    }

    pub fn procedure(name: impl Into<String>) -> Self {
        SessionCallback::Procedure(name.into())
    }
}

impl fmt::Debug for SessionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionCallback::Callable(_) => f.write_str("Callable(..)"),
            SessionCallback::Procedure(name) => f.debug_tuple("Procedure").field(name).finish(),
        }
    }
}
