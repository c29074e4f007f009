//! sessionpool connection - the session pool
//!
//! This crate handles the session lifecycle: pool creation, acquire and
//! release, tagging with fix-up callbacks, live reconfiguration and
//! ping-based health checks.

pub mod health;
pub mod pool;

#[cfg(test)]
pub(crate) mod mock;

pub use health::{PingError, PingResult, ping_session};
pub use pool::{
    AcquireOptions, GetMode, PoolConfig, PoolReconfigure, PoolStats, PooledConnection,
    SessionCallback, SessionFixup, SessionPool, SessionPoolBuilder,
};
