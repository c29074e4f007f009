//! Session pooling
//!
//! A [`SessionPool`] keeps a set of physical sessions open and hands them
//! out to callers. Sessions can carry a tag describing session-level state
//! that has been applied to them; a configured [`SessionCallback`] brings a
//! session up to the tag a caller asks for.
//!
//! # Example
//!
//! ```ignore
//! use sessionpool_connection::pool::{AcquireOptions, PoolConfig, SessionPool};
//!
//! let pool = SessionPool::builder(factory)
//!     .config(PoolConfig::new(2, 8).with_increment(3))
//!     .params(ConnectParams::new().with_user("scott").with_password("tiger"))
//!     .build()
//!     .await?;
//!
//! let conn = pool.acquire(AcquireOptions::new().with_tag("TIME_ZONE=UTC")).await?;
//! // Use connection...
//! conn.release().await?;
//! ```

mod callback;
mod config;
mod connection;
mod pool;
mod stats;


pub use callback::{SessionCallback, SessionFixup};
pub use config::{CONFIG_KEYS, DEPRECATED_ALIASES, GetMode, PoolConfig, PoolReconfigure};
pub use connection::{AcquireOptions, PooledConnection};
pub use pool::{SessionPool, SessionPoolBuilder};
pub use stats::PoolStats;
