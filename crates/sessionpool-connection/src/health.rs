//! Session health checks
//!
//! The pool pings an idle session before handing it out when the session
//! has been idle longer than the configured ping interval. A session that
//! fails its ping is closed and another one is selected.

mod ping;


pub use ping::{DEFAULT_PING_TIMEOUT, PingError, PingResult, ping_due, ping_session};
