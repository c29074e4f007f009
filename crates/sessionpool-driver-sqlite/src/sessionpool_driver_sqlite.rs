//! SQLite session collaborator for sessionpool
//!
//! Provides a [`SessionFactory`](sessionpool_core::SessionFactory) backed by
//! `rusqlite`, with a small account table for user/password and proxy
//! logins, named fix-up procedures and the stock `apply_session_tag`
//! procedure that records a session tag in `temp.session_context`.

mod factory;
mod session;

pub use factory::SqliteSessionFactory;
pub use session::{APPLY_SESSION_TAG, FixupFn, SqliteSession, apply_session_tag};

pub use rusqlite;
