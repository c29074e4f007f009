//! sessionpool core - shared types and collaborator traits
//!
//! This crate provides the pieces every other sessionpool crate depends on:
//!
//! - `Session` / `SessionFactory` - the interface to physical database sessions
//! - `PoolError` - the error taxonomy surfaced to pool callers
//! - `Tag` / `TagSchema` - the session tag grammar used by fix-up callbacks
//! - `ConnectParams` / `ParamResolver` - credential and descriptor resolution
//! - `Cursor` - statement execution with type handlers, row factories and
//!   statement loggers
//! - Common types like `Value`, `Row`, `ColumnMeta`

pub mod cursor;
mod error;
pub mod params;
mod session;
pub mod tag;
mod types;

pub use cursor::{
    Cursor, LowercaseRowFactory, OutputConverter, RowFactory, StatementLogger,
    TracingStatementLogger, TypeHandler, is_query_statement,
};
pub use error::*;
pub use params::{ConnectParams, CredentialPrompt, ParamResolver};
pub use session::*;
pub use tag::{Tag, TagSchema};
pub use types::*;
