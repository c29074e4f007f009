//! Session collaborator traits
//!
//! The pool never talks to a database directly. It asks a [`SessionFactory`]
//! for physical sessions and drives them through the [`Session`] trait:
//! open, close, ping, run a named fix-up procedure, and the transaction
//! controls needed to reset a session on release.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{QueryResult, Result, StatementResult, Value};

/// Whether a request may reuse session state left behind by a previous user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purity {
    /// Reuse a pooled session if one is available
    #[default]
    Default,
    /// Require a brand new session with no prior state
    New,
    /// Reuse of prior state is explicitly acceptable
    #[serde(rename = "self")]
    Self_,
}

/// Username/password pair used to authenticate a session
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Split a `user[proxy]` login into the authenticating user and the
    /// proxied user, if any.
    pub fn proxy_parts(&self) -> (&str, Option<&str>) {
        match self.user.split_once('[') {
            Some((user, rest)) if rest.ends_with(']') && rest.len() > 1 => {
                (user, Some(&rest[..rest.len() - 1]))
            }
            _ => (self.user.as_str(), None),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a factory needs to open one physical session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub credentials: Credentials,
    /// Connect descriptor, opaque to the pool
    pub dsn: String,
    pub purity: Purity,
    pub stmt_cache_size: usize,
    pub max_sessions_per_shard: u32,
}

/// Opens physical sessions on behalf of a pool
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Name of the backing driver (e.g. "sqlite")
    fn driver_name(&self) -> &str;

    /// Open a new physical session
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn Session>>;
}

#[async_trait]
impl<T: SessionFactory> SessionFactory for std::sync::Arc<T> {
    fn driver_name(&self) -> &str {
        (**self).driver_name()
    }

    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn Session>> {
        (**self).open(request).await
    }
}

/// A physical database session
///
/// A session is owned by exactly one holder at a time: the pool's idle set
/// or the caller that acquired it.
#[async_trait]
pub trait Session: Send + Sync {
    /// Get the driver name (e.g., "sqlite")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data or schema
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Commit the open transaction, if any
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction, if any
    async fn rollback(&self) -> Result<()>;

    /// Whether uncommitted work is pending on this session
    fn in_transaction(&self) -> bool;

    /// Verify the session is still alive
    async fn ping(&self) -> Result<()>;

    /// Run a named fix-up procedure that brings the session to the
    /// requested tag. Returns the tag the session actually reached.
    async fn run_fixup(
        &self,
        procedure: &str,
        requested_tag: Option<&str>,
        actual_tag: Option<&str>,
    ) -> Result<Option<String>>;

    /// Resize the statement cache
    fn set_statement_cache_size(&self, _size: usize) -> Result<()> {
        Ok(())
    }

    /// Close the session
    async fn close(&self) -> Result<()>;

    /// Check if the session is closed
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_parts_plain_user() {
        let creds = Credentials::new("scott", "tiger");
        assert_eq!(creds.proxy_parts(), ("scott", None));
    }

    #[test]
    fn test_proxy_parts_with_proxy() {
        let creds = Credentials::new("app[reporting]", "secret");
        assert_eq!(creds.proxy_parts(), ("app", Some("reporting")));
    }

    #[test]
    fn test_proxy_parts_malformed_is_plain() {
        let creds = Credentials::new("app[]", "secret");
        assert_eq!(creds.proxy_parts(), ("app[]", None));
        let creds = Credentials::new("app[reporting", "secret");
        assert_eq!(creds.proxy_parts(), ("app[reporting", None));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("scott", "tiger");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("scott"));
        assert!(!rendered.contains("tiger"));
    }
}
