//! SQLite session factory

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection as RusqliteConnection;
use sessionpool_core::{
    PoolError, Result, Session, SessionFactory, SessionRequest, TagSchema,
};

use crate::session::{OpenOptions, SessionHooks, SqliteSession};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens [`SqliteSession`]s against one database file
///
/// SQLite has no notion of users, so the factory keeps its own account
/// table. While no account is registered every login is accepted.
pub struct SqliteSessionFactory {
    path: String,
    accounts: HashMap<String, String>,
    proxy_grants: HashMap<String, HashSet<String>>,
    busy_timeout: Duration,
    hooks: Arc<SessionHooks>,
}

impl SqliteSessionFactory {
    /// Create a factory for the database at `path`. A non-empty connect
    /// descriptor in the session request takes precedence over it.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            accounts: HashMap::new(),
            proxy_grants: HashMap::new(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            hooks: Arc::new(SessionHooks::default()),
        }
    }

    pub fn with_account(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.accounts.insert(user.into(), password.into());
        self
    }

    /// Allow `user` to log in as `user[proxy_user]`
    pub fn with_proxy(mut self, user: impl Into<String>, proxy_user: impl Into<String>) -> Self {
        self.proxy_grants
            .entry(user.into())
            .or_default()
            .insert(proxy_user.into());
        self
    }

    /// Register a named fix-up procedure
    pub fn with_fixup<F>(mut self, name: impl Into<String>, fixup: F) -> Self
    where
        F: Fn(&RusqliteConnection, Option<&str>, Option<&str>) -> Result<Option<String>>
            + Send
            + Sync
            + 'static,
    {
        Arc::make_mut(&mut self.hooks)
            .fixups
            .insert(name.into(), Arc::new(fixup));
        self
    }

    /// Restrict the keys and values `apply_session_tag` accepts
    pub fn with_tag_schema(mut self, schema: TagSchema) -> Self {
        Arc::make_mut(&mut self.hooks).tag_schema = Some(schema);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check the login and return the effective user
    fn authenticate<'a>(&self, request: &'a SessionRequest) -> Result<&'a str> {
        let (user, proxy) = request.credentials.proxy_parts();
        if self.accounts.is_empty() {
            return Ok(proxy.unwrap_or(user));
        }

        if self.accounts.get(user) != Some(&request.credentials.password) {
            return Err(PoolError::Authentication(
                "invalid username/password; logon denied".into(),
            ));
        }
        if let Some(proxy) = proxy {
            let granted = self
                .proxy_grants
                .get(user)
                .is_some_and(|grants| grants.contains(proxy));
            if !granted {
                return Err(PoolError::Authentication("proxy user not authorized".into()));
            }
            return Ok(proxy);
        }
        Ok(user)
    }
}

impl std::fmt::Debug for SqliteSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionFactory")
            .field("path", &self.path)
            .field("accounts", &self.accounts.keys().collect::<Vec<_>>())
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

#[async_trait]
impl SessionFactory for SqliteSessionFactory {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, request), fields(user = %request.credentials.user))]
    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn Session>> {
        let user = self.authenticate(request)?;
        let path = if request.dsn.is_empty() {
            self.path.as_str()
        } else {
            request.dsn.as_str()
        };

        let session = SqliteSession::open(OpenOptions {
            path,
            user,
            stmt_cache_size: request.stmt_cache_size,
            busy_timeout: self.busy_timeout,
            hooks: Arc::clone(&self.hooks),
        })?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionpool_core::{Credentials, Purity};

    fn request(user: &str, password: &str) -> SessionRequest {
        SessionRequest {
            credentials: Credentials::new(user, password),
            dsn: ":memory:".into(),
            purity: Purity::Default,
            stmt_cache_size: 20,
            max_sessions_per_shard: 0,
        }
    }

    #[test]
    fn test_no_accounts_accepts_anyone() {
        let factory = SqliteSessionFactory::new(":memory:");
        assert_eq!(factory.authenticate(&request("anyone", "x")).unwrap(), "anyone");
        assert_eq!(
            factory.authenticate(&request("app[report]", "x")).unwrap(),
            "report"
        );
    }

    #[test]
    fn test_wrong_password_rejected() {
        let factory = SqliteSessionFactory::new(":memory:").with_account("scott", "tiger");
        let err = factory.authenticate(&request("scott", "lion")).unwrap_err();
        assert!(matches!(err, PoolError::Authentication(_)));
        assert!(err.to_string().contains("logon denied"));
        assert!(factory.authenticate(&request("nobody", "tiger")).is_err());
    }

    #[test]
    fn test_proxy_requires_grant() {
        let factory = SqliteSessionFactory::new(":memory:")
            .with_account("app", "secret")
            .with_proxy("app", "report");
        assert_eq!(
            factory.authenticate(&request("app[report]", "secret")).unwrap(),
            "report"
        );
        let err = factory
            .authenticate(&request("app[admin]", "secret"))
            .unwrap_err();
        assert!(err.to_string().contains("proxy user not authorized"));
    }

    #[tokio::test]
    async fn test_open_uses_dsn() {
        let factory = SqliteSessionFactory::new("/nonexistent/dir/never.db");
        let session = factory.open(&request("scott", "tiger")).await.unwrap();
        assert_eq!(session.driver_name(), "sqlite");
        session.ping().await.unwrap();
    }
}
