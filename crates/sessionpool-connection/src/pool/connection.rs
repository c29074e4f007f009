//! Checked-out sessions

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use sessionpool_core::{
    Credentials, Cursor, Purity, QueryResult, Result, Session, StatementResult, TypeHandler, Value,
};

use super::pool::{PoolShared, SessionPool};

/// Bookkeeping the pool keeps alongside each physical session
#[derive(Debug, Clone)]
pub(super) struct SessionMeta {
    pub(super) id: u64,
    /// Login the session was authenticated with; reuse requires the same
    /// user and password
    pub(super) credentials: Credentials,
    pub(super) tag: Option<String>,
    pub(super) created_at: Instant,
    /// Statement cache size last applied to the session
    pub(super) stmt_cache_size: usize,
}

/// A physical session together with its metadata
pub(super) struct SessionSlot {
    pub(super) session: Box<dyn Session>,
    pub(super) meta: SessionMeta,
}

/// Options for a single acquire
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Per-request login, only valid on heterogeneous pools
    pub credentials: Option<Credentials>,
    /// Tag the caller wants the session to carry
    pub tag: Option<String>,
    /// Accept a session with any tag and let the callback fix it up
    pub match_any_tag: bool,
    pub purity: Purity,
}

impl AcquireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_match_any_tag(mut self, match_any_tag: bool) -> Self {
        self.match_any_tag = match_any_tag;
        self
    }

    pub fn with_purity(mut self, purity: Purity) -> Self {
        self.purity = purity;
        self
    }
}

/// A session checked out of a [`SessionPool`]
///
/// Dereferences to the underlying [`Session`]. Hand it back with
/// [`release`](Self::release), close it with [`discard`](Self::discard), or
/// drop it to release it implicitly.
pub struct PooledConnection {
    slot: Option<SessionSlot>,
    pool: Arc<PoolShared>,
    autocommit: bool,
    type_handler: Option<Arc<dyn TypeHandler>>,
}

impl PooledConnection {
    pub(super) fn new(slot: SessionSlot, pool: Arc<PoolShared>) -> Self {
        Self {
            slot: Some(slot),
            pool,
            autocommit: false,
            type_handler: None,
        }
    }

    fn slot(&self) -> &SessionSlot {
        self.slot.as_ref().expect("session present until released")
    }

    fn slot_mut(&mut self) -> &mut SessionSlot {
        self.slot.as_mut().expect("session present until released")
    }

    /// Pool-assigned identifier of the physical session
    pub fn session_id(&self) -> u64 {
        self.slot().meta.id
    }

    /// Login the session was opened under
    pub fn user(&self) -> &str {
        &self.slot().meta.credentials.user
    }

    pub fn tag(&self) -> Option<&str> {
        self.slot().meta.tag.as_deref()
    }

    /// Set the session's tag. An empty string clears it.
    pub fn set_tag(&mut self, tag: Option<&str>) {
        self.slot_mut().meta.tag = tag.filter(|t| !t.is_empty()).map(str::to_owned);
    }

    pub(super) fn restore_tag(&mut self, tag: Option<String>) {
        self.slot_mut().meta.tag = tag;
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// In autocommit mode every DML statement is committed as it runs and
    /// release skips the rollback
    pub fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    pub fn type_handler(&self) -> Option<&Arc<dyn TypeHandler>> {
        self.type_handler.as_ref()
    }

    pub fn set_type_handler(&mut self, handler: Option<Arc<dyn TypeHandler>>) {
        self.type_handler = handler;
    }

    /// Whether this connection was checked out of `pool`
    pub fn belongs_to(&self, pool: &SessionPool) -> bool {
        pool.owns(&self.pool)
    }

    /// A cursor over this session carrying the connection's type handler
    /// and autocommit mode
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&*self.slot().session)
            .with_connection_type_handler(self.type_handler.clone())
            .with_autocommit(self.autocommit)
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let session = &*self.slot().session;
        let result = session.execute(sql, params).await?;
        if self.autocommit && session.in_transaction() {
            session.commit().await?;
        }
        Ok(result)
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.slot().session.query(sql, params).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.slot().session.commit().await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.slot().session.rollback().await
    }

    /// Return the session to its pool, rolling back uncommitted work
    /// unless the connection is in autocommit mode
    pub async fn release(mut self) -> Result<()> {
        match self.slot.take() {
            Some(slot) => self.pool.checkin(slot, self.autocommit).await,
            None => Ok(()),
        }
    }

    /// Release after replacing the session's tag. An empty tag clears it.
    pub async fn release_with_tag(mut self, tag: &str) -> Result<()> {
        self.set_tag(Some(tag));
        self.release().await
    }

    /// Close the physical session instead of returning it to the pool
    pub async fn discard(mut self) -> Result<()> {
        match self.slot.take() {
            Some(slot) => self.pool.discard(slot).await,
            None => Ok(()),
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        &*self.slot().session
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            PoolShared::return_on_drop(&self.pool, slot, self.autocommit);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PooledConnection");
        if let Some(slot) = &self.slot {
            debug
                .field("session_id", &slot.meta.id)
                .field("user", &slot.meta.credentials.user)
                .field("tag", &slot.meta.tag);
        }
        debug.field("autocommit", &self.autocommit).finish()
    }
}
