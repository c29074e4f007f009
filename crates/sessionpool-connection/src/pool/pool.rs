//! Session pool implementation

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use sessionpool_core::{
    ConnectParams, Credentials, PoolError, Purity, Result, Session, SessionFactory, SessionRequest,
};
use tokio::sync::Notify;
use uuid::Uuid;

use super::callback::SessionCallback;
use super::config::{GetMode, PoolConfig, PoolReconfigure};
use super::connection::{AcquireOptions, PooledConnection, SessionMeta, SessionSlot};
use super::stats::PoolStats;
use crate::health::{DEFAULT_PING_TIMEOUT, ping_due, ping_session};

/// A session sitting in the idle set
struct IdleSession {
    slot: SessionSlot,
    idle_since: Instant,
    /// Returned without a runtime to roll back on; reset on next checkout
    needs_reset: bool,
}

/// Everything guarded by the pool lock
struct PoolState {
    config: PoolConfig,
    /// Least recently used at the front
    idle: VecDeque<IdleSession>,
    opened: usize,
    busy: usize,
    closed: bool,
}

/// What the selection step decided under the lock
enum Checkout {
    Reuse(IdleSession),
    /// `slots` sessions were reserved; `evicted` was taken out of the idle
    /// set to make room and must be closed
    Open {
        slots: usize,
        evicted: Option<IdleSession>,
    },
    Full,
}

pub(super) struct PoolShared {
    id: Uuid,
    factory: Arc<dyn SessionFactory>,
    credentials: Option<Credentials>,
    dsn: String,
    callback: Option<SessionCallback>,
    state: Mutex<PoolState>,
    /// Signalled whenever capacity may have become available
    available: Notify,
    waiting: AtomicUsize,
    next_session_id: AtomicU64,
}

/// Undoes a reservation if the acquire that made it never completes.
///
/// `opened` slots were added to `PoolState::opened` and, if `busy`, one
/// busy count was taken. Dropping an armed guard gives both back.
struct SlotGuard<'a> {
    shared: &'a PoolShared,
    opened: usize,
    busy: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(shared: &'a PoolShared, opened: usize) -> Self {
        Self {
            shared,
            opened,
            busy: true,
        }
    }

    fn disarm(&mut self) {
        self.opened = 0;
        self.busy = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.opened == 0 && !self.busy {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            state.opened = state.opened.saturating_sub(self.opened);
            if self.busy {
                state.busy = state.busy.saturating_sub(1);
            }
        }
        self.shared.available.notify_waiters();
    }
}

/// Counts a caller as waiting for as long as it is parked
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn close_session(session: Box<dyn Session>) {
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "failed to close session");
    }
}

/// Index of the idle session that best serves `options` for `credentials`.
///
/// Only sessions opened with the same user and password qualify.
fn find_idle(
    idle: &VecDeque<IdleSession>,
    credentials: &Credentials,
    options: &AcquireOptions,
) -> Option<usize> {
    let requested = options.tag.as_deref();
    let same_login = |s: &IdleSession| s.slot.meta.credentials == *credentials;

    idle.iter()
        .position(|s| same_login(s) && s.slot.meta.tag.as_deref() == requested)
        .or_else(|| {
            if options.match_any_tag || requested.is_none() {
                idle.iter().position(|s| same_login(s))
            } else {
                None
            }
        })
        .or_else(|| {
            if requested.is_some() {
                idle.iter()
                    .position(|s| same_login(s) && s.slot.meta.tag.is_none())
            } else {
                None
            }
        })
}

impl PoolShared {
    fn config_snapshot(&self) -> PoolConfig {
        self.state.lock().config.clone()
    }

    fn credentials_for(&self, options: &AcquireOptions) -> Result<Credentials> {
        let homogeneous = self.state.lock().config.homogeneous();
        match (&options.credentials, homogeneous) {
            (Some(_), true) => Err(PoolError::Configuration(
                "explicit credentials cannot be used with a homogeneous pool".into(),
            )),
            (Some(credentials), false) => Ok(credentials.clone()),
            (None, _) => self.credentials.clone().ok_or_else(|| {
                PoolError::Configuration(
                    "no user and password supplied and the pool has none".into(),
                )
            }),
        }
    }

    fn session_request(&self, credentials: &Credentials, purity: Purity) -> SessionRequest {
        let config = self.config_snapshot();
        SessionRequest {
            credentials: credentials.clone(),
            dsn: self.dsn.clone(),
            purity,
            stmt_cache_size: config.stmtcachesize(),
            max_sessions_per_shard: config.max_sessions_per_shard(),
        }
    }

    fn new_slot(&self, session: Box<dyn Session>, request: &SessionRequest) -> SessionSlot {
        SessionSlot {
            session,
            meta: SessionMeta {
                id: self.next_session_id.fetch_add(1, Ordering::SeqCst),
                credentials: request.credentials.clone(),
                tag: None,
                created_at: Instant::now(),
                stmt_cache_size: request.stmt_cache_size,
            },
        }
    }

    /// Pick an idle session or reserve capacity for a new one
    fn plan_checkout(&self, credentials: &Credentials, options: &AcquireOptions) -> Result<Checkout> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(PoolError::Closed("the pool has been closed".into()));
        }

        if options.purity != Purity::New
            && let Some(pos) = find_idle(&state.idle, credentials, options)
            && let Some(idle) = state.idle.remove(pos)
        {
            state.busy += 1;
            return Ok(Checkout::Reuse(idle));
        }

        let max = state.config.max();
        if state.opened < max {
            let slots = if !state.config.homogeneous() || options.purity == Purity::New {
                1
            } else {
                state.config.increment().min(max - state.opened)
            };
            state.opened += slots;
            state.busy += 1;
            return Ok(Checkout::Open {
                slots,
                evicted: None,
            });
        }

        // Everything still idle is unusable for this request; trade the
        // least recently used one for a fresh session.
        if let Some(evicted) = state.idle.pop_front() {
            state.busy += 1;
            return Ok(Checkout::Open {
                slots: 1,
                evicted: Some(evicted),
            });
        }

        Ok(Checkout::Full)
    }

    /// Health and lifetime checks for a session leaving the idle set.
    ///
    /// Returns `None` if the session had to be closed; the guard then
    /// gives its slot back.
    async fn prepare_reused(&self, idle: IdleSession, mut guard: SlotGuard<'_>) -> Option<SessionSlot> {
        let IdleSession {
            mut slot,
            idle_since,
            needs_reset,
        } = idle;
        let config = self.config_snapshot();

        if slot.session.is_closed() {
            tracing::debug!(session_id = slot.meta.id, "idle session was closed, discarding");
            return None;
        }

        if needs_reset && let Err(e) = slot.session.rollback().await {
            tracing::warn!(session_id = slot.meta.id, error = %e, "deferred reset failed, closing session");
            close_session(slot.session).await;
            return None;
        }

        if let Some(lifetime) = config.max_lifetime_session()
            && slot.meta.created_at.elapsed() >= lifetime
        {
            tracing::debug!(session_id = slot.meta.id, "session exceeded its lifetime, closing");
            close_session(slot.session).await;
            return None;
        }

        if ping_due(config.ping_interval(), idle_since.elapsed())
            && let Err(e) = ping_session(&*slot.session, DEFAULT_PING_TIMEOUT).await
        {
            tracing::warn!(session_id = slot.meta.id, error = %e, "idle session failed ping, closing");
            close_session(slot.session).await;
            return None;
        }

        if slot.meta.stmt_cache_size != config.stmtcachesize() {
            if let Err(e) = slot.session.set_statement_cache_size(config.stmtcachesize()) {
                tracing::warn!(session_id = slot.meta.id, error = %e, "could not resize statement cache, closing session");
                close_session(slot.session).await;
                return None;
            }
            slot.meta.stmt_cache_size = config.stmtcachesize();
        }

        guard.disarm();
        Some(slot)
    }

    /// Open the caller's session plus any extra reserved sessions.
    ///
    /// Extras go to the idle set. Fails only if no session at all could be
    /// opened, in which case the whole reservation is given back.
    async fn open_reserved(
        &self,
        credentials: &Credentials,
        purity: Purity,
        mut guard: SlotGuard<'_>,
    ) -> Result<SessionSlot> {
        let slots = guard.opened;
        let request = self.session_request(credentials, purity);
        let results = join_all((0..slots).map(|_| self.factory.open(&request))).await;

        let mut sessions = Vec::with_capacity(slots);
        let mut first_error = None;
        for result in results {
            match result {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(user = %request.credentials.user, error = %e, "failed to open session");
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut sessions = sessions.into_iter();
        let Some(caller) = sessions.next() else {
            return Err(first_error
                .unwrap_or_else(|| PoolError::Connection("no session could be opened".into())));
        };
        let caller = self.new_slot(caller, &request);
        let now = Instant::now();
        let mut extras: Vec<IdleSession> = sessions
            .map(|session| IdleSession {
                slot: self.new_slot(session, &request),
                idle_since: now,
                needs_reset: false,
            })
            .collect();
        let failed = slots - 1 - extras.len();

        let pool_closed = {
            let mut state = self.state.lock();
            guard.disarm();
            if state.closed {
                state.opened = state.opened.saturating_sub(slots);
                state.busy = state.busy.saturating_sub(1);
                true
            } else {
                state.opened -= failed;
                state.idle.extend(extras.drain(..));
                false
            }
        };

        if slots > 1 || pool_closed {
            self.available.notify_waiters();
        }
        if pool_closed {
            for idle in extras {
                close_session(idle.slot.session).await;
            }
            close_session(caller.session).await;
            return Err(PoolError::Closed("the pool was closed while opening a session".into()));
        }

        tracing::debug!(
            pool = %self.id,
            session_id = caller.meta.id,
            opened = slots - failed,
            "opened sessions"
        );
        Ok(caller)
    }

    /// Open `min` sessions when the pool is created
    async fn open_initial(&self, credentials: &Credentials, count: usize) -> Result<()> {
        let request = self.session_request(credentials, Purity::Default);
        let results = join_all((0..count).map(|_| self.factory.open(&request))).await;

        let mut sessions = Vec::with_capacity(count);
        let mut first_error = None;
        for result in results {
            match result {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            for session in sessions {
                close_session(session).await;
            }
            return Err(e);
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        state.opened += sessions.len();
        for session in sessions {
            let slot = self.new_slot(session, &request);
            state.idle.push_back(IdleSession {
                slot,
                idle_since: now,
                needs_reset: false,
            });
        }
        Ok(())
    }

    /// Roll back and return a session to the idle set
    pub(super) async fn checkin(&self, slot: SessionSlot, autocommit: bool) -> Result<()> {
        let mut guard = SlotGuard::new(self, 1);

        let mut reset_error = None;
        if !autocommit
            && slot.session.in_transaction()
            && let Err(e) = slot.session.rollback().await
        {
            tracing::warn!(session_id = slot.meta.id, error = %e, "rollback on release failed, closing session");
            reset_error = Some(e);
        }

        let to_close = {
            let mut state = self.state.lock();
            guard.disarm();
            state.busy = state.busy.saturating_sub(1);
            let expired = state
                .config
                .max_lifetime_session()
                .is_some_and(|lifetime| slot.meta.created_at.elapsed() >= lifetime);
            if reset_error.is_some()
                || state.closed
                || state.opened > state.config.max()
                || expired
                || slot.session.is_closed()
            {
                state.opened = state.opened.saturating_sub(1);
                Some(slot.session)
            } else {
                state.idle.push_back(IdleSession {
                    slot,
                    idle_since: Instant::now(),
                    needs_reset: false,
                });
                None
            }
        };
        self.available.notify_waiters();

        if let Some(session) = to_close {
            close_session(session).await;
        }
        self.purge_idle().await;

        match reset_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Implicit release from `Drop`
    pub(super) fn return_on_drop(this: &Arc<Self>, slot: SessionSlot, autocommit: bool) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(this);
            handle.spawn(async move {
                if let Err(e) = shared.checkin(slot, autocommit).await {
                    tracing::warn!(error = %e, "implicit release failed");
                }
            });
            return;
        }

        // No runtime to roll back on. Park the session and reset it on its
        // next checkout.
        let needs_reset = !autocommit && slot.session.in_transaction();
        let dropped = {
            let mut state = this.state.lock();
            state.busy = state.busy.saturating_sub(1);
            if state.closed || state.opened > state.config.max() || slot.session.is_closed() {
                state.opened = state.opened.saturating_sub(1);
                Some(slot)
            } else {
                state.idle.push_back(IdleSession {
                    slot,
                    idle_since: Instant::now(),
                    needs_reset,
                });
                None
            }
        };
        this.available.notify_waiters();
        drop(dropped);
    }

    /// Close a checked-out session and give up its slot
    pub(super) async fn discard(&self, slot: SessionSlot) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.opened = state.opened.saturating_sub(1);
            state.busy = state.busy.saturating_sub(1);
        }
        self.available.notify_waiters();
        tracing::debug!(pool = %self.id, session_id = slot.meta.id, "discarding session");
        slot.session.close().await
    }

    /// Close idle sessions past the idle timeout (while above `min`) or
    /// past their lifetime
    async fn purge_idle(&self) -> usize {
        let expired: Vec<IdleSession> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let timeout = state.config.timeout();
            let lifetime = state.config.max_lifetime_session();
            if timeout.is_none() && lifetime.is_none() {
                return 0;
            }

            let mut expired = Vec::new();
            let mut i = 0;
            while i < state.idle.len() {
                let entry = &state.idle[i];
                let past_lifetime =
                    lifetime.is_some_and(|l| entry.slot.meta.created_at.elapsed() >= l);
                let past_timeout = timeout.is_some_and(|t| entry.idle_since.elapsed() >= t)
                    && state.opened > state.config.min();
                if (past_lifetime || past_timeout)
                    && let Some(entry) = state.idle.remove(i)
                {
                    state.opened -= 1;
                    expired.push(entry);
                } else {
                    i += 1;
                }
            }
            expired
        };

        let count = expired.len();
        if count > 0 {
            tracing::debug!(pool = %self.id, count, "closing expired idle sessions");
            self.available.notify_waiters();
            for entry in expired {
                close_session(entry.slot.session).await;
            }
        }
        count
    }
}

/// Outcome of running a fix-up callback
async fn run_callback(
    callback: &SessionCallback,
    conn: &mut PooledConnection,
    requested_tag: Option<&str>,
) -> Result<()> {
    match callback {
        SessionCallback::Callable(fixup) => fixup.fixup(conn, requested_tag).await,
        SessionCallback::Procedure(name) => {
            let achieved = conn.run_fixup(name, requested_tag, conn.tag()).await?;
            conn.set_tag(achieved.as_deref());
            Ok(())
        }
    }
}

/// A pool of database sessions
///
/// Cloning is cheap and every clone refers to the same pool.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl SessionPool {
    /// Start building a pool on top of `factory`
    pub fn builder<F: SessionFactory>(factory: F) -> SessionPoolBuilder {
        SessionPoolBuilder::new(Arc::new(factory))
    }

    /// Acquire a session with default options
    pub async fn get(&self) -> Result<PooledConnection> {
        self.acquire(AcquireOptions::default()).await
    }

    /// Acquire a session.
    ///
    /// Reuses a suitable idle session if there is one, grows the pool if it
    /// is below `max`, and otherwise waits or fails according to the get
    /// mode. If a session callback is configured and the session's tag
    /// differs from the requested one, the callback runs once before the
    /// session is returned.
    #[tracing::instrument(skip_all, fields(pool = %self.shared.id, tag = ?options.tag))]
    pub async fn acquire(&self, options: AcquireOptions) -> Result<PooledConnection> {
        let shared = &*self.shared;
        let credentials = shared.credentials_for(&options)?;
        shared.purge_idle().await;

        let (getmode, wait_timeout) = {
            let state = shared.state.lock();
            (state.config.getmode(), state.config.wait_timeout())
        };
        let deadline = tokio::time::Instant::now() + wait_timeout;
        let mut waiting: Option<WaitingGuard<'_>> = None;

        let mut conn = loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match shared.plan_checkout(&credentials, &options)? {
                Checkout::Reuse(idle) => {
                    let guard = SlotGuard::new(shared, 1);
                    if let Some(slot) = shared.prepare_reused(idle, guard).await {
                        break PooledConnection::new(slot, Arc::clone(&self.shared));
                    }
                }
                Checkout::Open { slots, evicted } => {
                    let guard = SlotGuard::new(shared, slots);
                    if let Some(evicted) = evicted {
                        tracing::debug!(session_id = evicted.slot.meta.id, "evicting idle session");
                        close_session(evicted.slot.session).await;
                    }
                    let slot = shared.open_reserved(&credentials, options.purity, guard).await?;
                    break PooledConnection::new(slot, Arc::clone(&self.shared));
                }
                Checkout::Full => match getmode {
                    GetMode::NoWait => {
                        return Err(PoolError::Exhausted(
                            "all sessions are busy and the pool is at its maximum size".into(),
                        ));
                    }
                    GetMode::Wait => {
                        waiting.get_or_insert_with(|| WaitingGuard::new(&shared.waiting));
                        notified.await;
                    }
                    GetMode::TimedWait => {
                        waiting.get_or_insert_with(|| WaitingGuard::new(&shared.waiting));
                        if tokio::time::timeout_at(deadline, notified).await.is_err() {
                            return Err(PoolError::Exhausted(format!(
                                "timed out after {:?} waiting for a session",
                                wait_timeout
                            )));
                        }
                    }
                },
            }
        };
        drop(waiting);

        if let Some(callback) = &shared.callback
            && conn.tag() != options.tag.as_deref()
        {
            let original_tag = conn.tag().map(str::to_owned);
            if let Err(e) = run_callback(callback, &mut conn, options.tag.as_deref()).await {
                tracing::warn!(session_id = conn.session_id(), error = %e, "session callback failed");
                conn.restore_tag(original_tag);
                conn.set_autocommit(false);
                if let Err(release_error) = conn.release().await {
                    tracing::warn!(error = %release_error, "could not return session after failed callback");
                }
                return Err(e);
            }
        }

        tracing::trace!(session_id = conn.session_id(), tag = ?conn.tag(), "session acquired");
        Ok(conn)
    }

    /// Return a connection, optionally replacing its tag (an empty tag
    /// clears it)
    pub async fn release(&self, mut conn: PooledConnection, tag: Option<&str>) -> Result<()> {
        if !conn.belongs_to(self) {
            return Err(PoolError::InvalidState(
                "connection was not acquired from this pool".into(),
            ));
        }
        if let Some(tag) = tag {
            conn.set_tag(Some(tag));
        }
        conn.release().await
    }

    /// Close a connection's physical session instead of returning it
    pub async fn drop_connection(&self, conn: PooledConnection) -> Result<()> {
        if !conn.belongs_to(self) {
            return Err(PoolError::InvalidState(
                "connection was not acquired from this pool".into(),
            ));
        }
        conn.discard().await
    }

    /// Apply a partial configuration update.
    ///
    /// The merged configuration is validated as a whole; on failure nothing
    /// changes. Surplus idle sessions are closed when `max` shrinks.
    pub async fn reconfigure(&self, changes: PoolReconfigure) -> Result<()> {
        let surplus: Vec<IdleSession> = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(PoolError::Closed("the pool has been closed".into()));
            }
            let merged = changes.apply(&state.config);
            merged.validate()?;
            state.config = merged;

            let mut surplus = Vec::new();
            while state.opened > state.config.max()
                && let Some(idle) = state.idle.pop_front()
            {
                state.opened -= 1;
                surplus.push(idle);
            }
            surplus
        };

        tracing::info!(pool = %self.shared.id, ?changes, closed = surplus.len(), "pool reconfigured");
        self.shared.available.notify_waiters();
        for idle in surplus {
            close_session(idle.slot.session).await;
        }
        Ok(())
    }

    /// Close idle sessions past the idle timeout or their lifetime.
    /// Returns how many were closed.
    pub async fn purge_idle(&self) -> usize {
        self.shared.purge_idle().await
    }

    /// Close the pool.
    ///
    /// Idle sessions are closed now, busy ones when they are released.
    /// Waiting and future acquires fail with [`PoolError::Closed`].
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<IdleSession> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.opened -= drained.len();
            drained
        };
        self.shared.available.notify_waiters();

        tracing::info!(pool = %self.shared.id, closed = drained.len(), "pool closed");
        for idle in drained {
            close_session(idle.slot.session).await;
        }
        Ok(())
    }

    pub(super) fn owns(&self, shared: &Arc<PoolShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> PoolConfig {
        self.shared.config_snapshot()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats::new(
            state.opened,
            state.busy,
            state.idle.len(),
            self.shared.waiting.load(Ordering::SeqCst),
            state.config.max(),
        )
    }

    pub fn opened(&self) -> usize {
        self.shared.state.lock().opened
    }

    pub fn busy(&self) -> usize {
        self.shared.state.lock().busy
    }

    pub fn min(&self) -> usize {
        self.shared.state.lock().config.min()
    }

    pub fn max(&self) -> usize {
        self.shared.state.lock().config.max()
    }

    pub fn increment(&self) -> usize {
        self.shared.state.lock().config.increment()
    }

    pub fn getmode(&self) -> GetMode {
        self.shared.state.lock().config.getmode()
    }

    pub fn homogeneous(&self) -> bool {
        self.shared.state.lock().config.homogeneous()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.shared.state.lock().config.timeout()
    }

    pub fn wait_timeout(&self) -> Duration {
        self.shared.state.lock().config.wait_timeout()
    }

    pub fn max_lifetime_session(&self) -> Option<Duration> {
        self.shared.state.lock().config.max_lifetime_session()
    }

    pub fn stmtcachesize(&self) -> usize {
        self.shared.state.lock().config.stmtcachesize()
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.shared.state.lock().config.ping_interval()
    }

    pub fn max_sessions_per_shard(&self) -> u32 {
        self.shared.state.lock().config.max_sessions_per_shard()
    }

    /// The pool-level user, if the pool has credentials
    pub fn username(&self) -> Option<&str> {
        self.shared.credentials.as_ref().map(|c| c.user.as_str())
    }

    pub fn dsn(&self) -> &str {
        &self.shared.dsn
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("id", &self.shared.id)
            .field("driver", &self.shared.factory.driver_name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for [`SessionPool`]
pub struct SessionPoolBuilder {
    factory: Arc<dyn SessionFactory>,
    config: PoolConfig,
    params: ConnectParams,
    callback: Option<SessionCallback>,
}

impl SessionPoolBuilder {
    fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            config: PoolConfig::default(),
            params: ConnectParams::default(),
            callback: None,
        }
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Pool-level user, password and connect descriptor
    pub fn params(mut self, params: ConnectParams) -> Self {
        self.params = params;
        self
    }

    pub fn session_callback(mut self, callback: SessionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Validate the configuration and open the initial `min` sessions
    pub async fn build(self) -> Result<SessionPool> {
        self.config.validate()?;
        let credentials = self.params.credentials();
        if self.config.homogeneous() && credentials.is_none() {
            return Err(PoolError::Configuration(
                "a homogeneous pool requires a user and password".into(),
            ));
        }

        let min = self.config.min();
        let shared = Arc::new(PoolShared {
            id: Uuid::new_v4(),
            factory: self.factory,
            credentials,
            dsn: self.params.dsn.unwrap_or_default(),
            callback: self.callback,
            state: Mutex::new(PoolState {
                config: self.config,
                idle: VecDeque::new(),
                opened: 0,
                busy: 0,
                closed: false,
            }),
            available: Notify::new(),
            waiting: AtomicUsize::new(0),
            next_session_id: AtomicU64::new(1),
        });

        // Heterogeneous pools without their own login have nobody to open
        // the initial sessions as.
        if min > 0
            && let Some(credentials) = &shared.credentials
        {
            shared.open_initial(credentials, min).await?;
        }

        tracing::info!(
            pool = %shared.id,
            driver = shared.factory.driver_name(),
            user = ?shared.credentials.as_ref().map(|c| &c.user),
            opened = shared.state.lock().opened,
            "session pool created"
        );
        Ok(SessionPool { shared })
    }
}
