//! In-memory session collaborator for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sessionpool_core::{
    ColumnMeta, PoolError, QueryResult, Result, Row, Session, SessionFactory, SessionRequest,
    StatementResult, Value,
};

/// Observable state of one mock session
#[derive(Debug, Default)]
pub struct SessionTracker {
    pub id: usize,
    pub user: String,
    pub in_txn: AtomicBool,
    pub closed: AtomicBool,
    pub fail_ping: AtomicBool,
    pub pings: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub stmt_cache_size: AtomicUsize,
    /// (procedure, requested, actual) for every fix-up run
    pub fixups: Mutex<Vec<(String, Option<String>, Option<String>)>>,
}

pub struct MockSession {
    tracker: Arc<SessionTracker>,
}

#[async_trait]
impl Session for MockSession {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        let verb = sql.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
        if matches!(verb.as_str(), "insert" | "update" | "delete") {
            self.tracker.in_txn.store(true, Ordering::SeqCst);
        }
        Ok(StatementResult { affected_rows: 1 })
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        let mut result = QueryResult::empty();
        result.columns = vec![ColumnMeta::new("session_id", "INTEGER", 0)];
        result.rows = vec![Row::new(
            vec!["session_id".to_string()],
            vec![Value::Int64(self.tracker.id as i64)],
        )];
        Ok(result)
    }

    async fn commit(&self) -> Result<()> {
        self.tracker.commits.fetch_add(1, Ordering::SeqCst);
        self.tracker.in_txn.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.tracker.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.tracker.in_txn.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tracker.in_txn.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        self.tracker.pings.fetch_add(1, Ordering::SeqCst);
        if self.tracker.fail_ping.load(Ordering::SeqCst) {
            return Err(PoolError::Connection("connection reset by peer".into()));
        }
        Ok(())
    }

    async fn run_fixup(
        &self,
        procedure: &str,
        requested_tag: Option<&str>,
        actual_tag: Option<&str>,
    ) -> Result<Option<String>> {
        self.tracker.fixups.lock().push((
            procedure.to_string(),
            requested_tag.map(str::to_owned),
            actual_tag.map(str::to_owned),
        ));
        if procedure == "broken_fixup" {
            return Err(PoolError::Value(format!("cannot apply tag {:?}", requested_tag)));
        }
        Ok(requested_tag.map(str::to_owned))
    }

    fn set_statement_cache_size(&self, size: usize) -> Result<()> {
        self.tracker.stmt_cache_size.store(size, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.tracker.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.tracker.closed.load(Ordering::SeqCst)
    }
}

/// Factory that records every session it opens
#[derive(Default)]
pub struct MockFactory {
    pub sessions: Mutex<Vec<Arc<SessionTracker>>>,
    pub rejected_users: Mutex<HashSet<String>>,
    /// Users that must log in with a specific password
    pub passwords: Mutex<HashMap<String, String>>,
    pub open_delay: Option<Duration>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn reject(&self, user: &str) {
        self.rejected_users.lock().insert(user.to_string());
    }

    pub fn require_password(&self, user: &str, password: &str) {
        self.passwords
            .lock()
            .insert(user.to_string(), password.to_string());
    }

    pub fn opens(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn tracker(&self, id: usize) -> Arc<SessionTracker> {
        Arc::clone(&self.sessions.lock()[id])
    }

    pub fn closed(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|p| p.closed.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn open(&self, request: &SessionRequest) -> Result<Box<dyn Session>> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let credentials = &request.credentials;
        let wrong_password = self
            .passwords
            .lock()
            .get(&credentials.user)
            .is_some_and(|expected| *expected != credentials.password);
        if wrong_password || self.rejected_users.lock().contains(&credentials.user) {
            return Err(PoolError::Authentication(
                "invalid username/password; logon denied".into(),
            ));
        }

        let tracker = {
            let mut sessions = self.sessions.lock();
            let tracker = Arc::new(SessionTracker {
                id: sessions.len(),
                user: request.credentials.user.clone(),
                stmt_cache_size: AtomicUsize::new(request.stmt_cache_size),
                ..SessionTracker::default()
            });
            sessions.push(Arc::clone(&tracker));
            tracker
        };
        Ok(Box::new(MockSession { tracker }))
    }
}
