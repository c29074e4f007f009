//! SQLite session implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params, params_from_iter};
use sessionpool_core::{
    ColumnMeta, PoolError, QueryResult, Result, Row, Session, StatementResult, Tag, TagSchema,
    Value,
};

/// Name of the built-in fix-up procedure
pub const APPLY_SESSION_TAG: &str = "apply_session_tag";

/// A named fix-up procedure run against the raw connection.
///
/// Receives the requested and current tags and returns the tag the session
/// reached.
pub type FixupFn = Arc<
    dyn Fn(&RusqliteConnection, Option<&str>, Option<&str>) -> Result<Option<String>>
        + Send
        + Sync,
>;

/// Fix-up procedures and tag rules shared by every session of a factory
#[derive(Clone, Default)]
pub(crate) struct SessionHooks {
    pub(crate) fixups: HashMap<String, FixupFn>,
    pub(crate) tag_schema: Option<TagSchema>,
}

/// Settings used to open one session
pub(crate) struct OpenOptions<'a> {
    pub(crate) path: &'a str,
    /// Effective user reported by `current_user()`
    pub(crate) user: &'a str,
    pub(crate) stmt_cache_size: usize,
    pub(crate) busy_timeout: Duration,
    pub(crate) hooks: Arc<SessionHooks>,
}

fn sql_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> PoolError {
    move |e| PoolError::Query(format!("{}: {}", context, e))
}

/// Statements that open an implicit transaction when none is active
fn starts_transaction(sql: &str) -> bool {
    let verb = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("");
    ["INSERT", "UPDATE", "DELETE", "REPLACE", "CREATE", "DROP", "ALTER"]
        .iter()
        .any(|v| verb.eq_ignore_ascii_case(v))
}

/// A physical SQLite session
///
/// Data modifications run inside a transaction that is opened implicitly
/// on the first modifying statement and stays open until commit or
/// rollback, so uncommitted work can be discarded when the session goes
/// back to its pool.
pub struct SqliteSession {
    conn: Mutex<Option<RusqliteConnection>>,
    user: String,
    hooks: Arc<SessionHooks>,
}

impl SqliteSession {
    pub(crate) fn open(options: OpenOptions<'_>) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if options.path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                PoolError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            RusqliteConnection::open_with_flags(options.path, flags).map_err(|e| {
                PoolError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    options.path, e
                ))
            })?
        };

        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| PoolError::Connection(format!("Failed to set busy timeout: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| PoolError::Connection(format!("Failed to enable foreign keys: {}", e)))?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| PoolError::Connection(format!("Failed to set journal mode: {}", e)))?;
        conn.set_prepared_statement_cache_capacity(options.stmt_cache_size);

        let user = options.user.to_string();
        let reported = user.clone();
        conn.create_scalar_function(
            "current_user",
            0,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |_ctx| Ok(reported.clone()),
        )
        .map_err(|e| PoolError::Connection(format!("Failed to register current_user(): {}", e)))?;

        conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS session_context (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .map_err(|e| PoolError::Connection(format!("Failed to create session context: {}", e)))?;

        tracing::debug!(path = %options.path, user = %user, journal_mode = %journal_mode, "SQLite session opened");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            user,
            hooks: options.hooks,
        })
    }

    /// Effective user of this session
    pub fn user(&self) -> &str {
        &self.user
    }

    fn with_conn<T>(&self, f: impl FnOnce(&RusqliteConnection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(PoolError::Connection("session is closed".into())),
        }
    }

    /// The session context written by [`apply_session_tag`], in key order
    pub fn session_context(&self) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, value FROM temp.session_context ORDER BY key")
                .map_err(sql_error("Failed to read session context"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(sql_error("Failed to read session context"))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sql_error("Failed to read session context"))
        })
    }
}

/// Built-in fix-up: record every directive of the requested tag in
/// `temp.session_context`, replacing what was there
pub fn apply_session_tag(
    conn: &RusqliteConnection,
    schema: Option<&TagSchema>,
    requested_tag: Option<&str>,
) -> Result<Option<String>> {
    let tag = match requested_tag {
        Some(requested) => {
            let tag = Tag::parse(requested)?;
            if let Some(schema) = schema {
                schema.validate(&tag)?;
            }
            Some(tag)
        }
        None => None,
    };

    conn.execute("DELETE FROM temp.session_context", [])
        .map_err(sql_error("Failed to clear session context"))?;
    if let Some(tag) = &tag {
        for (key, value) in tag.iter() {
            conn.execute(
                "INSERT INTO temp.session_context (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(sql_error("Failed to apply session tag"))?;
        }
    }

    Ok(requested_tag.map(str::to_owned))
}

#[async_trait]
impl Session for SqliteSession {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.with_conn(|conn| {
            if conn.is_autocommit() && starts_transaction(sql) {
                conn.execute_batch("BEGIN IMMEDIATE")
                    .map_err(sql_error("Failed to begin transaction"))?;
            }

            let rusqlite_params = values_to_rusqlite(params);
            let rows_affected = conn
                .execute(sql, params_from_iter(rusqlite_params.iter()))
                .map_err(sql_error("Failed to execute statement"))?;

            tracing::debug!(affected_rows = rows_affected, "statement executed");
            Ok(StatementResult {
                affected_rows: rows_affected as u64,
            })
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();

        self.with_conn(|conn| {
            let rusqlite_params = values_to_rusqlite(params);
            let mut stmt = conn
                .prepare_cached(sql)
                .map_err(sql_error("Failed to prepare query"))?;

            let columns: Vec<ColumnMeta> = stmt
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| ColumnMeta::new(col.name(), col.decl_type().unwrap_or("DYNAMIC"), idx))
                .collect();
            let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

            let mut rows = Vec::new();
            let mut query_rows = stmt
                .query(params_from_iter(rusqlite_params.iter()))
                .map_err(sql_error("Failed to execute query"))?;
            while let Some(row) = query_rows.next().map_err(sql_error("Failed to fetch row"))? {
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    values.push(rusqlite_to_value(row, i)?);
                }
                rows.push(Row::new(column_names.clone(), values));
            }

            let execution_time_ms = start_time.elapsed().as_millis() as u64;
            tracing::debug!(row_count = rows.len(), execution_time_ms, "query executed");
            Ok(QueryResult {
                columns,
                rows,
                execution_time_ms,
            })
        })
    }

    async fn commit(&self) -> Result<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT").map_err(sql_error("Failed to commit"))?;
            }
            Ok(())
        })
    }

    async fn rollback(&self) -> Result<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")
                    .map_err(sql_error("Failed to roll back"))?;
            }
            Ok(())
        })
    }

    fn in_transaction(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| PoolError::Connection(format!("Ping failed: {}", e)))?;
            Ok(())
        })
    }

    async fn run_fixup(
        &self,
        procedure: &str,
        requested_tag: Option<&str>,
        actual_tag: Option<&str>,
    ) -> Result<Option<String>> {
        tracing::debug!(procedure, ?requested_tag, ?actual_tag, "running fix-up procedure");
        self.with_conn(|conn| {
            if let Some(fixup) = self.hooks.fixups.get(procedure) {
                return fixup(conn, requested_tag, actual_tag);
            }
            if procedure == APPLY_SESSION_TAG {
                return apply_session_tag(conn, self.hooks.tag_schema.as_ref(), requested_tag);
            }
            Err(PoolError::Value(format!(
                "unknown fix-up procedure '{}'",
                procedure
            )))
        })
    }

    fn set_statement_cache_size(&self, size: usize) -> Result<()> {
        self.with_conn(|conn| {
            conn.set_prepared_statement_cache_capacity(size);
            Ok(())
        })
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            tracing::debug!(user = %self.user, "closing SQLite session");
            conn.close()
                .map_err(|(_, e)| PoolError::Connection(format!("Failed to close session: {}", e)))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::Decimal(d) => rusqlite::types::Value::Text(d.clone()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Date(d) => rusqlite::types::Value::Text(d.to_string()),
        Value::DateTime(dt) => rusqlite::types::Value::Text(dt.to_string()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| PoolError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_transaction() {
        assert!(starts_transaction("INSERT INTO t VALUES (1)"));
        assert!(starts_transaction("  update t set x = 1"));
        assert!(starts_transaction("CREATE TABLE t (x INTEGER)"));
        assert!(!starts_transaction("SELECT 1"));
        assert!(!starts_transaction("BEGIN"));
        assert!(!starts_transaction("PRAGMA user_version = 1"));
        assert!(!starts_transaction(""));
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(
            value_to_rusqlite(&Value::Bool(true)),
            rusqlite::types::Value::Integer(1)
        );
        assert_eq!(
            value_to_rusqlite(&Value::String("x".into())),
            rusqlite::types::Value::Text("x".into())
        );
    }

    fn open_memory() -> SqliteSession {
        SqliteSession::open(OpenOptions {
            path: ":memory:",
            user: "scott",
            stmt_cache_size: 10,
            busy_timeout: Duration::from_secs(1),
            hooks: Arc::new(SessionHooks::default()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_implicit_transaction_and_rollback() {
        let session = open_memory();
        session
            .execute("CREATE TABLE t (x INTEGER)", &[])
            .await
            .unwrap();
        session.commit().await.unwrap();
        assert!(!session.in_transaction());

        session
            .execute("INSERT INTO t VALUES (?1)", &[Value::Int64(7)])
            .await
            .unwrap();
        assert!(session.in_transaction());
        session.rollback().await.unwrap();

        let result = session.query("SELECT count(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::Int64(0)));
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_current_user_function() {
        let session = open_memory();
        let result = session.query("SELECT current_user()", &[]).await.unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::String("scott".into())));
    }

    #[tokio::test]
    async fn test_apply_session_tag() {
        let session = open_memory();
        let achieved = session
            .run_fixup(APPLY_SESSION_TAG, Some("TIME_ZONE=UTC;LANG=en"), None)
            .await
            .unwrap();
        assert_eq!(achieved.as_deref(), Some("TIME_ZONE=UTC;LANG=en"));
        assert_eq!(
            session.session_context().unwrap(),
            vec![
                ("LANG".to_string(), "en".to_string()),
                ("TIME_ZONE".to_string(), "UTC".to_string()),
            ]
        );

        // A malformed request leaves the context alone
        let err = session
            .run_fixup(APPLY_SESSION_TAG, Some("broken"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Value(_)));
        assert_eq!(session.session_context().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let session = open_memory();
        let err = session.run_fixup("nope", None, None).await.unwrap_err();
        assert!(err.to_string().contains("unknown fix-up procedure 'nope'"));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_work() {
        let session = open_memory();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(session.ping().await.is_err());
        assert!(!session.in_transaction());
        // Closing twice is fine
        session.close().await.unwrap();
    }
}
