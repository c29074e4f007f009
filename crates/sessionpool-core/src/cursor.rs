//! Cursor over a session, with pluggable type mapping, row construction and
//! statement logging
//!
//! Behaviour is composed at construction time instead of by wrapping or
//! overriding the cursor:
//!
//! - a [`TypeHandler`] can replace the default value mapping of a column;
//!   the cursor-level handler is consulted before the connection-level one
//!   and the first `Some` wins. Handlers run once per column when a
//!   statement executes, not once per row.
//! - a [`RowFactory`] decides how fetched values become a [`Row`].
//! - a [`StatementLogger`] sees every statement before it runs.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::{ColumnMeta, Result, Row, Session, Value};

/// Converts one fetched value of a column
pub type OutputConverter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Overrides the default value mapping for selected columns
pub trait TypeHandler: Send + Sync {
    fn resolve(&self, column: &ColumnMeta) -> Option<OutputConverter>;
}

impl<F> TypeHandler for F
where
    F: Fn(&ColumnMeta) -> Option<OutputConverter> + Send + Sync,
{
    fn resolve(&self, column: &ColumnMeta) -> Option<OutputConverter> {
        self(column)
    }
}

/// Builds a row from converted column values
pub trait RowFactory: Send + Sync {
    fn build(&self, columns: &[ColumnMeta], values: Vec<Value>) -> Row;
}

/// Row factory that lower-cases column names
#[derive(Debug, Clone, Copy, Default)]
pub struct LowercaseRowFactory;

impl RowFactory for LowercaseRowFactory {
    fn build(&self, columns: &[ColumnMeta], values: Vec<Value>) -> Row {
        let names = columns.iter().map(|c| c.name.to_lowercase()).collect();
        Row::new(names, values)
    }
}

/// Observes statements before they execute
pub trait StatementLogger: Send + Sync {
    fn log_statement(&self, sql: &str, params: &[Value]);
}

/// Logs statements through `tracing` at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatementLogger;

impl StatementLogger for TracingStatementLogger {
    fn log_statement(&self, sql: &str, params: &[Value]) {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            param_count = params.len(),
            "executing statement"
        );
    }
}

/// Whether `sql` returns rows rather than modifying data
pub fn is_query_statement(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(
        head.as_str(),
        "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "EXPLAIN"
    )
}

const DEFAULT_ARRAYSIZE: usize = 100;

/// A cursor executing statements on a borrowed session
pub struct Cursor<'a> {
    session: &'a dyn Session,
    type_handler: Option<Arc<dyn TypeHandler>>,
    connection_type_handler: Option<Arc<dyn TypeHandler>>,
    row_factory: Option<Arc<dyn RowFactory>>,
    logger: Option<Arc<dyn StatementLogger>>,
    autocommit: bool,
    arraysize: usize,
    description: Vec<ColumnMeta>,
    pending: VecDeque<Row>,
    rowcount: u64,
}

impl<'a> Cursor<'a> {
    pub fn new(session: &'a dyn Session) -> Self {
        Self {
            session,
            type_handler: None,
            connection_type_handler: None,
            row_factory: None,
            logger: None,
            autocommit: false,
            arraysize: DEFAULT_ARRAYSIZE,
            description: Vec::new(),
            pending: VecDeque::new(),
            rowcount: 0,
        }
    }

    /// Cursor-level type handler, consulted first
    pub fn with_type_handler(mut self, handler: Arc<dyn TypeHandler>) -> Self {
        self.type_handler = Some(handler);
        self
    }

    /// Connection-level type handler, consulted when the cursor-level
    /// handler declines a column
    pub fn with_connection_type_handler(mut self, handler: Option<Arc<dyn TypeHandler>>) -> Self {
        self.connection_type_handler = handler;
        self
    }

    pub fn with_row_factory(mut self, factory: Arc<dyn RowFactory>) -> Self {
        self.row_factory = Some(factory);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn StatementLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Commit after every data-modifying statement
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    pub fn with_arraysize(mut self, arraysize: usize) -> Self {
        self.arraysize = arraysize.max(1);
        self
    }

    /// Execute a statement. Returns the number of rows produced by a query
    /// or affected by a modification.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        if let Some(logger) = &self.logger {
            logger.log_statement(sql, params);
        }

        self.pending.clear();
        self.description.clear();

        if is_query_statement(sql) {
            let result = self.session.query(sql, params).await?;
            let converters: Vec<Option<OutputConverter>> =
                result.columns.iter().map(|c| self.converter_for(c)).collect();

            for row in result.rows {
                let values: Vec<Value> = row
                    .values
                    .into_iter()
                    .zip(converters.iter())
                    .map(|(value, converter)| match converter {
                        Some(convert) => convert(value),
                        None => value,
                    })
                    .collect();
                let row = self.build_row(&result.columns, values);
                self.pending.push_back(row);
            }

            self.description = result.columns;
            self.rowcount = self.pending.len() as u64;
        } else {
            let result = self.session.execute(sql, params).await?;
            if self.autocommit && self.session.in_transaction() {
                self.session.commit().await?;
            }
            self.rowcount = result.affected_rows;
        }

        Ok(self.rowcount)
    }

    fn converter_for(&self, column: &ColumnMeta) -> Option<OutputConverter> {
        self.type_handler
            .as_ref()
            .and_then(|h| h.resolve(column))
            .or_else(|| {
                self.connection_type_handler
                    .as_ref()
                    .and_then(|h| h.resolve(column))
            })
    }

    fn build_row(&self, columns: &[ColumnMeta], values: Vec<Value>) -> Row {
        match &self.row_factory {
            Some(factory) => factory.build(columns, values),
            None => Row::new(columns.iter().map(|c| c.name.clone()).collect(), values),
        }
    }

    /// Column metadata of the last query; empty after a modification
    pub fn description(&self) -> &[ColumnMeta] {
        &self.description
    }

    pub fn rowcount(&self) -> u64 {
        self.rowcount
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn fetch_one(&mut self) -> Option<Row> {
        self.pending.pop_front()
    }

    /// Fetch up to `n` rows, or `arraysize` rows when `n` is `None`
    pub fn fetch_many(&mut self, n: Option<usize>) -> Vec<Row> {
        let n = n.unwrap_or(self.arraysize).min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.pending.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{QueryResult, StatementResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeSession {
        in_txn: AtomicBool,
        commits: AtomicUsize,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                in_txn: AtomicBool::new(false),
                commits: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        fn driver_name(&self) -> &str {
            "fake"
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            self.in_txn.store(true, Ordering::SeqCst);
            Ok(StatementResult { affected_rows: 3 })
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            let columns = vec![
                ColumnMeta::new("ID", "INTEGER", 0),
                ColumnMeta::new("HIRED", "DATE", 1),
            ];
            let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
            let rows = (1..=5)
                .map(|i| {
                    Row::new(
                        names.clone(),
                        vec![Value::Int64(i), Value::String(format!("2024-01-0{}", i))],
                    )
                })
                .collect();
            Ok(QueryResult {
                columns,
                rows,
                ..QueryResult::empty()
            })
        }

        async fn commit(&self) -> Result<()> {
            self.in_txn.store(false, Ordering::SeqCst);
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self) -> Result<()> {
            self.in_txn.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            self.in_txn.load(Ordering::SeqCst)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn run_fixup(
            &self,
            _procedure: &str,
            requested_tag: Option<&str>,
            _actual_tag: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(requested_tag.map(str::to_string))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn date_handler(calls: Arc<AtomicUsize>) -> Arc<dyn TypeHandler> {
        Arc::new(move |column: &ColumnMeta| -> Option<OutputConverter> {
            calls.fetch_add(1, Ordering::SeqCst);
            if column.data_type == "DATE" {
                Some(Arc::new(|value: Value| match value {
                    Value::String(s) => chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                        .map(Value::Date)
                        .unwrap_or(Value::String(s)),
                    other => other,
                }))
            } else {
                None
            }
        })
    }

    #[test]
    fn test_is_query_statement() {
        assert!(is_query_statement("  select 1"));
        assert!(is_query_statement("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_query_statement("INSERT INTO t VALUES (1)"));
        assert!(!is_query_statement("selectivity"));
    }

    #[tokio::test]
    async fn test_type_handler_runs_once_per_column() {
        let session = FakeSession::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cursor = Cursor::new(&session).with_type_handler(date_handler(calls.clone()));

        let count = cursor.execute("SELECT id, hired FROM emp", &[]).await.expect("execute");
        assert_eq!(count, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let row = cursor.fetch_one().expect("row");
        assert!(matches!(row.get(1), Some(Value::Date(_))));
    }

    #[tokio::test]
    async fn test_cursor_handler_beats_connection_handler() {
        let session = FakeSession::new();
        let cursor_handler: Arc<dyn TypeHandler> =
            Arc::new(|column: &ColumnMeta| -> Option<OutputConverter> {
                (column.name == "ID").then(|| {
                    Arc::new(|_: Value| Value::String("cursor".into())) as OutputConverter
                })
            });
        let connection_handler: Arc<dyn TypeHandler> =
            Arc::new(|_: &ColumnMeta| -> Option<OutputConverter> {
                Some(Arc::new(|_: Value| Value::String("connection".into())))
            });

        let mut cursor = Cursor::new(&session)
            .with_type_handler(cursor_handler)
            .with_connection_type_handler(Some(connection_handler));
        cursor.execute("SELECT id, hired FROM emp", &[]).await.expect("execute");

        let row = cursor.fetch_one().expect("row");
        assert_eq!(row.get(0), Some(&Value::String("cursor".into())));
        assert_eq!(row.get(1), Some(&Value::String("connection".into())));
    }

    #[tokio::test]
    async fn test_fetch_many_uses_arraysize() {
        let session = FakeSession::new();
        let mut cursor = Cursor::new(&session).with_arraysize(2);
        cursor.execute("SELECT id FROM emp", &[]).await.expect("execute");

        assert_eq!(cursor.fetch_many(None).len(), 2);
        assert_eq!(cursor.fetch_many(Some(10)).len(), 3);
        assert!(cursor.fetch_all().is_empty());
    }

    #[tokio::test]
    async fn test_row_factory_and_logger() {
        struct Recording(Mutex<Vec<String>>);
        impl StatementLogger for Recording {
            fn log_statement(&self, sql: &str, _params: &[Value]) {
                self.0.lock().unwrap().push(sql.to_string());
            }
        }

        let session = FakeSession::new();
        let logger = Arc::new(Recording(Mutex::new(Vec::new())));
        let mut cursor = Cursor::new(&session)
            .with_row_factory(Arc::new(LowercaseRowFactory))
            .with_logger(logger.clone());

        cursor.execute("SELECT id FROM emp", &[]).await.expect("execute");
        let row = cursor.fetch_one().expect("row");
        assert_eq!(row.get_by_name("id"), Some(&Value::Int64(1)));
        assert_eq!(cursor.description()[0].name, "ID");
        assert_eq!(logger.0.lock().unwrap().as_slice(), ["SELECT id FROM emp"]);
    }

    #[tokio::test]
    async fn test_autocommit_commits_after_dml() {
        let session = FakeSession::new();
        let mut cursor = Cursor::new(&session).with_autocommit(true);
        let affected = cursor.execute("UPDATE emp SET x = 1", &[]).await.expect("execute");

        assert_eq!(affected, 3);
        assert!(cursor.description().is_empty());
        assert!(!session.in_transaction());
        assert_eq!(session.commits.load(Ordering::SeqCst), 1);
    }
}
