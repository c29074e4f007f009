//! Tagged insert workload
//!
//! Each worker acquires a session with the next tag in its rotation,
//! inserts one row and commits. The pool's session callback brings every
//! session to the requested tag before the worker sees it.

use std::time::{Duration, Instant};

use anyhow::Context;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use sessionpool_connection::{AcquireOptions, PoolStats, SessionPool};
use sessionpool_core::Value;
use tokio::task::JoinSet;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS workload_events (
    id INTEGER PRIMARY KEY,
    worker INTEGER NOT NULL,
    iteration INTEGER NOT NULL,
    session_tag TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    pub workers: usize,
    pub iterations: usize,
    /// Tags handed out round-robin; empty means untagged acquires
    pub tags: Vec<String>,
    pub match_any_tag: bool,
}

impl WorkloadPlan {
    fn options_for(&self, worker: usize, iteration: usize) -> AcquireOptions {
        let options = AcquireOptions::new().with_match_any_tag(self.match_any_tag);
        if self.tags.is_empty() {
            return options;
        }
        options.with_tag(self.tags[(worker + iteration) % self.tags.len()].clone())
    }
}

/// What a finished run did
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadReport {
    pub inserted: usize,
    pub failed: usize,
    /// Acquires that came back carrying the requested tag
    pub tag_hits: usize,
    pub elapsed: Duration,
    pub stats: PoolStats,
}

/// Split a `--tags` argument: tags are separated by commas, and each tag
/// may hold several `;`-separated directives
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

pub async fn prepare(pool: &SessionPool) -> anyhow::Result<()> {
    let conn = pool.get().await.context("failed to acquire a session")?;
    conn.execute(CREATE_TABLE, &[])
        .await
        .context("failed to create workload table")?;
    conn.commit().await?;
    conn.release().await?;
    Ok(())
}

#[tracing::instrument(skip_all, fields(workers = plan.workers, iterations = plan.iterations))]
pub async fn run(pool: &SessionPool, plan: &WorkloadPlan) -> anyhow::Result<WorkloadReport> {
    prepare(pool).await?;

    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for worker in 0..plan.workers {
        let pool = pool.clone();
        let plan = plan.clone();
        tasks.spawn(async move { run_worker(pool, plan, worker).await });
    }

    let mut report = WorkloadReport {
        inserted: 0,
        failed: 0,
        tag_hits: 0,
        elapsed: Duration::ZERO,
        stats: PoolStats::default(),
    };
    while let Some(joined) = tasks.join_next().await {
        let (inserted, failed, tag_hits) = joined.context("worker task panicked")?;
        report.inserted += inserted;
        report.failed += failed;
        report.tag_hits += tag_hits;
    }
    report.elapsed = start.elapsed();
    report.stats = pool.stats();

    tracing::info!(
        inserted = report.inserted,
        failed = report.failed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "workload finished"
    );
    Ok(report)
}

async fn run_worker(pool: SessionPool, plan: WorkloadPlan, worker: usize) -> (usize, usize, usize) {
    let (mut inserted, mut failed, mut tag_hits) = (0, 0, 0);
    for iteration in 0..plan.iterations {
        let options = plan.options_for(worker, iteration);
        let requested = options.tag.clone();
        match insert_one(&pool, options, worker, iteration).await {
            Ok(tag) => {
                inserted += 1;
                if requested.is_some() && tag == requested {
                    tag_hits += 1;
                }
            }
            Err(e) => {
                tracing::warn!(worker, iteration, error = %e, "workload iteration failed");
                failed += 1;
            }
        }
    }
    (inserted, failed, tag_hits)
}

async fn insert_one(
    pool: &SessionPool,
    options: AcquireOptions,
    worker: usize,
    iteration: usize,
) -> sessionpool_core::Result<Option<String>> {
    let conn = pool.acquire(options).await?;
    let tag = conn.tag().map(str::to_owned);
    conn.execute(
        "INSERT INTO workload_events (worker, iteration, session_tag) VALUES (?1, ?2, ?3)",
        &[
            Value::Int64(worker as i64),
            Value::Int64(iteration as i64),
            tag.clone().map(Value::String).unwrap_or(Value::Null),
        ],
    )
    .await?;
    conn.commit().await?;
    conn.release().await?;
    Ok(tag)
}

pub fn report_table(report: &WorkloadReport) -> Table {
    let stats = &report.stats;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Metric"), Cell::new("Value")]);

    let rows = [
        ("rows inserted", report.inserted.to_string()),
        ("failed iterations", report.failed.to_string()),
        ("tagged acquires", report.tag_hits.to_string()),
        ("elapsed", format!("{:.2?}", report.elapsed)),
        ("sessions opened", stats.opened().to_string()),
        ("sessions busy", stats.busy().to_string()),
        ("sessions idle", stats.idle().to_string()),
        ("waiting", stats.waiting().to_string()),
        ("max", stats.max().to_string()),
        ("utilization", format!("{:.0}%", stats.utilization() * 100.0)),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sessionpool_connection::{PoolConfig, SessionCallback};
    use sessionpool_core::ConnectParams;
    use sessionpool_driver_sqlite::{APPLY_SESSION_TAG, SqliteSessionFactory};

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            parse_tags("TIME_ZONE=UTC, LANG=en;TIME_ZONE=MST,,"),
            vec!["TIME_ZONE=UTC".to_string(), "LANG=en;TIME_ZONE=MST".to_string()]
        );
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_tags_rotate_per_worker() {
        let plan = WorkloadPlan {
            workers: 2,
            iterations: 3,
            tags: vec!["a=1".into(), "b=2".into()],
            match_any_tag: true,
        };
        assert_eq!(plan.options_for(0, 0).tag.as_deref(), Some("a=1"));
        assert_eq!(plan.options_for(0, 1).tag.as_deref(), Some("b=2"));
        assert_eq!(plan.options_for(1, 0).tag.as_deref(), Some("b=2"));
        assert!(plan.options_for(1, 0).match_any_tag);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_inserts_every_iteration() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("workload.db");
        let pool = SessionPool::builder(SqliteSessionFactory::new(path.to_string_lossy()))
            .config(PoolConfig::new(1, 2))
            .params(ConnectParams::new().with_user("scott").with_password("tiger"))
            .session_callback(SessionCallback::procedure(APPLY_SESSION_TAG))
            .build()
            .await
            .unwrap();

        let plan = WorkloadPlan {
            workers: 3,
            iterations: 4,
            tags: parse_tags("TIME_ZONE=UTC,TIME_ZONE=MST"),
            match_any_tag: true,
        };
        let report = run(&pool, &plan).await.unwrap();

        assert_eq!(report.inserted, 12);
        assert_eq!(report.failed, 0);
        assert_eq!(report.tag_hits, 12);
        assert_eq!(report.stats.busy(), 0);
        assert!(report.stats.opened() <= 2);

        let rendered = report_table(&report).to_string();
        assert!(rendered.contains("rows inserted"));
        assert!(rendered.contains("12"));
    }
}
