//! sessionpool - exercise a session pool against a SQLite database

mod logging;
mod prompt;
mod workload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use sessionpool_connection::{PoolConfig, SessionCallback, SessionPool};
use sessionpool_core::{ConnectParams, ParamResolver};
use sessionpool_driver_sqlite::{APPLY_SESSION_TAG, SqliteSessionFactory};

use crate::logging::{LogFormat, LoggingConfig};
use crate::prompt::LinePrompt;
use crate::workload::WorkloadPlan;

#[derive(Parser)]
#[command(name = "sessionpool")]
#[command(about = "Drive a session pool against a SQLite database")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Log pool internals at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tagged insert workload and print pool statistics
    Run {
        /// SQLite database file
        #[arg(long)]
        database: PathBuf,

        /// TOML pool configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pool user
        #[arg(long, env = "SESSIONPOOL_USER")]
        user: Option<String>,

        /// Pool password
        #[arg(long, env = "SESSIONPOOL_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Connect descriptor, overrides --database when set
        #[arg(long, env = "SESSIONPOOL_DSN")]
        dsn: Option<String>,

        /// Number of concurrent workers
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Inserts per worker
        #[arg(short, long, default_value = "25")]
        iterations: usize,

        /// Comma-separated session tags to rotate through
        #[arg(long, default_value = "")]
        tags: String,

        /// Accept any tagged session and let the callback retag it
        #[arg(long)]
        match_any_tag: bool,

        /// Never prompt for missing credentials
        #[arg(long)]
        no_prompt: bool,
    },

    /// Validate a TOML pool configuration
    CheckConfig {
        /// Configuration file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().with_format(cli.log_format);
    if cli.verbose {
        logging = logging.verbose();
    }
    logging::init(logging)?;

    match cli.command {
        Commands::Run {
            database,
            config,
            user,
            password,
            dsn,
            workers,
            iterations,
            tags,
            match_any_tag,
            no_prompt,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => PoolConfig::new(1, workers.max(1)),
            };
            let explicit = ConnectParams {
                user,
                password,
                dsn,
            };
            let params = resolve_params(&explicit, no_prompt)?;
            let plan = WorkloadPlan {
                workers,
                iterations,
                tags: workload::parse_tags(&tags),
                match_any_tag,
            };
            run(&database, config, params, &plan).await
        }
        Commands::CheckConfig { file } => {
            let config = load_config(&file)?;
            println!("{}", config_table(&config)?);
            println!("{} is valid", file.display());
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<PoolConfig> {
    PoolConfig::load(path).with_context(|| format!("invalid pool config {}", path.display()))
}

/// Fill in missing connect parameters. The SQLite factory accepts any
/// login, so a local default stands in when nothing else is given.
fn resolve_params(explicit: &ConnectParams, no_prompt: bool) -> anyhow::Result<ConnectParams> {
    // Flags already read the environment through clap.
    let mut resolver = ParamResolver::with_env(|_| None).with_defaults(
        ConnectParams::new()
            .with_user("sessionpool")
            .with_password(""),
    );
    if !no_prompt && let Some(prompt) = LinePrompt::stdin() {
        resolver = resolver.with_prompt(Arc::new(prompt));
    }
    resolver
        .resolve(explicit)
        .context("failed to resolve connect parameters")
}

async fn run(
    database: &Path,
    config: PoolConfig,
    params: ConnectParams,
    plan: &WorkloadPlan,
) -> anyhow::Result<()> {
    let factory = SqliteSessionFactory::new(database.to_string_lossy());
    let pool = SessionPool::builder(factory)
        .config(config)
        .params(params)
        .session_callback(SessionCallback::procedure(APPLY_SESSION_TAG))
        .build()
        .await
        .with_context(|| format!("failed to create pool on {}", database.display()))?;

    let report = workload::run(&pool, plan).await?;
    println!("{}", workload::report_table(&report));

    pool.close().await.context("failed to close pool")?;
    if report.failed > 0 {
        anyhow::bail!("{} workload iterations failed", report.failed);
    }
    Ok(())
}

fn config_table(config: &PoolConfig) -> anyhow::Result<Table> {
    let fields = match serde_json::to_value(config)? {
        serde_json::Value::Object(fields) => fields,
        other => anyhow::bail!("unexpected config shape: {}", other),
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec![Cell::new("Parameter"), Cell::new("Value")]);
    for (key, value) in fields {
        let rendered = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => "-".to_string(),
            other => other.to_string(),
        };
        table.add_row(vec![Cell::new(key), Cell::new(rendered)]);
    }
    Ok(table)
}
