use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod classify;
mod config;
mod db;
mod error;
mod job;
mod kv;
mod live;
mod models;
mod report;
mod roster;
mod sink;

use config::JobConfig;
use models::Level;

#[derive(Parser)]
#[command(name = "attendance-reports")]
#[command(about = "School attendance statistics and same-day attendance state", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb {
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,
    },
    /// Generate one attendance report from a JSON payload
    Report {
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,
        /// Report parameters as a JSON object
        #[arg(long)]
        payload: String,
        #[command(flatten)]
        job: JobConfig,
    },
    /// Decode same-day check-ins and check-outs from a key-value snapshot
    CurrentDay {
        /// Education level (P or S)
        #[arg(long)]
        level: Level,
        #[arg(long)]
        grade: i64,
        /// Day to decode (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// JSON dump of both level partitions
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long, env = "LIVE_FETCH_CONCURRENCY", default_value_t = config::DEFAULT_FETCH_CONCURRENCY)]
        concurrency: usize,
    },
}

async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::setup_logging(&cli.log_level);

    match cli.command {
        Commands::InitDb { database_url } => {
            let pool = connect(&database_url).await?;
            let result = db::init_db(&pool).await;
            pool.close().await;
            result?;
            println!("Schema ready.");
        }
        Commands::Report {
            database_url,
            payload,
            job: job_config,
        } => {
            let pool = connect(&database_url).await?;
            let sink = sink::FolderSink::new(&job_config.reports_dir);
            let result = job::run_report_job(&pool, &sink, &job_config, &payload).await;
            pool.close().await;
            tracing::info!("Database connections closed");

            let outcome = result?;
            println!("{}", outcome.artifact_id);
        }
        Commands::CurrentDay {
            level,
            grade,
            date,
            snapshot,
            concurrency,
        } => {
            let store = kv::SnapshotStore::load(&snapshot)?;
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let attendance =
                live::decode_current_day(&store, level, grade, date, concurrency).await;
            println!("{}", serde_json::to_string_pretty(&attendance)?);
        }
    }

    Ok(())
}
