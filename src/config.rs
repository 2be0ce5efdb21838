use std::path::PathBuf;

use clap::Args;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Where a report job reads its roster and writes its artifact.
#[derive(Debug, Clone, Args)]
pub struct JobConfig {
    /// CSV with `student_id,classroom_id` rows
    #[arg(long, env = "ROSTER_STUDENTS_CSV")]
    pub students_csv: PathBuf,
    /// CSV with `classroom_id,level,grade,section` rows
    #[arg(long, env = "ROSTER_CLASSROOMS_CSV")]
    pub classrooms_csv: PathBuf,
    /// Root directory for report artifacts
    #[arg(long, env = "REPORTS_DIR", default_value = "reports")]
    pub reports_dir: PathBuf,
}

/// Folder label every report is filed under.
pub const REPORTS_FOLDER: &str = "Reportes";

pub const DEFAULT_FETCH_CONCURRENCY: usize = 16;

/// `RUST_LOG` wins over `level` when set. Logs go to stderr so stdout stays
/// parseable.
pub fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
