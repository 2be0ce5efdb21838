use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ReportError, Result};
use crate::models::AttendanceReport;

/// Destination for finished reports. The returned id is opaque to callers.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn upload(&self, report: &AttendanceReport, folder: &str, filename: &str)
        -> Result<String>;
}

/// Writes each report to `{root}/{folder}/{filename}` and names the artifact
/// with a fresh id.
#[derive(Debug, Clone)]
pub struct FolderSink {
    root: PathBuf,
}

impl FolderSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ReportSink for FolderSink {
    async fn upload(
        &self,
        report: &AttendanceReport,
        folder: &str,
        filename: &str,
    ) -> Result<String> {
        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ReportError::Sink {
                path: dir.clone(),
                source,
            })?;

        let body = serde_json::to_vec_pretty(report)?;
        let path = dir.join(filename);
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| ReportError::Sink {
                path: path.clone(),
                source,
            })?;

        let artifact_id = Uuid::new_v4().to_string();
        tracing::info!(artifact_id, path = %path.display(), "Report artifact written");
        Ok(artifact_id)
    }
}

pub fn report_filename(report_key: &str, unix_millis: i64) -> String {
    format!("Reporte_{report_key}_{unix_millis}.json")
}
