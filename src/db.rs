use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::classify::Tolerances;
use crate::error::Result;
use crate::job::ReportStore;
use crate::models::{Level, MonthlyAttendanceRecord, ReportStatus};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Records the job as pending. Re-running a job with the same key resets it.
pub async fn register_report(pool: &PgPool, report_key: &str, payload: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO attendance_reports.report_jobs (report_key, payload, status, artifact_id)
        VALUES ($1, $2, $3, NULL)
        ON CONFLICT (report_key) DO UPDATE
        SET payload = EXCLUDED.payload,
            status = EXCLUDED.status,
            artifact_id = NULL,
            updated_at = now()
        "#,
    )
    .bind(report_key)
    .bind(payload)
    .bind(ReportStatus::Pending.as_str())
    .execute(pool)
    .await?;

    tracing::info!(report_key, "Registered report job as PENDING");
    Ok(())
}

pub async fn update_report_status(
    pool: &PgPool,
    report_key: &str,
    status: ReportStatus,
    artifact_id: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE attendance_reports.report_jobs
        SET status = $2, artifact_id = $3, updated_at = now()
        WHERE report_key = $1
        "#,
    )
    .bind(report_key)
    .bind(status.as_str())
    .bind(artifact_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!(report_key, status = status.as_str(), "No report job row to update");
    } else {
        tracing::info!(report_key, status = status.as_str(), "Updated report job status");
    }
    Ok(())
}

pub async fn fetch_tolerances(pool: &PgPool) -> Result<Tolerances> {
    let row = sqlx::query(
        r#"
        SELECT late_tolerance_minutes_primary, late_tolerance_minutes_secondary
        FROM attendance_reports.general_settings
        WHERE id = 1
        "#,
    )
    .fetch_one(pool)
    .await?;

    let primary: i32 = row.get("late_tolerance_minutes_primary");
    let secondary: i32 = row.get("late_tolerance_minutes_secondary");
    Ok(Tolerances::from_minutes(primary.into(), secondary.into()))
}

pub async fn fetch_monthly_records(
    pool: &PgPool,
    level: Level,
    grade: u8,
    months: &[u32],
) -> Result<Vec<MonthlyAttendanceRecord>> {
    let months: Vec<i16> = months.iter().map(|month| *month as i16).collect();

    let rows = sqlx::query(
        r#"
        SELECT student_id, month, daily_attendances
        FROM attendance_reports.monthly_attendance
        WHERE level = $1 AND grade = $2 AND month = ANY($3)
        ORDER BY student_id, month
        "#,
    )
    .bind(level.code())
    .bind(i16::from(grade))
    .bind(&months)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let month: i16 = row.get("month");
        records.push(MonthlyAttendanceRecord {
            student_id: row.get("student_id"),
            month: month as u32,
            daily_attendances: row.get("daily_attendances"),
        });
    }

    tracing::debug!(level = %level, grade, records = records.len(), "Fetched monthly attendance");
    Ok(records)
}

#[async_trait]
impl ReportStore for PgPool {
    async fn register(&self, report_key: &str, payload: &str) -> Result<()> {
        register_report(self, report_key, payload).await
    }

    async fn set_status(
        &self,
        report_key: &str,
        status: ReportStatus,
        artifact_id: Option<&str>,
    ) -> Result<()> {
        update_report_status(self, report_key, status, artifact_id).await
    }

    async fn tolerances(&self) -> Result<Tolerances> {
        fetch_tolerances(self).await
    }

    async fn monthly_records(
        &self,
        level: Level,
        grade: u8,
        months: &[u32],
    ) -> Result<Vec<MonthlyAttendanceRecord>> {
        fetch_monthly_records(self, level, grade, months).await
    }
}
