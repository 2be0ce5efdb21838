use async_trait::async_trait;
use serde::Deserialize;

use crate::classify::Tolerances;
use crate::config::{JobConfig, REPORTS_FOLDER};
use crate::error::{ReportError, Result};
use crate::models::{Granularity, Level, MonthlyAttendanceRecord, ReportStatus, TimeRange};
use crate::report::{self, Aggregation, AggregationStats, StudentIndex};
use crate::roster::{self, ClassroomSelection, Selection};
use crate::sink::{self, ReportSink};

/// Job bookkeeping and historical reads the report job depends on.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn register(&self, report_key: &str, payload: &str) -> Result<()>;
    async fn set_status(
        &self,
        report_key: &str,
        status: ReportStatus,
        artifact_id: Option<&str>,
    ) -> Result<()>;
    async fn tolerances(&self) -> Result<Tolerances>;
    async fn monthly_records(
        &self,
        level: Level,
        grade: u8,
        months: &[u32],
    ) -> Result<Vec<MonthlyAttendanceRecord>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum GradeField {
    Number(u8),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    report_key: String,
    report_type: Granularity,
    range: TimeRange,
    level: Level,
    grade: GradeField,
    section: String,
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub report_key: String,
    pub granularity: Granularity,
    pub range: TimeRange,
    pub selection: ClassroomSelection,
}

impl ReportRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        let payload: RawPayload = serde_json::from_str(raw).map_err(ReportError::InvalidPayload)?;
        payload.range.validate()?;

        let grade = match payload.grade {
            GradeField::Number(grade) => Selection::Only(grade),
            GradeField::Text(text) if text.trim().eq_ignore_ascii_case("T") => Selection::All,
            GradeField::Text(text) => Selection::Only(text.trim().parse().map_err(|_| {
                ReportError::InvalidRange(format!("grade {text:?} is neither a number nor T"))
            })?),
        };
        let section = match payload.section.trim() {
            "T" | "t" => Selection::All,
            section => Selection::Only(section.to_string()),
        };

        Ok(Self {
            report_key: payload.report_key,
            granularity: payload.report_type,
            range: payload.range,
            selection: ClassroomSelection {
                level: payload.level,
                grade,
                section,
            },
        })
    }
}

/// Pulls `report_key` out of a payload that may not decode as a request.
pub fn peek_report_key(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("report_key")?
        .as_str()
        .map(str::to_string)
        .filter(|key| !key.is_empty())
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub artifact_id: String,
    pub stats: AggregationStats,
}

/// Runs one report job end to end. Once the job is registered, any failure
/// marks it `ERROR` before being returned.
pub async fn run_report_job(
    store: &dyn ReportStore,
    sink: &dyn ReportSink,
    config: &JobConfig,
    raw_payload: &str,
) -> anyhow::Result<JobOutcome> {
    let Some(report_key) = peek_report_key(raw_payload) else {
        anyhow::bail!("payload must be a JSON object with a non-empty report_key");
    };

    store.register(&report_key, raw_payload).await?;

    match execute(store, sink, config, raw_payload).await {
        Ok(outcome) => {
            store
                .set_status(
                    &report_key,
                    ReportStatus::Available,
                    Some(&outcome.artifact_id),
                )
                .await?;
            let stats = &outcome.stats;
            tracing::info!(
                report_key,
                artifact_id = %outcome.artifact_id,
                records = stats.records_seen,
                unknown_students = stats.unknown_students,
                unselected_classrooms = stats.unselected_classrooms,
                months_out_of_range = stats.months_out_of_range,
                days_out_of_range = stats.days_out_of_range,
                inferred_absences = stats.absences_inferred,
                "Report job completed"
            );
            Ok(outcome)
        }
        Err(err) => {
            tracing::error!(report_key, error = %err, "Report job failed");
            if let Err(status_err) = store
                .set_status(&report_key, ReportStatus::Error, None)
                .await
            {
                tracing::error!(report_key, error = %status_err, "Could not record ERROR status");
            }
            Err(err.into())
        }
    }
}

async fn execute(
    store: &dyn ReportStore,
    sink: &dyn ReportSink,
    config: &JobConfig,
    raw_payload: &str,
) -> Result<JobOutcome> {
    let request = ReportRequest::parse(raw_payload)?;
    tracing::info!(
        report_key = %request.report_key,
        granularity = ?request.granularity,
        from_month = request.range.from_month,
        to_month = request.range.to_month,
        level = %request.selection.level,
        "Decoded report request"
    );

    let tolerance_seconds = store.tolerances().await?.for_level(request.selection.level);
    tracing::info!(tolerance_seconds, "Loaded lateness tolerance");

    let students = StudentIndex::from_records(&roster::load_students(&config.students_csv)?);
    let classrooms = roster::select_classrooms(
        roster::load_classrooms(&config.classrooms_csv)?,
        &request.selection,
    );
    tracing::info!(
        students = students.len(),
        classrooms = classrooms.len(),
        "Loaded roster"
    );

    let months: Vec<u32> = request.range.month_span().collect();
    let mut records = Vec::new();
    for grade in request.selection.grades() {
        records.extend(
            store
                .monthly_records(request.selection.level, grade, &months)
                .await?,
        );
    }
    tracing::info!(records = records.len(), "Fetched attendance records");

    let Aggregation { report, stats } = report::aggregate(
        &records,
        &classrooms,
        &students,
        &request.range,
        tolerance_seconds,
        request.granularity,
    )?;

    let filename = sink::report_filename(
        &request.report_key,
        chrono::Utc::now().timestamp_millis(),
    );
    let artifact_id = sink.upload(&report, REPORTS_FOLDER, &filename).await?;
    Ok(JobOutcome { artifact_id, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceReport;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        statuses: Mutex<Vec<(String, ReportStatus, Option<String>)>>,
        fetched_grades: Mutex<Vec<u8>>,
        records: Vec<MonthlyAttendanceRecord>,
    }

    #[async_trait]
    impl ReportStore for FakeStore {
        async fn register(&self, report_key: &str, _payload: &str) -> Result<()> {
            self.statuses.lock().unwrap().push((
                report_key.to_string(),
                ReportStatus::Pending,
                None,
            ));
            Ok(())
        }

        async fn set_status(
            &self,
            report_key: &str,
            status: ReportStatus,
            artifact_id: Option<&str>,
        ) -> Result<()> {
            self.statuses.lock().unwrap().push((
                report_key.to_string(),
                status,
                artifact_id.map(str::to_string),
            ));
            Ok(())
        }

        async fn tolerances(&self) -> Result<Tolerances> {
            Ok(Tolerances::from_minutes(5, 10))
        }

        async fn monthly_records(
            &self,
            _level: Level,
            grade: u8,
            months: &[u32],
        ) -> Result<Vec<MonthlyAttendanceRecord>> {
            self.fetched_grades.lock().unwrap().push(grade);
            Ok(self
                .records
                .iter()
                .filter(|record| grade == 3 && months.contains(&record.month))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        uploads: Mutex<Vec<(String, String, AttendanceReport)>>,
    }

    #[async_trait]
    impl ReportSink for CapturingSink {
        async fn upload(
            &self,
            report: &AttendanceReport,
            folder: &str,
            filename: &str,
        ) -> Result<String> {
            self.uploads.lock().unwrap().push((
                folder.to_string(),
                filename.to_string(),
                report.clone(),
            ));
            Ok("artifact-1".to_string())
        }
    }

    struct Roster {
        _students: tempfile::NamedTempFile,
        _classrooms: tempfile::NamedTempFile,
        config: JobConfig,
    }

    fn roster() -> Roster {
        let mut students = tempfile::NamedTempFile::new().unwrap();
        write!(students, "student_id,classroom_id\nS1,A1\nS2,A1\nS3,B1\n").unwrap();
        let mut classrooms = tempfile::NamedTempFile::new().unwrap();
        write!(
            classrooms,
            "classroom_id,level,grade,section\nA1,P,3,A\nB1,P,3,B\nC1,S,3,A\n"
        )
        .unwrap();
        let config = JobConfig {
            students_csv: students.path().to_path_buf(),
            classrooms_csv: classrooms.path().to_path_buf(),
            reports_dir: std::path::PathBuf::from("unused"),
        };
        Roster {
            _students: students,
            _classrooms: classrooms,
            config,
        }
    }

    fn records() -> Vec<MonthlyAttendanceRecord> {
        vec![MonthlyAttendanceRecord {
            student_id: "S1".to_string(),
            month: 3,
            daily_attendances: r#"{"5": {"E": {"DesfaseSegundos": 30}}}"#.to_string(),
        }]
    }

    #[test]
    fn parses_request_with_all_selectors() {
        let request = ReportRequest::parse(
            r#"{"report_key": "K1", "report_type": "by_month",
                "range": {"from_month": 3, "to_month": 5, "from_day": 10, "to_day": 20},
                "level": "S", "grade": "T", "section": "T"}"#,
        )
        .unwrap();

        assert_eq!(request.granularity, Granularity::ByMonth);
        assert_eq!(request.range, TimeRange::months(3, 5).with_days(10, 20));
        assert_eq!(request.selection.level, Level::Secondary);
        assert_eq!(request.selection.grade, Selection::All);
        assert_eq!(request.selection.grades(), vec![1, 2, 3, 4, 5]);
        assert_eq!(request.selection.section, Selection::All);
    }

    #[test]
    fn parses_numeric_grade_given_as_text() {
        let request = ReportRequest::parse(
            r#"{"report_key": "K1", "report_type": "by_day",
                "range": {"from_month": 3, "to_month": 3},
                "level": "P", "grade": "4", "section": "B"}"#,
        )
        .unwrap();
        assert_eq!(request.selection.grade, Selection::Only(4));
        assert_eq!(request.selection.section, Selection::Only("B".to_string()));
    }

    #[test]
    fn rejects_invalid_requests() {
        let bad_range = r#"{"report_key": "K1", "report_type": "by_day",
            "range": {"from_month": 6, "to_month": 3}, "level": "P", "grade": 3, "section": "A"}"#;
        assert!(matches!(
            ReportRequest::parse(bad_range),
            Err(ReportError::InvalidRange(_))
        ));

        let bad_type = r#"{"report_key": "K1", "report_type": "weekly",
            "range": {"from_month": 3, "to_month": 3}, "level": "P", "grade": 3, "section": "A"}"#;
        assert!(matches!(
            ReportRequest::parse(bad_type),
            Err(ReportError::InvalidPayload(_))
        ));
    }

    #[test]
    fn peeks_report_key_from_partial_payloads() {
        assert_eq!(
            peek_report_key(r#"{"report_key": "K9", "report_type": 42}"#),
            Some("K9".to_string())
        );
        assert_eq!(peek_report_key(r#"{"report_key": ""}"#), None);
        assert_eq!(peek_report_key("not json"), None);
    }

    #[tokio::test]
    async fn successful_job_uploads_and_marks_available() {
        let roster = roster();
        let mut with_stranger = records();
        with_stranger.push(MonthlyAttendanceRecord {
            student_id: "S404".to_string(),
            month: 3,
            daily_attendances: r#"{"5": {"E": {"DesfaseSegundos": 0}}}"#.to_string(),
        });
        let store = FakeStore {
            records: with_stranger,
            ..FakeStore::default()
        };
        let sink = CapturingSink::default();
        let payload = r#"{"report_key": "D3A6BP4A", "report_type": "by_day",
            "range": {"from_month": 3, "to_month": 3},
            "level": "P", "grade": 3, "section": "A"}"#;

        let outcome = run_report_job(&store, &sink, &roster.config, payload)
            .await
            .unwrap();
        assert_eq!(outcome.artifact_id, "artifact-1");
        assert_eq!(outcome.stats.records_seen, 2);
        assert_eq!(outcome.stats.unknown_students, 1);
        assert_eq!(outcome.stats.absences_inferred, 1);

        let statuses = store.statuses.lock().unwrap();
        let transitions: Vec<ReportStatus> = statuses.iter().map(|(_, s, _)| *s).collect();
        assert_eq!(
            transitions,
            vec![ReportStatus::Pending, ReportStatus::Available]
        );
        assert_eq!(statuses[1].2.as_deref(), Some("artifact-1"));

        let uploads = sink.uploads.lock().unwrap();
        let (folder, filename, report) = &uploads[0];
        assert_eq!(folder, "Reportes");
        assert!(filename.starts_with("Reporte_D3A6BP4A_"));
        let AttendanceReport::ByDay(report) = report else {
            panic!("expected a day-level report");
        };
        assert_eq!(report.keys().collect::<Vec<_>>(), vec!["A1"]);
        let day = report["A1"].counts[&3][&5];
        assert_eq!((day.early, day.late, day.absent), (1, 0, 1));
        assert_eq!(*store.fetched_grades.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn failing_job_marks_error() {
        let roster = roster();
        let store = FakeStore {
            records: vec![MonthlyAttendanceRecord {
                student_id: "S1".to_string(),
                month: 3,
                daily_attendances: "{broken".to_string(),
            }],
            ..FakeStore::default()
        };
        let sink = CapturingSink::default();
        let payload = r#"{"report_key": "K2", "report_type": "by_month",
            "range": {"from_month": 3, "to_month": 3},
            "level": "P", "grade": "T", "section": "T"}"#;

        assert!(run_report_job(&store, &sink, &roster.config, payload)
            .await
            .is_err());

        let transitions: Vec<ReportStatus> = store
            .statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s, _)| *s)
            .collect();
        assert_eq!(transitions, vec![ReportStatus::Pending, ReportStatus::Error]);
        assert_eq!(
            *store.fetched_grades.lock().unwrap(),
            vec![1, 2, 3, 4, 5, 6]
        );
        assert!(sink.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_request_is_marked_error() {
        let roster = roster();
        let store = FakeStore::default();
        let sink = CapturingSink::default();

        let payload = r#"{"report_key": "K3", "report_type": "by_day"}"#;
        assert!(run_report_job(&store, &sink, &roster.config, payload)
            .await
            .is_err());

        let transitions: Vec<ReportStatus> = store
            .statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s, _)| *s)
            .collect();
        assert_eq!(transitions, vec![ReportStatus::Pending, ReportStatus::Error]);
    }

    #[tokio::test]
    async fn payload_without_key_is_rejected_before_registration() {
        let roster = roster();
        let store = FakeStore::default();
        let sink = CapturingSink::default();

        assert!(run_report_job(&store, &sink, &roster.config, "{}")
            .await
            .is_err());
        assert!(store.statuses.lock().unwrap().is_empty());
    }
}
