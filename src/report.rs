use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::classify;
use crate::error::Result;
use crate::models::{
    AttendanceReport, Classroom, ClassroomDayBucket, ClassroomMonthBucket, DayLevelReport,
    Granularity, MonthLevelReport, MonthlyAttendanceRecord, Outcome, OutcomeCounts,
    StudentRecord, TimeRange,
};

/// Student id -> classroom id, for the lifetime of one report job.
#[derive(Debug, Clone, Default)]
pub struct StudentIndex {
    classroom_of: HashMap<String, String>,
}

impl StudentIndex {
    pub fn from_records(students: &[StudentRecord]) -> Self {
        let classroom_of = students
            .iter()
            .map(|student| (student.student_id.clone(), student.classroom_id.clone()))
            .collect();
        Self { classroom_of }
    }

    pub fn classroom_of(&self, student_id: &str) -> Option<&str> {
        self.classroom_of.get(student_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classroom_of.len()
    }

    /// Distinct student ids grouped by classroom.
    pub fn members_by_classroom(&self) -> HashMap<&str, HashSet<&str>> {
        let mut members: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (student_id, classroom_id) in &self.classroom_of {
            members
                .entry(classroom_id.as_str())
                .or_default()
                .insert(student_id.as_str());
        }
        members
    }
}

/// What the fold dropped or inferred, exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationStats {
    pub records_seen: usize,
    pub unknown_students: usize,
    pub unselected_classrooms: usize,
    pub months_out_of_range: usize,
    pub days_out_of_range: usize,
    pub days_classified: usize,
    pub absences_inferred: u32,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub report: AttendanceReport,
    pub stats: AggregationStats,
}

pub fn aggregate(
    records: &[MonthlyAttendanceRecord],
    classrooms: &[Classroom],
    students: &StudentIndex,
    range: &TimeRange,
    tolerance_seconds: i64,
    granularity: Granularity,
) -> Result<Aggregation> {
    let (by_day, stats) =
        aggregate_by_day(records, classrooms, students, range, tolerance_seconds)?;

    let report = match granularity {
        Granularity::ByDay => AttendanceReport::ByDay(by_day),
        Granularity::ByMonth => AttendanceReport::ByMonth(collapse_to_months(&by_day, range)),
    };

    tracing::info!(
        granularity = ?granularity,
        classrooms = report.classroom_count(),
        records = stats.records_seen,
        days = stats.days_classified,
        unknown_students = stats.unknown_students,
        unselected_classrooms = stats.unselected_classrooms,
        inferred_absences = stats.absences_inferred,
        "Attendance aggregation complete"
    );

    Ok(Aggregation { report, stats })
}

pub fn aggregate_by_day(
    records: &[MonthlyAttendanceRecord],
    classrooms: &[Classroom],
    students: &StudentIndex,
    range: &TimeRange,
    tolerance_seconds: i64,
) -> Result<(DayLevelReport, AggregationStats)> {
    let members = students.members_by_classroom();
    let mut stats = AggregationStats::default();

    let mut report: DayLevelReport = BTreeMap::new();
    for classroom in classrooms {
        let total_students = members
            .get(classroom.classroom_id.as_str())
            .map_or(0, |set| set.len() as u32);
        report.insert(
            classroom.classroom_id.clone(),
            ClassroomDayBucket {
                total_students,
                counts: range.month_span().map(|month| (month, BTreeMap::new())).collect(),
            },
        );
    }

    // Days each classroom recorded, and who was recorded on each of them.
    let mut calendars: HashMap<&str, BTreeSet<(u32, u32)>> = HashMap::new();
    let mut recorded: HashMap<(&str, u32, u32), HashSet<&str>> = HashMap::new();

    for record in records {
        stats.records_seen += 1;

        let Some(classroom_id) = students.classroom_of(&record.student_id) else {
            stats.unknown_students += 1;
            continue;
        };
        let Some(bucket) = report.get_mut(classroom_id) else {
            stats.unselected_classrooms += 1;
            continue;
        };

        let days = record.parse_days()?;

        let Some(month_counts) = bucket.counts.get_mut(&record.month) else {
            tracing::debug!(
                student = %record.student_id,
                month = record.month,
                "Record month outside requested range"
            );
            stats.months_out_of_range += 1;
            continue;
        };

        for (day, attendance) in &days {
            if !range.includes(record.month, *day) {
                stats.days_out_of_range += 1;
                continue;
            }

            let outcome = classify::classify_day(attendance, tolerance_seconds);
            month_counts.entry(*day).or_default().record(outcome);
            stats.days_classified += 1;

            calendars
                .entry(classroom_id)
                .or_default()
                .insert((record.month, *day));
            recorded
                .entry((classroom_id, record.month, *day))
                .or_default()
                .insert(record.student_id.as_str());
        }
    }

    // Members with no entry on a day their classroom recorded count as absent.
    for (classroom_id, bucket) in report.iter_mut() {
        let enrolled = bucket.total_students;
        let Some(calendar) = calendars.get(classroom_id.as_str()) else {
            continue;
        };
        for &(month, day) in calendar {
            let seen = recorded
                .get(&(classroom_id.as_str(), month, day))
                .map_or(0, |set| set.len() as u32);
            let missing = enrolled.saturating_sub(seen);
            if missing == 0 {
                continue;
            }
            if let Some(month_counts) = bucket.counts.get_mut(&month) {
                month_counts
                    .entry(day)
                    .or_default()
                    .add(Outcome::Absent, missing);
                stats.absences_inferred += missing;
            }
        }
    }

    Ok((report, stats))
}

/// Sums each classroom's day buckets into month buckets. Every month of the
/// range is present, zeroed when no day was recorded.
pub fn collapse_to_months(by_day: &DayLevelReport, range: &TimeRange) -> MonthLevelReport {
    by_day
        .iter()
        .map(|(classroom_id, bucket)| {
            let mut counts: BTreeMap<u32, OutcomeCounts> = range
                .month_span()
                .map(|month| (month, OutcomeCounts::default()))
                .collect();
            for (month, days) in &bucket.counts {
                let entry = counts.entry(*month).or_default();
                for day_counts in days.values() {
                    entry.merge(day_counts);
                }
            }
            (
                classroom_id.clone(),
                ClassroomMonthBucket {
                    total_students: bucket.total_students,
                    counts,
                },
            )
        })
        .collect()
}
