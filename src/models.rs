use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "P")]
    Primary,
    #[serde(rename = "S")]
    Secondary,
}

impl Level {
    /// Single-letter code used in live keys, roster files and payloads.
    pub fn code(self) -> &'static str {
        match self {
            Level::Primary => "P",
            Level::Secondary => "S",
        }
    }

    pub fn grades(self) -> Vec<u8> {
        match self {
            Level::Primary => (1..=6).collect(),
            Level::Secondary => (1..=5).collect(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Primary => write!(f, "primary"),
            Level::Secondary => write!(f, "secondary"),
        }
    }
}

impl FromStr for Level {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "P" | "PRIMARY" | "PRIMARIA" => Ok(Level::Primary),
            "S" | "SECONDARY" | "SECUNDARIA" => Ok(Level::Secondary),
            _ => Err(ReportError::UnknownLevel(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    CheckIn,
    CheckOut,
}

impl CheckMode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "E" => Some(CheckMode::CheckIn),
            "S" => Some(CheckMode::CheckOut),
            _ => None,
        }
    }
}

/// One observed check event. `offset_seconds` is actual minus scheduled time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttendanceMark {
    #[serde(rename = "DesfaseSegundos", default)]
    pub offset_seconds: Option<i64>,
}

impl AttendanceMark {
    pub fn at(offset_seconds: i64) -> Self {
        Self {
            offset_seconds: Some(offset_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAttendance {
    #[serde(rename = "E", default)]
    pub check_in: Option<AttendanceMark>,
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<AttendanceMark>,
}

impl DailyAttendance {
    pub fn set(&mut self, mode: CheckMode, mark: AttendanceMark) {
        match mode {
            CheckMode::CheckIn => self.check_in = Some(mark),
            CheckMode::CheckOut => self.check_out = Some(mark),
        }
    }
}

/// One student's month as stored by the historical store. The day mapping
/// stays encoded until the aggregator folds it.
#[derive(Debug, Clone)]
pub struct MonthlyAttendanceRecord {
    pub student_id: String,
    pub month: u32,
    pub daily_attendances: String,
}

impl MonthlyAttendanceRecord {
    pub fn parse_days(&self) -> Result<BTreeMap<u32, DailyAttendance>, ReportError> {
        let raw: BTreeMap<String, Option<DailyAttendance>> =
            serde_json::from_str(&self.daily_attendances).map_err(|err| self.malformed(err))?;

        let mut days = BTreeMap::new();
        for (key, entry) in raw {
            let day: u32 = key
                .trim()
                .parse()
                .map_err(|_| self.malformed(format!("day key {key:?} is not a number")))?;
            days.insert(day, entry.unwrap_or_default());
        }
        Ok(days)
    }

    fn malformed(&self, reason: impl ToString) -> ReportError {
        ReportError::MalformedDayMapping {
            student_id: self.student_id.clone(),
            month: self.month,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub classroom_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Classroom {
    pub classroom_id: String,
    pub level: Level,
    pub grade: u8,
    pub section: String,
}

/// Inclusive month range; day bounds only restrict the boundary months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from_month: u32,
    pub to_month: u32,
    #[serde(default)]
    pub from_day: Option<u32>,
    #[serde(default)]
    pub to_day: Option<u32>,
}

impl TimeRange {
    #[cfg(test)]
    pub fn months(from_month: u32, to_month: u32) -> Self {
        Self {
            from_month,
            to_month,
            from_day: None,
            to_day: None,
        }
    }

    #[cfg(test)]
    pub fn with_days(mut self, from_day: u32, to_day: u32) -> Self {
        self.from_day = Some(from_day);
        self.to_day = Some(to_day);
        self
    }

    pub fn validate(&self) -> Result<(), ReportError> {
        for month in [self.from_month, self.to_month] {
            if !(1..=12).contains(&month) {
                return Err(ReportError::InvalidRange(format!(
                    "month {month} is outside 1..12"
                )));
            }
        }
        if self.from_month > self.to_month {
            return Err(ReportError::InvalidRange(format!(
                "from_month {} is after to_month {}",
                self.from_month, self.to_month
            )));
        }
        match (self.from_day, self.to_day) {
            (None, None) => Ok(()),
            (Some(from), Some(to)) => {
                for day in [from, to] {
                    if !(1..=31).contains(&day) {
                        return Err(ReportError::InvalidRange(format!(
                            "day {day} is outside 1..31"
                        )));
                    }
                }
                if self.from_month == self.to_month && from > to {
                    return Err(ReportError::InvalidRange(format!(
                        "from_day {from} is after to_day {to}"
                    )));
                }
                Ok(())
            }
            _ => Err(ReportError::InvalidRange(
                "from_day and to_day must be set together".to_string(),
            )),
        }
    }

    pub fn month_span(&self) -> impl Iterator<Item = u32> {
        self.from_month..=self.to_month
    }

    pub fn includes(&self, month: u32, day: u32) -> bool {
        if let (Some(from_day), Some(to_day)) = (self.from_day, self.to_day) {
            if month == self.from_month && day < from_day {
                return false;
            }
            if month == self.to_month && day > to_day {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Early,
    Late,
    Absent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub early: u32,
    pub late: u32,
    pub absent: u32,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: Outcome) {
        self.add(outcome, 1);
    }

    pub fn add(&mut self, outcome: Outcome, count: u32) {
        match outcome {
            Outcome::Early => self.early += count,
            Outcome::Late => self.late += count,
            Outcome::Absent => self.absent += count,
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.early += other.early;
        self.late += other.late;
        self.absent += other.absent;
    }

    #[cfg(test)]
    pub fn total(&self) -> u32 {
        self.early + self.late + self.absent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    ByDay,
    ByMonth,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassroomDayBucket {
    pub total_students: u32,
    /// month -> day -> counts
    pub counts: BTreeMap<u32, BTreeMap<u32, OutcomeCounts>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassroomMonthBucket {
    pub total_students: u32,
    pub counts: BTreeMap<u32, OutcomeCounts>,
}

pub type DayLevelReport = BTreeMap<String, ClassroomDayBucket>;
pub type MonthLevelReport = BTreeMap<String, ClassroomMonthBucket>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttendanceReport {
    ByDay(DayLevelReport),
    ByMonth(MonthLevelReport),
}

impl AttendanceReport {
    pub fn classroom_count(&self) -> usize {
        match self {
            AttendanceReport::ByDay(report) => report.len(),
            AttendanceReport::ByMonth(report) => report.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Pending,
    Error,
    Available,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::Error => "ERROR",
            ReportStatus::Available => "AVAILABLE",
        }
    }
}
