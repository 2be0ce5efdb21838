use std::collections::BTreeMap;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::Result;
use crate::kv::{KeyValueStore, PartitionedStore, StoredValue};
use crate::models::{AttendanceMark, CheckMode, DailyAttendance, Level};

/// Actor code carried by keys written for students.
pub const STUDENT_ACTOR: &str = "E";

const KEY_FIELDS: usize = 7;

/// A same-day key, `{date}:{mode}:{actor}:{level}:{grade}:{section}:{student}`,
/// parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveKey {
    pub date: NaiveDate,
    pub mode: CheckMode,
    pub actor: String,
    pub level_code: String,
    pub grade: i64,
    pub section: String,
    pub student_id: String,
}

impl LiveKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: Vec<&str> = raw.split(':').collect();
        if fields.len() != KEY_FIELDS || fields.iter().any(|field| field.is_empty()) {
            return None;
        }

        Some(Self {
            date: NaiveDate::parse_from_str(fields[0], "%Y-%m-%d").ok()?,
            mode: CheckMode::from_code(fields[1])?,
            actor: fields[2].to_string(),
            level_code: fields[3].to_string(),
            grade: fields[4].trim().parse().ok()?,
            section: fields[5].to_string(),
            student_id: fields[6].to_string(),
        })
    }

    pub fn matches(&self, level: Level, grade: i64, date: NaiveDate) -> bool {
        self.actor == STUDENT_ACTOR
            && self.date == date
            && self.level_code == level.code()
            && self.grade == grade
    }
}

/// Why a key contributed nothing to the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeSkip {
    MalformedKey,
    OutsideQuery,
    MissingValue,
    NotASequence,
    EmptySequence,
    InvalidOffset(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub malformed_keys: usize,
    pub outside_query: usize,
    pub invalid_values: usize,
}

impl SkipCounts {
    fn record(&mut self, skip: &DecodeSkip) {
        match skip {
            DecodeSkip::MalformedKey => self.malformed_keys += 1,
            DecodeSkip::OutsideQuery => self.outside_query += 1,
            DecodeSkip::MissingValue
            | DecodeSkip::NotASequence
            | DecodeSkip::EmptySequence
            | DecodeSkip::InvalidOffset(_) => self.invalid_values += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentDayAttendance {
    pub students: BTreeMap<String, DailyAttendance>,
    pub skipped: SkipCounts,
    /// Set when the store could not be read; `students` is then empty and
    /// says nothing about who attended.
    pub degraded: bool,
}

/// The first list element, as whole seconds.
pub fn decode_offset(value: Option<StoredValue>) -> std::result::Result<i64, DecodeSkip> {
    let items = match value {
        None => return Err(DecodeSkip::MissingValue),
        Some(StoredValue::Text(_) | StoredValue::Other(_)) => {
            return Err(DecodeSkip::NotASequence)
        }
        Some(StoredValue::List(items)) => items,
    };
    let first = items.first().ok_or(DecodeSkip::EmptySequence)?;
    first
        .trim()
        .parse()
        .map_err(|_| DecodeSkip::InvalidOffset(first.clone()))
}

/// Same-day check-in/check-out state for one level and grade. Store failures
/// degrade to an empty, flagged result instead of an error.
pub async fn decode_current_day(
    store: &dyn PartitionedStore,
    level: Level,
    grade: i64,
    date: NaiveDate,
    concurrency: usize,
) -> CurrentDayAttendance {
    match try_decode_current_day(store.partition(level), level, grade, date, concurrency).await {
        Ok(attendance) => attendance,
        Err(err) => {
            tracing::error!(
                error = %err,
                level = %level,
                grade,
                "Failed to read same-day attendance; returning no data"
            );
            CurrentDayAttendance {
                degraded: true,
                ..CurrentDayAttendance::default()
            }
        }
    }
}

async fn try_decode_current_day(
    partition: &dyn KeyValueStore,
    level: Level,
    grade: i64,
    date: NaiveDate,
    concurrency: usize,
) -> Result<CurrentDayAttendance> {
    let pattern = format!("{}:*", date.format("%Y-%m-%d"));
    let raw_keys = partition.keys_matching(&pattern).await?;
    tracing::debug!(keys = raw_keys.len(), %pattern, "Scanned same-day key space");

    let mut attendance = CurrentDayAttendance::default();
    let mut wanted = Vec::new();
    for raw in raw_keys {
        match LiveKey::parse(&raw) {
            None => attendance.skipped.record(&DecodeSkip::MalformedKey),
            Some(key) if !key.matches(level, grade, date) => {
                attendance.skipped.record(&DecodeSkip::OutsideQuery)
            }
            Some(key) => wanted.push((raw, key)),
        }
    }

    tracing::info!(
        level = %level,
        grade,
        matched = wanted.len(),
        "Filtered same-day keys"
    );

    let fetched: Vec<(String, LiveKey, Result<Option<StoredValue>>)> = stream::iter(wanted)
        .map(|(raw, key)| async move {
            let value = partition.get(&raw).await;
            (raw, key, value)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    for (raw, key, value) in fetched {
        let offset = match decode_offset(value?) {
            Ok(offset) => offset,
            Err(skip) => {
                tracing::warn!(key = %raw, reason = ?skip, "Skipping same-day value");
                attendance.skipped.record(&skip);
                continue;
            }
        };

        attendance
            .students
            .entry(key.student_id)
            .or_default()
            .set(key.mode, AttendanceMark::at(offset));
    }

    let check_ins = attendance
        .students
        .values()
        .filter(|day| day.check_in.is_some())
        .count();
    let check_outs = attendance
        .students
        .values()
        .filter(|day| day.check_out.is_some())
        .count();
    tracing::info!(
        students = attendance.students.len(),
        check_ins,
        check_outs,
        "Decoded same-day attendance"
    );

    Ok(attendance)
}
