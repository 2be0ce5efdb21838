use crate::models::{AttendanceMark, DailyAttendance, Level, Outcome};

/// Lateness tolerance per level, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerances {
    pub primary_seconds: i64,
    pub secondary_seconds: i64,
}

impl Tolerances {
    pub fn from_minutes(primary_minutes: i64, secondary_minutes: i64) -> Self {
        Self {
            primary_seconds: primary_minutes.max(0) * 60,
            secondary_seconds: secondary_minutes.max(0) * 60,
        }
    }

    pub fn for_level(&self, level: Level) -> i64 {
        match level {
            Level::Primary => self.primary_seconds,
            Level::Secondary => self.secondary_seconds,
        }
    }
}

/// Arrival-only classification. A missing mark and a mark without an offset
/// are both absences; the boundary `offset == tolerance` is on time.
pub fn classify_mark(mark: Option<&AttendanceMark>, tolerance_seconds: i64) -> Outcome {
    match mark.and_then(|mark| mark.offset_seconds) {
        None => Outcome::Absent,
        Some(offset) if offset > tolerance_seconds => Outcome::Late,
        Some(_) => Outcome::Early,
    }
}

pub fn classify_day(day: &DailyAttendance, tolerance_seconds: i64) -> Outcome {
    classify_mark(day.check_in.as_ref(), tolerance_seconds)
}
