use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{ReportError, Result};
use crate::models::{Classroom, Level, StudentRecord};

/// `"T"` (all) or one concrete value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    All,
    Only(T),
}

impl<T: PartialEq> Selection<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(expected) => expected == value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassroomSelection {
    pub level: Level,
    pub grade: Selection<u8>,
    pub section: Selection<String>,
}

impl ClassroomSelection {
    pub fn admits(&self, classroom: &Classroom) -> bool {
        classroom.level == self.level
            && self.grade.admits(&classroom.grade)
            && self.section.admits(&classroom.section)
    }

    pub fn grades(&self) -> Vec<u8> {
        match self.grade {
            Selection::All => self.level.grades(),
            Selection::Only(grade) => vec![grade],
        }
    }
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let roster_error = |source| ReportError::Roster {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(roster_error)?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result.map_err(roster_error)?);
    }
    Ok(rows)
}

/// Reads `student_id,classroom_id` rows.
pub fn load_students(path: &Path) -> Result<Vec<StudentRecord>> {
    read_rows(path)
}

/// Reads `classroom_id,level,grade,section` rows.
pub fn load_classrooms(path: &Path) -> Result<Vec<Classroom>> {
    read_rows(path)
}

pub fn select_classrooms(classrooms: Vec<Classroom>, selection: &ClassroomSelection) -> Vec<Classroom> {
    classrooms
        .into_iter()
        .filter(|classroom| selection.admits(classroom))
        .collect()
}
