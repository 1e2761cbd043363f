use crate::calc::{self, ComponentScores, GradeResult};
use crate::store::StoreError;
use serde::Serialize;

/// Shown in place of a student or subject a grade still points at after that
/// record was deleted.
pub const UNKNOWN_LABEL: &str = "Unknown";

pub const MIN_YEAR_LEVEL: i64 = 1;
pub const MAX_YEAR_LEVEL: i64 = 4;

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn require_non_empty(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_year_level(year_level: i64) -> Result<(), StoreError> {
    if !(MIN_YEAR_LEVEL..=MAX_YEAR_LEVEL).contains(&year_level) {
        return Err(StoreError::Invalid(format!(
            "yearLevel must be between {MIN_YEAR_LEVEL} and {MAX_YEAR_LEVEL}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub course: String,
    pub year_level: i64,
    pub created_at: String,
}

impl Student {
    /// `needle_lower` must already be lowercased.
    pub fn matches(&self, needle_lower: &str) -> bool {
        contains_ci(&self.first_name, needle_lower)
            || contains_ci(&self.last_name, needle_lower)
            || contains_ci(&self.student_number, needle_lower)
            || contains_ci(&self.course, needle_lower)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentDraft {
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub course: String,
    pub year_level: i64,
}

impl StudentDraft {
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("studentNumber", &self.student_number)?;
        require_non_empty("firstName", &self.first_name)?;
        require_non_empty("lastName", &self.last_name)?;
        require_non_empty("course", &self.course)?;
        require_year_level(self.year_level)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentPatch {
    pub student_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub course: Option<String>,
    pub year_level: Option<i64>,
}

impl StudentPatch {
    pub fn apply(&self, student: &mut Student) {
        if let Some(v) = &self.student_number {
            student.student_number = v.clone();
        }
        if let Some(v) = &self.first_name {
            student.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            student.last_name = v.clone();
        }
        if let Some(v) = &self.course {
            student.course = v.clone();
        }
        if let Some(v) = self.year_level {
            student.year_level = v;
        }
    }
}

impl From<&Student> for StudentDraft {
    fn from(s: &Student) -> Self {
        Self {
            student_number: s.student_number.clone(),
            first_name: s.first_name.clone(),
            last_name: s.last_name.clone(),
            course: s.course.clone(),
            year_level: s.year_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub instructor: String,
    pub created_at: String,
}

impl Subject {
    pub fn matches(&self, needle_lower: &str) -> bool {
        contains_ci(&self.subject_code, needle_lower)
            || contains_ci(&self.subject_name, needle_lower)
            || contains_ci(&self.instructor, needle_lower)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectDraft {
    pub subject_code: String,
    pub subject_name: String,
    pub instructor: String,
}

impl SubjectDraft {
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("subjectCode", &self.subject_code)?;
        require_non_empty("subjectName", &self.subject_name)?;
        require_non_empty("instructor", &self.instructor)
    }
}

impl From<&Subject> for SubjectDraft {
    fn from(s: &Subject) -> Self {
        Self {
            subject_code: s.subject_code.clone(),
            subject_name: s.subject_name.clone(),
            instructor: s.instructor.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectPatch {
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    pub instructor: Option<String>,
}

impl SubjectPatch {
    pub fn apply(&self, subject: &mut Subject) {
        if let Some(v) = &self.subject_code {
            subject.subject_code = v.clone();
        }
        if let Some(v) = &self.subject_name {
            subject.subject_name = v.clone();
        }
        if let Some(v) = &self.instructor {
            subject.instructor = v.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    #[serde(flatten)]
    pub scores: ComponentScores,
    pub created_at: String,
    pub updated_at: String,
}

impl Grade {
    pub fn result(&self) -> GradeResult {
        calc::compute(&self.scores)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeDraft {
    pub student_id: String,
    pub subject_id: String,
    pub scores: ComponentScores,
}

impl GradeDraft {
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("studentId", &self.student_id)?;
        require_non_empty("subjectId", &self.subject_id)
    }
}

/// Outer `None` leaves a field alone; `Some(None)` clears a component score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradePatch {
    pub student_id: Option<String>,
    pub subject_id: Option<String>,
    pub prelim: Option<Option<f64>>,
    pub midterm: Option<Option<f64>>,
    pub semifinal: Option<Option<f64>>,
    pub final_: Option<Option<f64>>,
}

impl GradePatch {
    pub fn apply(&self, grade: &mut Grade) {
        if let Some(v) = &self.student_id {
            grade.student_id = v.clone();
        }
        if let Some(v) = &self.subject_id {
            grade.subject_id = v.clone();
        }
        if let Some(v) = self.prelim {
            grade.scores.prelim = v;
        }
        if let Some(v) = self.midterm {
            grade.scores.midterm = v;
        }
        if let Some(v) = self.semifinal {
            grade.scores.semifinal = v;
        }
        if let Some(v) = self.final_ {
            grade.scores.final_ = v;
        }
    }
}

/// A grade joined to the labels of the records it points at, plus its
/// computed final grade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeView {
    #[serde(flatten)]
    pub grade: Grade,
    pub student_name: String,
    pub student_number: Option<String>,
    pub subject_code: String,
    pub subject_name: String,
    #[serde(flatten)]
    pub result: GradeResult,
}

impl GradeView {
    pub fn new(
        grade: Grade,
        student: Option<(String, String, String)>,
        subject: Option<(String, String)>,
    ) -> Self {
        let result = grade.result();
        let (student_name, student_number) = match student {
            Some((first, last, number)) => (format!("{first} {last}"), Some(number)),
            None => (UNKNOWN_LABEL.to_string(), None),
        };
        let (subject_code, subject_name) = subject
            .unwrap_or_else(|| (UNKNOWN_LABEL.to_string(), UNKNOWN_LABEL.to_string()));
        Self {
            grade,
            student_name,
            student_number,
            subject_code,
            subject_name,
            result,
        }
    }

    pub fn matches(&self, needle_lower: &str) -> bool {
        contains_ci(&self.student_name, needle_lower)
            || contains_ci(&self.subject_name, needle_lower)
            || contains_ci(&self.subject_code, needle_lower)
    }
}
