use super::{
    Grade, GradeDraft, GradePatch, GradeView, Record, Repository, Student, StudentDraft,
    StudentPatch, StoreError, StoreResult, Subject, SubjectDraft, SubjectPatch,
};
use crate::calc::ComponentScores;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

const STUDENT_COLUMNS: &str =
    "id, student_number, first_name, last_name, course, year_level, created_at";
const SUBJECT_COLUMNS: &str = "id, subject_code, subject_name, instructor, created_at";
const GRADE_COLUMNS: &str =
    "id, student_id, subject_id, prelim, midterm, semifinal, final, created_at, updated_at";

/// Millisecond precision keeps creation order stable for records added in
/// quick succession; rowid breaks any remaining tie.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        student_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        course: row.get(4)?,
        year_level: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn subject_from_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        subject_code: row.get(1)?,
        subject_name: row.get(2)?,
        instructor: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn grade_from_row(row: &Row<'_>) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: row.get(0)?,
        student_id: row.get(1)?,
        subject_id: row.get(2)?,
        scores: ComponentScores::new(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn list_rows<T>(
        &self,
        table: &str,
        columns: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>> {
        let sql = format!(
            "SELECT {columns} FROM {table} ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_row<T>(
        &self,
        table: &'static str,
        columns: &str,
        id: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let sql = format!("SELECT {columns} FROM {table} WHERE id = ?");
        self.conn
            .query_row(&sql, [id], map)
            .optional()?
            .ok_or_else(|| StoreError::not_found(table, id))
    }

    fn delete_row(&self, table: &'static str, id: &str) -> StoreResult<()> {
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        let changed = self.conn.execute(&sql, [id])?;
        if changed == 0 {
            return Err(StoreError::not_found(table, id));
        }
        Ok(())
    }

    fn ensure_exists(&self, table: &'static str, id: &str) -> StoreResult<()> {
        let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
        let exists: Option<i64> = self
            .conn
            .query_row(&sql, [id], |r| r.get(0))
            .optional()?;
        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(table, id)),
        }
    }

    /// Grades joined to student and subject labels, newest first, with their
    /// computed final grade. `search` is matched case-insensitively against
    /// student name, subject name and subject code.
    pub fn list_grade_views(&self, search: Option<&str>) -> StoreResult<Vec<GradeView>> {
        let mut stmt = self.conn.prepare(
            "SELECT
               g.id, g.student_id, g.subject_id, g.prelim, g.midterm, g.semifinal, g.final,
               g.created_at, g.updated_at,
               s.first_name, s.last_name, s.student_number,
               sub.subject_code, sub.subject_name
             FROM grades g
             LEFT JOIN students s ON s.id = g.student_id
             LEFT JOIN subjects sub ON sub.id = g.subject_id
             ORDER BY g.created_at DESC, g.rowid DESC",
        )?;
        let views = stmt
            .query_map([], grade_view_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let needle = search
            .map(str::to_lowercase)
            .filter(|s| !s.is_empty());
        Ok(match needle {
            Some(n) => views.into_iter().filter(|v| v.matches(&n)).collect(),
            None => views,
        })
    }

    pub fn get_grade_view(&self, id: &str) -> StoreResult<GradeView> {
        self.conn
            .query_row(
                "SELECT
                   g.id, g.student_id, g.subject_id, g.prelim, g.midterm, g.semifinal, g.final,
                   g.created_at, g.updated_at,
                   s.first_name, s.last_name, s.student_number,
                   sub.subject_code, sub.subject_name
                 FROM grades g
                 LEFT JOIN students s ON s.id = g.student_id
                 LEFT JOIN subjects sub ON sub.id = g.subject_id
                 WHERE g.id = ?",
                [id],
                grade_view_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(Grade::COLLECTION, id))
    }
}

fn grade_view_from_row(row: &Row<'_>) -> rusqlite::Result<GradeView> {
    let grade = grade_from_row(row)?;
    let first: Option<String> = row.get(9)?;
    let last: Option<String> = row.get(10)?;
    let number: Option<String> = row.get(11)?;
    let code: Option<String> = row.get(12)?;
    let name: Option<String> = row.get(13)?;

    let student = match (first, last, number) {
        (Some(f), Some(l), Some(n)) => Some((f, l, n)),
        _ => None,
    };
    let subject = match (code, name) {
        (Some(c), Some(n)) => Some((c, n)),
        _ => None,
    };
    Ok(GradeView::new(grade, student, subject))
}

impl Repository<Student> for SqliteStore<'_> {
    fn list(&self) -> StoreResult<Vec<Student>> {
        self.list_rows(Student::COLLECTION, STUDENT_COLUMNS, student_from_row)
    }

    fn get(&self, id: &str) -> StoreResult<Student> {
        self.get_row(Student::COLLECTION, STUDENT_COLUMNS, id, student_from_row)
    }

    fn create(&self, draft: &StudentDraft) -> StoreResult<Student> {
        draft.validate()?;
        let student = Student {
            id: Uuid::new_v4().to_string(),
            student_number: draft.student_number.clone(),
            first_name: draft.first_name.clone(),
            last_name: draft.last_name.clone(),
            course: draft.course.clone(),
            year_level: draft.year_level,
            created_at: now_timestamp(),
        };
        self.conn
            .execute(
                "INSERT INTO students(
                   id, student_number, first_name, last_name, course, year_level, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &student.id,
                    &student.student_number,
                    &student.first_name,
                    &student.last_name,
                    &student.course,
                    student.year_level,
                    &student.created_at,
                ),
            )
            .map_err(|e| {
                StoreError::from_write(
                    Student::COLLECTION,
                    "student number already exists",
                    e,
                )
            })?;
        Ok(student)
    }

    fn update(&self, id: &str, patch: &StudentPatch) -> StoreResult<Student> {
        let mut student: Student = self.get(id)?;
        patch.apply(&mut student);
        StudentDraft::from(&student).validate()?;
        self.conn
            .execute(
                "UPDATE students
                 SET student_number = ?, first_name = ?, last_name = ?, course = ?, year_level = ?
                 WHERE id = ?",
                (
                    &student.student_number,
                    &student.first_name,
                    &student.last_name,
                    &student.course,
                    student.year_level,
                    &student.id,
                ),
            )
            .map_err(|e| {
                StoreError::from_write(
                    Student::COLLECTION,
                    "student number already exists",
                    e,
                )
            })?;
        Ok(student)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.delete_row(Student::COLLECTION, id)
    }
}

impl Repository<Subject> for SqliteStore<'_> {
    fn list(&self) -> StoreResult<Vec<Subject>> {
        self.list_rows(Subject::COLLECTION, SUBJECT_COLUMNS, subject_from_row)
    }

    fn get(&self, id: &str) -> StoreResult<Subject> {
        self.get_row(Subject::COLLECTION, SUBJECT_COLUMNS, id, subject_from_row)
    }

    fn create(&self, draft: &SubjectDraft) -> StoreResult<Subject> {
        draft.validate()?;
        let subject = Subject {
            id: Uuid::new_v4().to_string(),
            subject_code: draft.subject_code.clone(),
            subject_name: draft.subject_name.clone(),
            instructor: draft.instructor.clone(),
            created_at: now_timestamp(),
        };
        self.conn
            .execute(
                "INSERT INTO subjects(id, subject_code, subject_name, instructor, created_at)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    &subject.id,
                    &subject.subject_code,
                    &subject.subject_name,
                    &subject.instructor,
                    &subject.created_at,
                ),
            )
            .map_err(|e| {
                StoreError::from_write(Subject::COLLECTION, "subject code already exists", e)
            })?;
        Ok(subject)
    }

    fn update(&self, id: &str, patch: &SubjectPatch) -> StoreResult<Subject> {
        let mut subject: Subject = self.get(id)?;
        patch.apply(&mut subject);
        SubjectDraft::from(&subject).validate()?;
        self.conn
            .execute(
                "UPDATE subjects SET subject_code = ?, subject_name = ?, instructor = ?
                 WHERE id = ?",
                (
                    &subject.subject_code,
                    &subject.subject_name,
                    &subject.instructor,
                    &subject.id,
                ),
            )
            .map_err(|e| {
                StoreError::from_write(Subject::COLLECTION, "subject code already exists", e)
            })?;
        Ok(subject)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.delete_row(Subject::COLLECTION, id)
    }
}

impl Repository<Grade> for SqliteStore<'_> {
    fn list(&self) -> StoreResult<Vec<Grade>> {
        self.list_rows(Grade::COLLECTION, GRADE_COLUMNS, grade_from_row)
    }

    fn get(&self, id: &str) -> StoreResult<Grade> {
        self.get_row(Grade::COLLECTION, GRADE_COLUMNS, id, grade_from_row)
    }

    fn create(&self, draft: &GradeDraft) -> StoreResult<Grade> {
        draft.validate()?;
        self.ensure_exists(Student::COLLECTION, &draft.student_id)?;
        self.ensure_exists(Subject::COLLECTION, &draft.subject_id)?;

        let now = now_timestamp();
        let grade = Grade {
            id: Uuid::new_v4().to_string(),
            student_id: draft.student_id.clone(),
            subject_id: draft.subject_id.clone(),
            scores: draft.scores,
            created_at: now.clone(),
            updated_at: now,
        };
        self.conn.execute(
            "INSERT INTO grades(
               id, student_id, subject_id, prelim, midterm, semifinal, final, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &grade.id,
                &grade.student_id,
                &grade.subject_id,
                grade.scores.prelim,
                grade.scores.midterm,
                grade.scores.semifinal,
                grade.scores.final_,
                &grade.created_at,
                &grade.updated_at,
            ),
        )?;
        Ok(grade)
    }

    fn update(&self, id: &str, patch: &GradePatch) -> StoreResult<Grade> {
        let mut grade: Grade = self.get(id)?;
        patch.apply(&mut grade);
        GradeDraft {
            student_id: grade.student_id.clone(),
            subject_id: grade.subject_id.clone(),
            scores: grade.scores,
        }
        .validate()?;
        // Only re-check references the patch actually moves; a grade whose
        // student was deleted can still have its scores edited.
        if let Some(student_id) = &patch.student_id {
            self.ensure_exists(Student::COLLECTION, student_id)?;
        }
        if let Some(subject_id) = &patch.subject_id {
            self.ensure_exists(Subject::COLLECTION, subject_id)?;
        }

        grade.updated_at = now_timestamp();
        self.conn.execute(
            "UPDATE grades
             SET student_id = ?, subject_id = ?, prelim = ?, midterm = ?, semifinal = ?, final = ?,
                 updated_at = ?
             WHERE id = ?",
            (
                &grade.student_id,
                &grade.subject_id,
                grade.scores.prelim,
                grade.scores.midterm,
                grade.scores.semifinal,
                grade.scores.final_,
                &grade.updated_at,
                &grade.id,
            ),
        )?;
        Ok(grade)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.delete_row(Grade::COLLECTION, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Tier;
    use crate::db;
    use crate::store::models::UNKNOWN_LABEL;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn student_draft(number: &str, first: &str, last: &str) -> StudentDraft {
        StudentDraft {
            student_number: number.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            course: "BSCS".to_string(),
            year_level: 2,
        }
    }

    fn subject_draft(code: &str, name: &str) -> SubjectDraft {
        SubjectDraft {
            subject_code: code.to_string(),
            subject_name: name.to_string(),
            instructor: "Prof. Reyes".to_string(),
        }
    }

    #[test]
    fn students_crud_roundtrip() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);

        let a: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("create a");
        let b: Student = store
            .create(&student_draft("2024-0002", "Ben", "Cruz"))
            .expect("create b");

        let listed: Vec<Student> = store.list().expect("list");
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()], "newest first");

        let patch = StudentPatch {
            course: Some("BSIT".to_string()),
            year_level: Some(3),
            ..Default::default()
        };
        let updated: Student = store.update(&a.id, &patch).expect("update");
        assert_eq!(updated.course, "BSIT");
        assert_eq!(updated.year_level, 3);
        assert_eq!(updated.first_name, "Ana");
        let fetched: Student = store.get(&a.id).expect("get");
        assert_eq!(fetched, updated);

        Repository::<Student>::delete(&store, &a.id).expect("delete");
        let err = Repository::<Student>::get(&store, &a.id).expect_err("gone");
        assert_eq!(err.code(), "not_found");
        let err = Repository::<Student>::delete(&store, &a.id).expect_err("already gone");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn duplicate_student_number_is_a_conflict() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let _: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("create");
        let err = Repository::<Student>::create(
            &store,
            &student_draft("2024-0001", "Other", "Person"),
        )
        .expect_err("duplicate");
        assert_eq!(err.code(), "conflict");

        let other: Student = store
            .create(&student_draft("2024-0002", "Ben", "Cruz"))
            .expect("create other");
        let patch = StudentPatch {
            student_number: Some("2024-0001".to_string()),
            ..Default::default()
        };
        let err = Repository::<Student>::update(&store, &other.id, &patch)
            .expect_err("update conflict");
        assert!(matches!(err, StoreError::Conflict { collection: "students", .. }));
    }

    #[test]
    fn required_fields_are_checked() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let mut draft = student_draft("2024-0001", "Ana", "Santos");
        draft.course = "  ".to_string();
        let err = Repository::<Student>::create(&store, &draft).expect_err("blank course");
        assert_eq!(err.code(), "bad_params");

        let mut draft = student_draft("2024-0001", "Ana", "Santos");
        draft.year_level = 5;
        let err = Repository::<Student>::create(&store, &draft).expect_err("year 5");
        assert_eq!(err.code(), "bad_params");

        let subject: Subject = store.create(&subject_draft("CS101", "Intro")).expect("subject");
        let patch = SubjectPatch {
            instructor: Some(String::new()),
            ..Default::default()
        };
        let err = Repository::<Subject>::update(&store, &subject.id, &patch)
            .expect_err("blank instructor");
        assert_eq!(err.code(), "bad_params");
    }

    #[test]
    fn grade_requires_existing_student_and_subject() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let student: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("student");

        let err = Repository::<Grade>::create(
            &store,
            &GradeDraft {
                student_id: student.id.clone(),
                subject_id: "missing".to_string(),
                scores: ComponentScores::default(),
            },
        )
        .expect_err("missing subject");
        assert!(matches!(err, StoreError::NotFound { collection: "subjects", .. }));
    }

    #[test]
    fn grade_update_patches_and_clears_components() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let student: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("student");
        let subject: Subject = store.create(&subject_draft("CS101", "Intro")).expect("subject");

        let grade: Grade = store
            .create(&GradeDraft {
                student_id: student.id.clone(),
                subject_id: subject.id.clone(),
                scores: ComponentScores::new(Some(90.0), Some(90.0), Some(90.0), Some(60.0)),
            })
            .expect("grade");
        assert_eq!(grade.result().final_grade, 78.0);

        let patch = GradePatch {
            final_: Some(Some(90.0)),
            prelim: Some(None),
            ..Default::default()
        };
        let updated: Grade = store.update(&grade.id, &patch).expect("update");
        assert_eq!(updated.scores.prelim, None);
        assert_eq!(updated.scores.midterm, Some(90.0));
        assert_eq!(updated.scores.final_, Some(90.0));
        // 0 + 18 + 18 + 36
        assert_eq!(updated.result().final_grade, 72.0);
        assert_eq!(updated.result().tier, Tier::Failing);

        let fetched: Grade = store.get(&grade.id).expect("get");
        assert_eq!(fetched.scores, updated.scores);
    }

    #[test]
    fn deleting_a_student_leaves_grades_with_unknown_label() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let student: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("student");
        let subject: Subject = store.create(&subject_draft("CS101", "Intro")).expect("subject");
        let grade: Grade = store
            .create(&GradeDraft {
                student_id: student.id.clone(),
                subject_id: subject.id.clone(),
                scores: ComponentScores::new(Some(80.0), Some(80.0), Some(80.0), Some(80.0)),
            })
            .expect("grade");

        let view = store.get_grade_view(&grade.id).expect("view");
        assert_eq!(view.student_name, "Ana Santos");
        assert_eq!(view.subject_code, "CS101");
        assert_eq!(view.result.tier, Tier::Good);

        Repository::<Student>::delete(&store, &student.id).expect("delete student");

        let views = store.list_grade_views(None).expect("views");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].student_name, UNKNOWN_LABEL);
        assert_eq!(views[0].student_number, None);
        assert_eq!(views[0].subject_name, "Intro");

        // Scores on an orphaned grade stay editable.
        let patch = GradePatch {
            midterm: Some(Some(100.0)),
            ..Default::default()
        };
        Repository::<Grade>::update(&store, &grade.id, &patch).expect("edit orphan");
    }

    #[test]
    fn grade_views_filter_by_search() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let ana: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("ana");
        let ben: Student = store
            .create(&student_draft("2024-0002", "Ben", "Cruz"))
            .expect("ben");
        let cs: Subject = store.create(&subject_draft("CS101", "Intro")).expect("cs");
        let math: Subject = store.create(&subject_draft("MATH2", "Calculus")).expect("math");

        for (s, sub) in [(&ana, &cs), (&ben, &math)] {
            let _: Grade = store
                .create(&GradeDraft {
                    student_id: s.id.clone(),
                    subject_id: sub.id.clone(),
                    scores: ComponentScores::default(),
                })
                .expect("grade");
        }

        assert_eq!(store.list_grade_views(Some("calc")).expect("by name").len(), 1);
        assert_eq!(store.list_grade_views(Some("cs1")).expect("by code").len(), 1);
        assert_eq!(store.list_grade_views(Some("ANA SAN")).expect("by student").len(), 1);
        assert_eq!(store.list_grade_views(Some("")).expect("empty").len(), 2);
        assert!(store.list_grade_views(Some("zzz")).expect("none").is_empty());
    }

    #[test]
    fn search_needle_is_not_trimmed() {
        let conn = memory_conn();
        let store = SqliteStore::new(&conn);
        let ana: Student = store
            .create(&student_draft("2024-0001", "Ana", "Santos"))
            .expect("ana");
        let cs: Subject = store.create(&subject_draft("CS101", "Intro")).expect("cs");
        let _: Grade = store
            .create(&GradeDraft {
                student_id: ana.id.clone(),
                subject_id: cs.id.clone(),
                scores: ComponentScores::default(),
            })
            .expect("grade");

        assert_eq!(store.list_grade_views(Some("ana ")).expect("inner space").len(), 1);
        assert!(store.list_grade_views(Some("santos ")).expect("trailing").is_empty());
        assert!(store.list_grade_views(Some("   ")).expect("spaces").is_empty());
    }
}
