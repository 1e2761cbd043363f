//! Record store for the three collections (students, subjects, grades).
//!
//! `Repository<R>` is the list/get/create/update/delete surface, generic over
//! the record kind. `SqliteStore` implements it for every kind on top of the
//! workspace connection.

mod error;
mod models;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use models::{
    Grade, GradeDraft, GradePatch, GradeView, Student, StudentDraft, StudentPatch, Subject,
    SubjectDraft, SubjectPatch, MIN_YEAR_LEVEL,
};
pub use sqlite::SqliteStore;

pub trait Record {
    /// Table name, also used in error details.
    const COLLECTION: &'static str;
    type Draft;
    type Patch;
}

impl Record for Student {
    const COLLECTION: &'static str = "students";
    type Draft = StudentDraft;
    type Patch = StudentPatch;
}

impl Record for Subject {
    const COLLECTION: &'static str = "subjects";
    type Draft = SubjectDraft;
    type Patch = SubjectPatch;
}

impl Record for Grade {
    const COLLECTION: &'static str = "grades";
    type Draft = GradeDraft;
    type Patch = GradePatch;
}

pub trait Repository<R: Record> {
    /// All records, newest first.
    fn list(&self) -> StoreResult<Vec<R>>;
    fn get(&self, id: &str) -> StoreResult<R>;
    fn create(&self, draft: &R::Draft) -> StoreResult<R>;
    fn update(&self, id: &str, patch: &R::Patch) -> StoreResult<R>;
    fn delete(&self, id: &str) -> StoreResult<()>;
}
