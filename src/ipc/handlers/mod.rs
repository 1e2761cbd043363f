pub mod backup;
pub mod core;
pub mod grades;
pub mod students;
pub mod subjects;
