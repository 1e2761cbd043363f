use rusqlite::ErrorCode;
use serde_json::json;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection} record not found: {id}")]
    NotFound {
        collection: &'static str,
        id: String,
    },

    /// A unique column (student number, subject code) already holds the value.
    #[error("{collection}: {message}")]
    Conflict {
        collection: &'static str,
        message: String,
    },

    /// Required-field check failed.
    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    /// Wire error code used in IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Invalid(_) => "bad_params",
            StoreError::Sqlite(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::NotFound { collection, id } => {
                Some(json!({ "collection": collection, "id": id }))
            }
            StoreError::Conflict { collection, .. } => Some(json!({ "collection": collection })),
            _ => None,
        }
    }

    /// Maps unique-constraint failures on writes to `Conflict`; everything else
    /// stays a database error.
    pub(crate) fn from_write(
        collection: &'static str,
        conflict_message: &str,
        e: rusqlite::Error,
    ) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict {
                    collection,
                    message: conflict_message.to_string(),
                }
            }
            _ => StoreError::Sqlite(e),
        }
    }
}
