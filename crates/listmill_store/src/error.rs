use thiserror::Error;

/// Errors from list storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("List {0} not found")]
    ListNotFound(i64),

    #[error("Row {row_id} not found in list {list_id}")]
    RowNotFound { list_id: i64, row_id: i64 },

    #[error("Invalid value for column '{column}' ({column_type}): {value:?}")]
    Validation {
        column: String,
        column_type: String,
        value: String,
    },

    #[error("Invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported store URL: {0}")]
    UnsupportedUrl(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
