use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: i64 },

    #[error("Invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
