use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("provide at least one search attribute")]
    EmptyFilter,
    #[error("invalid filter attribute `{attribute}`: {reason}")]
    InvalidFilter { attribute: String, reason: String },
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::Conflict(
                    db.constraint()
                        .map(|c| format!("{c} already taken"))
                        .unwrap_or_else(|| db.message().to_string()),
                );
            }
            if db.is_foreign_key_violation() {
                return Self::NotFound {
                    entity: "referenced row",
                    key: db.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        Self::Storage(err)
    }
}
