use std::fmt;

use thiserror::Error;

use crate::model::EntityKind;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{}", Labeled("Not found", .0))]
    NotFound(String),
    #[error("{}", Labeled("Invalid input", .0))]
    InvalidInput(String),
    #[error("{}", Labeled("Unavailable", .0))]
    Unavailable(String),
}

impl AppError {
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        Self::NotFound(format!("{kind} id {id}"))
    }

    /// One error naming every id that failed to resolve.
    pub fn missing(kind: EntityKind, ids: &[i64]) -> Self {
        Self::NotFound(format!("{kind} id(s) not found: {}", join_ids(ids)))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

struct Labeled<'a>(&'a str, &'a String);

impl fmt::Display for Labeled<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Labeled(label, message) = self;
        if message.contains('\n') {
            write!(f, "{label}:\n{message}")
        } else {
            write!(f, "{label}: {message}")
        }
    }
}

pub fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn ensure_non_empty(label: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{label} cannot be empty")));
    }
    Ok(())
}
