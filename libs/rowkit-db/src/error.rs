//! Repository-level errors.

use thiserror::Error;

use crate::DbError;
use crate::hooks::HookStage;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("unknown field `{field}` for table `{table}`")]
    UnknownField { table: &'static str, field: String },

    #[error("field `{field}` appears more than once for table `{table}`")]
    DuplicateField { table: &'static str, field: &'static str },

    #[error("table `{table}`: {names} field names but {values} values")]
    FieldMismatch {
        table: &'static str,
        names: usize,
        values: usize,
    },

    #[error("{stage} hook failed for table `{table}`")]
    Hook {
        table: &'static str,
        stage: HookStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("COUNT(*) on `{table}` returned no row")]
    EmptyCount { table: &'static str },

    #[error("schema for `{table}` has been dropped")]
    SchemaDropped { table: &'static str },
}

impl From<sqlx::Error> for RepoError {
    fn from(value: sqlx::Error) -> Self {
        Self::Db(DbError::Sqlx(value))
    }
}

impl RepoError {
    /// The underlying [`DbError`], if this error came from the database layer.
    #[must_use]
    pub fn as_db(&self) -> Option<&DbError> {
        match self {
            Self::Db(e) => Some(e),
            _ => None,
        }
    }
}
