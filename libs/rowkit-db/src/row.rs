//! Row decoding helpers.

use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, Row, Sqlite, Type};

/// Extension methods for decoding rows produced by projected queries.
pub trait RowExt {
    /// Decode `column`, returning `Ok(None)` when the column is not part of
    /// the result set (e.g. it was left out of a projection).
    ///
    /// A `NULL` value in a present column still goes through `T`, so use
    /// `Option<U>` for nullable columns.
    ///
    /// # Errors
    /// Returns the driver error for any failure other than a missing column.
    fn get_opt<'r, T>(&'r self, column: &str) -> Result<Option<T>, sqlx::Error>
    where
        T: Decode<'r, Sqlite> + Type<Sqlite>;
}

impl RowExt for SqliteRow {
    fn get_opt<'r, T>(&'r self, column: &str) -> Result<Option<T>, sqlx::Error>
    where
        T: Decode<'r, Sqlite> + Type<Sqlite>,
    {
        match self.try_get::<T, _>(column) {
            Ok(value) => Ok(Some(value)),
            Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
