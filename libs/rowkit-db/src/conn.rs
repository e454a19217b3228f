//! Connection abstraction.
//!
//! [`Connection`] is the minimal surface the repository engine needs:
//! execute a statement, fetch rows, fetch one row, close. It is satisfied
//! interchangeably by a pooled handle ([`PoolConn`]) and by an in-flight
//! transaction ([`TxConn`](crate::TxConn)), so repository code never knows
//! which one it is talking to.
//!
//! The two capability probes, [`Connection::as_pool`] and
//! [`Connection::as_transaction`], are what the transaction manager uses to
//! decide between "begin" and "reuse". Wrappers that implement the trait
//! themselves (instrumentation, test recorders) answer `None` to both and
//! therefore cannot start a transaction.

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::tx::TxConn;
use crate::value::{Value, bind_all};

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// `SQLite` rowid of the last inserted row on this connection.
    pub last_insert_id: i64,
}

impl From<sqlx::sqlite::SqliteQueryResult> for ExecResult {
    fn from(value: sqlx::sqlite::SqliteQueryResult) -> Self {
        Self {
            rows_affected: value.rows_affected(),
            last_insert_id: value.last_insert_rowid(),
        }
    }
}

/// Statement execution surface shared by pooled and transactional handles.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement that returns no rows.
    ///
    /// # Errors
    /// Returns the driver error, or `DbError::TransactionFinished` for a
    /// transaction handle used after commit/rollback.
    async fn execute(&self, sql: &str, args: &[Value]) -> crate::Result<ExecResult>;

    /// Run a query and collect every row.
    ///
    /// # Errors
    /// See [`Connection::execute`].
    async fn query_rows(&self, sql: &str, args: &[Value]) -> crate::Result<Vec<SqliteRow>>;

    /// Run a query and return its first row, if any.
    ///
    /// # Errors
    /// See [`Connection::execute`].
    async fn query_one(&self, sql: &str, args: &[Value]) -> crate::Result<Option<SqliteRow>>;

    /// Release the handle.
    ///
    /// # Errors
    /// Implementation specific; the built-in handles never fail.
    async fn close(&self) -> crate::Result<()>;

    /// The pooled handle behind this connection, if it is one.
    fn as_pool(&self) -> Option<&PoolConn> {
        None
    }

    /// The transaction behind this connection, if it is one.
    fn as_transaction(&self) -> Option<&TxConn> {
        None
    }
}

/// Direct (non-transactional) handle over a shared `SQLite` pool.
#[derive(Clone, Debug)]
pub struct PoolConn {
    pool: SqlitePool,
}

impl PoolConn {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying `SQLx` pool, e.g. for running DDL in tests or migrations.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction on a connection checked out of the pool.
    ///
    /// # Errors
    /// Returns the driver error if `BEGIN` fails or no connection can be
    /// acquired.
    pub async fn begin(&self) -> crate::Result<TxConn> {
        let tx = self.pool.begin().await?;
        Ok(TxConn::new(tx))
    }
}

#[async_trait]
impl Connection for PoolConn {
    async fn execute(&self, sql: &str, args: &[Value]) -> crate::Result<ExecResult> {
        debug!(sql, args = args.len(), "execute");
        let res = bind_all(sql, args).execute(&self.pool).await?;
        Ok(res.into())
    }

    async fn query_rows(&self, sql: &str, args: &[Value]) -> crate::Result<Vec<SqliteRow>> {
        debug!(sql, args = args.len(), "query rows");
        Ok(bind_all(sql, args).fetch_all(&self.pool).await?)
    }

    async fn query_one(&self, sql: &str, args: &[Value]) -> crate::Result<Option<SqliteRow>> {
        debug!(sql, args = args.len(), "query one");
        Ok(bind_all(sql, args).fetch_optional(&self.pool).await?)
    }

    async fn close(&self) -> crate::Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn as_pool(&self) -> Option<&PoolConn> {
        Some(self)
    }
}
