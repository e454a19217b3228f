//! Transactions.
//!
//! [`with_transaction`] runs a closure inside a database transaction and
//! hands it a derived [`DbCtx`] whose connection is a [`TxConn`]. Every
//! repository call made with that context joins the same transaction.
//!
//! Nesting is reuse: if the incoming context already carries a `TxConn`,
//! the closure runs directly in the enclosing transaction and the outer
//! call alone decides commit or rollback. There are no savepoints, so an
//! inner failure that propagates out rolls back everything.
//!
//! # Example
//!
//! ```ignore
//! let total = with_transaction(&ctx, |tx| async move {
//!     shop.products.create(&tx, product).await?;
//!     shop.products.count(&tx).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::DbError;
use crate::conn::{Connection, ExecResult};
use crate::context::DbCtx;
use crate::value::{Value, bind_all};

/// A live transaction that satisfies [`Connection`].
///
/// Clones share the same transaction. Statements are serialised through an
/// async mutex, so their order is the order in which they were awaited.
/// Once committed or rolled back the handle answers every statement with
/// [`DbError::TransactionFinished`].
#[derive(Clone)]
pub struct TxConn {
    inner: Arc<Mutex<Option<Transaction<'static, Sqlite>>>>,
}

impl std::fmt::Debug for TxConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxConn").finish_non_exhaustive()
    }
}

impl TxConn {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub(crate) async fn commit(&self) -> crate::Result<()> {
        let tx = self
            .inner
            .lock()
            .await
            .take()
            .ok_or(DbError::TransactionFinished)?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn rollback(&self) -> crate::Result<()> {
        let tx = self
            .inner
            .lock()
            .await
            .take()
            .ok_or(DbError::TransactionFinished)?;
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Connection for TxConn {
    async fn execute(&self, sql: &str, args: &[Value]) -> crate::Result<ExecResult> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
        debug!(sql, args = args.len(), "execute in transaction");
        let res = bind_all(sql, args).execute(&mut **tx).await?;
        Ok(res.into())
    }

    async fn query_rows(&self, sql: &str, args: &[Value]) -> crate::Result<Vec<SqliteRow>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
        debug!(sql, args = args.len(), "query rows in transaction");
        Ok(bind_all(sql, args).fetch_all(&mut **tx).await?)
    }

    async fn query_one(&self, sql: &str, args: &[Value]) -> crate::Result<Option<SqliteRow>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
        debug!(sql, args = args.len(), "query one in transaction");
        Ok(bind_all(sql, args).fetch_optional(&mut **tx).await?)
    }

    // The transaction's lifetime belongs to `with_transaction`.
    async fn close(&self) -> crate::Result<()> {
        Ok(())
    }

    fn as_transaction(&self) -> Option<&TxConn> {
        Some(self)
    }
}

/// Run `f` inside a transaction derived from `ctx`.
///
/// - Context already in a transaction: `f` runs in it, no commit/rollback.
/// - Context on a pool: begin, run `f`, commit on `Ok`, roll back on `Err`
///   or panic. A panic is re-raised after the rollback.
///
/// # Errors
/// - `DbError::NoConnection` when `ctx` has no connection.
/// - `DbError::NotTransactional` when the connection is neither a pool nor
///   a transaction.
/// - Begin and commit failures from the driver.
/// - Whatever `f` returns. Rollback failures are logged and never replace
///   the closure's error.
pub async fn with_transaction<F, Fut, T, E>(ctx: &DbCtx, f: F) -> Result<T, E>
where
    F: FnOnce(DbCtx) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbError>,
{
    let conn = ctx.require_connection()?;

    if conn.as_transaction().is_some() {
        debug!("joining active transaction");
        return f(ctx.clone()).await;
    }

    let Some(pool) = conn.as_pool() else {
        return Err(DbError::NotTransactional("connection is neither a pool nor a transaction").into());
    };

    let tx = ctx.guard(pool.begin()).await?;
    debug!("transaction started");
    let tx_ctx = ctx.with_connection(Arc::new(tx.clone()));

    match AssertUnwindSafe(async move { f(tx_ctx).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => {
            tx.commit().await?;
            debug!("transaction committed");
            Ok(value)
        }
        Ok(Err(err)) => {
            rollback_quietly(&tx).await;
            Err(err)
        }
        Err(panic) => {
            rollback_quietly(&tx).await;
            resume_unwind(panic)
        }
    }
}

async fn rollback_quietly(tx: &TxConn) {
    match tx.rollback().await {
        Ok(()) => debug!("transaction rolled back"),
        Err(e) => warn!(error = %e, "transaction rollback failed"),
    }
}
