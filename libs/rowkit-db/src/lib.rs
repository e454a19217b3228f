#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `Rowkit` repository engine.
//!
//! This crate provides a generic, type-safe data-access layer over a `SQLite`
//! connection pool (`SQLx`). Entities implement [`Model`]; a [`Repository`]
//! bound to a schema type gives them CRUD, a staged [`Query`] builder,
//! lifecycle hooks, multi-tenant domain scoping and atomic field updates.
//!
//! All call-scoped state (active connection or transaction, domain,
//! hook bypass, cancellation) travels in an immutable [`DbCtx`] value.
//!
//! # Example
//! ```rust,no_run
//! use rowkit_db::{DatabaseConfig, DbManager, Direction};
//!
//! # async fn demo() -> rowkit_db::Result<()> {
//! let cfg = DatabaseConfig {
//!     dsn: Some("sqlite:///var/lib/app/app.db".to_owned()),
//!     ..Default::default()
//! };
//! let manager = DbManager::connect(&cfg).await?;
//!
//! // Root context for a request; attach the tenant before handing it down.
//! let ctx = manager.context_for_domain("acme");
//!
//! rowkit_db::with_transaction(&ctx, |tx| async move {
//!     // repositories called with `&tx` share one transaction
//!     let _ = tx;
//!     Ok::<_, rowkit_db::DbError>(())
//! })
//! .await?;
//! # let _ = Direction::Asc;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod conn;
pub mod context;
pub mod error;
pub mod manager;
pub mod model;
pub mod query;
pub mod repository;
pub mod row;
pub mod telemetry;
pub mod tx;
pub mod value;

// Internal modules
mod domain;
mod hooks;
mod pool_opts;

pub use config::{DatabaseConfig, DomainDbConfig, PoolCfg};
pub use conn::{Connection, ExecResult, PoolConn};
pub use context::DbCtx;
pub use domain::ScopePredicate;
pub use error::RepoError;
pub use hooks::HookStage;
pub use manager::DbManager;
pub use model::{DomainScoped, HookResult, Hooks, Model};
pub use query::{Direction, Filtering, Limited, Paged, Query};
pub use repository::{AtomicOp, Delta, Repository, SchemaRef};
pub use row::RowExt;
pub use tx::{TxConn, with_transaction};
pub use value::Value;

pub use sqlx::sqlite::SqliteRow;

use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for connections, transactions and configuration.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("no connection attached to the execution context")]
    NoConnection,

    #[error("cannot begin a transaction on this connection: {0}")]
    NotTransactional(&'static str),

    #[error("transaction already committed or rolled back")]
    TransactionFinished,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(Box<figment::Error>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<figment::Error> for DbError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}

impl DbError {
    /// Returns `true` when `SQLite` reported lock contention (`SQLITE_BUSY` /
    /// `SQLITE_LOCKED`, including their extended codes).
    ///
    /// Retrying is left to the caller.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        let Self::Sqlx(sqlx::Error::Database(db)) = self else {
            return false;
        };
        let primary = db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);
        matches!(primary, Some(5 | 6)) || db.message().contains("database is locked")
    }
}
