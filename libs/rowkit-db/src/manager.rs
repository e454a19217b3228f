//! Connection manager.
//!
//! [`DbManager`] opens the default pool and one pool per configured tenant
//! domain, and hands out root [`DbCtx`] values bound to them. It is the
//! usual entry point: build it once at startup, then derive a context per
//! request.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

use crate::config::{DatabaseConfig, PoolCfg, is_memory_dsn};
use crate::conn::PoolConn;
use crate::context::DbCtx;
use crate::pool_opts::ApplyPoolOpts;
use crate::{DbError, Result};

/// Owner of the process-wide `SQLite` pools.
#[derive(Debug)]
pub struct DbManager {
    default: Arc<PoolConn>,
    domains: BTreeMap<String, Arc<PoolConn>>,
    domain_filtering: bool,
}

impl DbManager {
    /// Validate `cfg` and open every configured pool.
    ///
    /// # Errors
    /// Configuration errors (see [`DatabaseConfig::validate`]) or the driver
    /// error of the first pool that fails to open.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        cfg.validate()?;

        let default = open_pool(
            cfg.dsn.as_deref(),
            cfg.path.as_deref(),
            cfg.pool.as_ref(),
            cfg.busy_timeout,
        )
        .await?;

        let mut domains = BTreeMap::new();
        for (name, domain) in &cfg.domains {
            let pool = open_pool(
                domain.dsn.as_deref(),
                domain.path.as_deref(),
                domain.pool.as_ref().or(cfg.pool.as_ref()),
                cfg.busy_timeout,
            )
            .await?;
            domains.insert(name.clone(), Arc::new(pool));
        }

        info!(
            domains = domains.len(),
            domain_filtering = cfg.domain_filtering,
            "database pools ready"
        );

        Ok(Self {
            default: Arc::new(default),
            domains,
            domain_filtering: cfg.domain_filtering,
        })
    }

    /// Load the `database` section of `figment` and connect.
    ///
    /// # Errors
    /// See [`DatabaseConfig::from_figment`] and [`DbManager::connect`].
    pub async fn from_figment(figment: &Figment) -> Result<Self> {
        let cfg = DatabaseConfig::from_figment(figment)?;
        Self::connect(&cfg).await
    }

    /// Root context on the default pool, with no domain attached.
    #[must_use]
    pub fn context(&self) -> DbCtx {
        DbCtx::new()
            .with_connection(self.default.clone())
            .with_domain_filtering(self.domain_filtering)
    }

    /// Root context for `domain`, bound to the domain's dedicated pool when
    /// one is configured and to the default pool otherwise.
    #[must_use]
    pub fn context_for_domain(&self, domain: &str) -> DbCtx {
        let ctx = self.context().with_domain(domain);
        match self.domains.get(domain) {
            Some(pool) => ctx.with_connection(pool.clone()),
            None => ctx,
        }
    }

    /// The default pool.
    #[must_use]
    pub fn pool(&self) -> &PoolConn {
        &self.default
    }

    #[must_use]
    pub fn domain_pool(&self, domain: &str) -> Option<&PoolConn> {
        self.domains.get(domain).map(Arc::as_ref)
    }

    /// Close every pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        for pool in self.domains.values() {
            pool.pool().close().await;
        }
        self.default.pool().close().await;
        info!("database pools closed");
    }
}

async fn open_pool(
    dsn: Option<&str>,
    path: Option<&Path>,
    pool: Option<&PoolCfg>,
    busy_timeout: Duration,
) -> Result<PoolConn> {
    let (opts, memory) = match (dsn, path) {
        (Some(dsn), None) => (SqliteConnectOptions::from_str(dsn)?, is_memory_dsn(dsn)),
        (None, Some(path)) => (SqliteConnectOptions::new().filename(path), false),
        _ => {
            return Err(DbError::InvalidConfig(
                "exactly one of `dsn` or `path` is required".to_owned(),
            ));
        }
    };

    let mut opts = opts
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);
    if !memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_cfg = pool.cloned().unwrap_or_default();
    let mut builder = SqlitePoolOptions::new();
    if memory {
        // Each in-memory connection would otherwise be its own database.
        if pool_cfg.max_conns.is_some_and(|n| n > 1) {
            warn!(
                requested = pool_cfg.max_conns,
                "in-memory SQLite database limited to a single pooled connection"
            );
        }
        pool_cfg.max_conns = Some(1);
        pool_cfg.min_conns = Some(1);
        pool_cfg.idle_timeout = None;
        pool_cfg.max_lifetime = None;
        builder = builder.idle_timeout(None).max_lifetime(None);
    }

    let pool = builder.apply(&pool_cfg).connect_with(opts).await?;
    Ok(PoolConn::new(pool))
}
