//! Database configuration.
//!
//! Loaded from the `database` section of a [`Figment`]:
//!
//! ```yaml
//! database:
//!   path: /var/lib/app/app.db
//!   busy_timeout: 5s
//!   domain_filtering: true
//!   pool:
//!     max_conns: 8
//!     acquire_timeout: 2s
//!   domains:
//!     acme:
//!       dsn: "sqlite:///var/lib/app/acme.db"
//! ```
//!
//! Environment overrides follow the usual figment convention, e.g.
//! `APP__DATABASE__DOMAIN_FILTERING=true` with an `Env::prefixed("APP__")`
//! provider split on `__`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::{DbError, Result};

const SECTION: &str = "database";

/// Top-level database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// `sqlite:` DSN, e.g. `sqlite:///data/app.db` or `sqlite::memory:`.
    pub dsn: Option<String>,
    /// Database file; alternative to `dsn`.
    pub path: Option<PathBuf>,
    pub pool: Option<PoolCfg>,
    /// How long `SQLite` waits on a locked database before failing.
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
    /// Whether contexts handed out by the manager scope writes by domain.
    pub domain_filtering: bool,
    /// Dedicated databases per tenant domain.
    pub domains: BTreeMap<String, DomainDbConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            path: None,
            pool: None,
            busy_timeout: default_busy_timeout(),
            domain_filtering: false,
            domains: BTreeMap::new(),
        }
    }
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Connection target for one tenant domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainDbConfig {
    pub dsn: Option<String>,
    pub path: Option<PathBuf>,
    /// Falls back to the top-level pool settings when absent.
    pub pool: Option<PoolCfg>,
}

/// Pool sizing and timeouts, applied to the `SQLx` pool builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolCfg {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    #[serde(with = "humantime_serde::option")]
    pub acquire_timeout: Option<Duration>,
    #[serde(with = "humantime_serde::option")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde::option")]
    pub max_lifetime: Option<Duration>,
    pub test_before_acquire: bool,
}

impl DatabaseConfig {
    /// Extract and validate the `database` section. A figment without that
    /// section yields the default configuration, which fails validation
    /// because it names no database.
    ///
    /// # Errors
    /// `DbError::Config` for malformed input, otherwise see
    /// [`DatabaseConfig::validate`].
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let cfg = if figment.contains(SECTION) {
            figment.extract_inner::<Self>(SECTION)?
        } else {
            Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that every connection target is usable.
    ///
    /// # Errors
    /// - `DbError::InvalidConfig` when a target sets both or neither of
    ///   `dsn`/`path`, a domain name is empty, or `min_conns > max_conns`.
    /// - `DbError::UnknownDsn` for a DSN that is not `sqlite:`.
    pub fn validate(&self) -> Result<()> {
        check_target("database", self.dsn.as_deref(), self.path.as_deref())?;
        check_pool("database", self.pool.as_ref())?;

        for (name, domain) in &self.domains {
            if name.trim().is_empty() {
                return Err(DbError::InvalidConfig(
                    "database.domains: domain name must not be empty".to_owned(),
                ));
            }
            let scope = format!("database.domains.{name}");
            check_target(&scope, domain.dsn.as_deref(), domain.path.as_deref())?;
            check_pool(&scope, domain.pool.as_ref())?;
        }
        Ok(())
    }
}

/// Whether `dsn` names an in-memory `SQLite` database.
pub(crate) fn is_memory_dsn(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

fn check_target(scope: &str, dsn: Option<&str>, path: Option<&Path>) -> Result<()> {
    match (dsn, path) {
        (Some(_), Some(_)) => Err(DbError::InvalidConfig(format!(
            "{scope}: `dsn` and `path` are mutually exclusive"
        ))),
        (None, None) => Err(DbError::InvalidConfig(format!(
            "{scope}: one of `dsn` or `path` is required"
        ))),
        (Some(dsn), None) if !dsn.starts_with("sqlite:") => Err(DbError::UnknownDsn(dsn.to_owned())),
        _ => Ok(()),
    }
}

fn check_pool(scope: &str, pool: Option<&PoolCfg>) -> Result<()> {
    if let Some(PoolCfg {
        max_conns: Some(max),
        min_conns: Some(min),
        ..
    }) = pool
        && min > max
    {
        return Err(DbError::InvalidConfig(format!(
            "{scope}.pool: min_conns ({min}) exceeds max_conns ({max})"
        )));
    }
    Ok(())
}
