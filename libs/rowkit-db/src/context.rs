//! Call-scoped execution context.
//!
//! A [`DbCtx`] is an immutable bag of everything a repository call needs to
//! know about *where* and *how* it runs: the active connection (a pool or a
//! transaction), the tenant domain, and the flags that bypass hooks or the
//! domain filter. Every `with_*` method returns a new context, so a derived
//! context never affects the one it came from and can be handed to other
//! tasks freely.

use std::fmt;
use std::future::{Future, pending};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::DbError;
use crate::conn::Connection;

#[derive(Clone, Default)]
pub struct DbCtx {
    conn: Option<Arc<dyn Connection>>,
    domain: Option<Arc<str>>,
    skip_hooks: bool,
    skip_domain_scope: bool,
    domain_filtering: bool,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl fmt::Debug for DbCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCtx")
            .field("has_connection", &self.conn.is_some())
            .field(
                "in_transaction",
                &self
                    .conn
                    .as_ref()
                    .is_some_and(|c| c.as_transaction().is_some()),
            )
            .field("domain", &self.domain())
            .field("skip_hooks", &self.skip_hooks)
            .field("skip_domain_scope", &self.skip_domain_scope)
            .field("domain_filtering", &self.domain_filtering)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl DbCtx {
    /// Empty root context: no connection, no domain, hooks enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context bound to `conn`, replacing any previous connection.
    #[must_use]
    pub fn with_connection(&self, conn: Arc<dyn Connection>) -> Self {
        Self {
            conn: Some(conn),
            ..self.clone()
        }
    }

    /// Derive a context in which lifecycle hooks are not invoked.
    #[must_use]
    pub fn skip_hooks(&self) -> Self {
        Self {
            skip_hooks: true,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_domain(&self, domain: impl Into<String>) -> Self {
        Self {
            domain: Some(Arc::from(domain.into())),
            ..self.clone()
        }
    }

    /// Enable or disable domain scoping for domain-aware models.
    #[must_use]
    pub fn with_domain_filtering(&self, enabled: bool) -> Self {
        Self {
            domain_filtering: enabled,
            ..self.clone()
        }
    }

    /// Derive a context that ignores domain scoping even when enabled.
    #[must_use]
    pub fn skip_domain_scope(&self) -> Self {
        Self {
            skip_domain_scope: true,
            ..self.clone()
        }
    }

    /// Attach a cancellation token; in-flight statements abort when it fires.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    /// Bound every statement issued through this context by `timeout` from
    /// now. An earlier deadline already on the context wins.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.conn.clone()
    }

    /// Attached domain, or `""` when none.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn hooks_skipped(&self) -> bool {
        self.skip_hooks
    }

    /// Whether domain predicates apply to writes made with this context.
    #[must_use]
    pub fn domain_scope_active(&self) -> bool {
        self.domain_filtering && !self.skip_domain_scope && !self.domain().is_empty()
    }

    pub(crate) fn require_connection(&self) -> crate::Result<Arc<dyn Connection>> {
        self.conn.clone().ok_or(DbError::NoConnection)
    }

    /// Race `fut` against the context's cancellation token and deadline.
    pub(crate) async fn guard<T, F>(&self, fut: F) -> crate::Result<T>
    where
        F: Future<Output = crate::Result<T>>,
    {
        if self.cancel.is_none() && self.deadline.is_none() {
            return fut.await;
        }

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Err(DbError::Cancelled),
            () = expired => Err(DbError::DeadlineExceeded),
            res = fut => res,
        }
    }
}
