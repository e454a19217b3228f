//! Tenant domain scoping for writes.
//!
//! Scoping applies when the context has domain filtering enabled, is not
//! marked `skip_domain_scope`, carries a non-empty domain, and the entity
//! implements [`DomainScoped`](crate::DomainScoped). Then:
//!
//! - create stamps the context domain onto entities that have none;
//! - update, delete and atomic updates only touch rows of that domain.

use crate::context::DbCtx;
use crate::model::Model;
use crate::value::Value;

/// A `<column> = ?` condition restricting a write to one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopePredicate {
    pub column: &'static str,
    pub value: Value,
}

impl ScopePredicate {
    /// Append ` AND <column> = ?` to `sql` and the domain to `args`.
    pub fn append_to(self, sql: &mut String, args: &mut Vec<Value>) {
        sql.push_str(" AND ");
        sql.push_str(self.column);
        sql.push_str(" = ?");
        args.push(self.value);
    }
}

/// Stamp the context domain onto `entity` if scoping applies and the entity
/// has no domain yet.
pub fn inject<S, M: Model<S>>(ctx: &DbCtx, entity: &mut M) {
    if !ctx.domain_scope_active() {
        return;
    }
    if let Some(scoped) = entity.domain_scope()
        && scoped.domain().is_empty()
    {
        scoped.set_domain(ctx.domain());
    }
}

/// Predicate for writes on `entity`, when scoping applies.
pub fn predicate<S, M: Model<S>>(ctx: &DbCtx, entity: &mut M) -> Option<ScopePredicate> {
    if !ctx.domain_scope_active() {
        return None;
    }
    entity.domain_scope().map(|scoped| ScopePredicate {
        column: scoped.domain_column(),
        value: Value::from(ctx.domain()),
    })
}

/// Predicate for writes addressed by id only, probing a default `M`.
pub fn predicate_for_type<S, M: Model<S>>(ctx: &DbCtx) -> Option<ScopePredicate> {
    predicate::<S, M>(ctx, &mut M::default())
}
