//! The model contract.
//!
//! A type becomes persistable by implementing [`Model`] for the schema it
//! belongs to. The trait is deliberately metadata-driven: it names the
//! table and its columns, produces bound values in column order, and knows
//! how to decode itself from a row. Nothing is derived by reflection.
//!
//! Two capabilities are optional and probed at call time:
//!
//! - [`Hooks`]: lifecycle callbacks around create/update/delete.
//! - [`DomainScoped`]: multi-tenant row scoping.
//!
//! A model opts in by overriding [`Model::hooks`] or [`Model::domain_scope`]
//! to return `Some(self)`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use crate::context::DbCtx;
use crate::error::RepoError;
use crate::value::Value;

/// Result type of lifecycle hooks.
pub type HookResult = anyhow::Result<()>;

/// A persistable entity belonging to schema `S`.
///
/// `Default` supplies the zero value returned by single-row reads that find
/// nothing.
pub trait Model<S>: Default + Send + Sync + Sized + 'static {
    fn table_name() -> &'static str;

    /// Column names, in binding order, excluding the identifier column.
    fn field_names() -> &'static [&'static str];

    /// Values for [`Model::field_names`], same order and length.
    fn field_values(&self) -> Vec<Value>;

    /// Build an entity from `row`.
    ///
    /// Projected queries may leave columns out of the row; use
    /// [`RowExt::get_opt`](crate::RowExt::get_opt) for those. `schema` is the
    /// owning schema, which entities may keep to resolve relationships.
    ///
    /// # Errors
    /// Decoding failures, typically `sqlx::Error::ColumnDecode`.
    fn decode(ctx: &DbCtx, schema: &Arc<S>, row: &SqliteRow) -> Result<Self, RepoError>;

    /// Current identifier value.
    fn id(&self) -> Value;

    /// `true` when the database assigns the identifier on insert.
    fn is_auto_increment_id() -> bool {
        true
    }

    fn id_column() -> &'static str {
        "id"
    }

    fn hooks(&mut self) -> Option<&mut dyn Hooks> {
        None
    }

    fn domain_scope(&mut self) -> Option<&mut dyn DomainScoped> {
        None
    }
}

/// Lifecycle callbacks. Every method defaults to a no-op.
///
/// A `before_*` failure aborts the operation before any SQL is issued. An
/// `after_*` failure is reported to the caller, but the statement has
/// already run (and is only undone if the caller's transaction rolls back).
#[async_trait]
pub trait Hooks: Send {
    async fn before_create(&mut self, _ctx: &DbCtx) -> HookResult {
        Ok(())
    }

    async fn after_create(&mut self, _ctx: &DbCtx) -> HookResult {
        Ok(())
    }

    async fn before_update(&mut self, _ctx: &DbCtx) -> HookResult {
        Ok(())
    }

    async fn after_update(&mut self, _ctx: &DbCtx) -> HookResult {
        Ok(())
    }

    async fn before_delete(&mut self, _ctx: &DbCtx) -> HookResult {
        Ok(())
    }

    async fn after_delete(&mut self, _ctx: &DbCtx) -> HookResult {
        Ok(())
    }
}

/// Rows owned by a tenant domain.
pub trait DomainScoped: Send {
    fn domain(&self) -> &str;

    fn set_domain(&mut self, domain: &str);

    fn domain_column(&self) -> &'static str {
        "domain"
    }
}
