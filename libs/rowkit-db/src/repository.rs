//! Generic CRUD over a [`Model`].
//!
//! A [`Repository<S, M>`] is built once per schema and holds no per-call
//! state: every operation takes the [`DbCtx`] it should run in. Write
//! operations follow the same sequence:
//!
//! ```text
//! before hook? -> statement -> after hook?
//! ```
//!
//! with domain scoping applied to the statement when the context and the
//! model both ask for it.
//!
//! Identifiers in generated SQL are never quoted. They come from
//! [`Model::field_names`] and [`Model::id_column`]; names supplied at
//! runtime (`find_by` keys, [`AtomicOp`] fields) are first resolved against
//! that metadata and rejected with [`RepoError::UnknownField`] otherwise.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use sqlx::Row;
use tracing::debug;

use crate::context::DbCtx;
use crate::domain;
use crate::error::RepoError;
use crate::hooks::{self, HookStage};
use crate::model::Model;
use crate::query::Query;
use crate::value::Value;

/// How a repository reaches its schema.
///
/// Schemas that own their repositories are built with [`Arc::new_cyclic`]
/// and hand each repository a `Weak` handle, which avoids a reference
/// cycle. Reads through a `Weak` whose schema was dropped fail with
/// [`RepoError::SchemaDropped`].
pub enum SchemaRef<S> {
    Strong(Arc<S>),
    Weak(Weak<S>),
}

impl<S> Clone for SchemaRef<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Strong(s) => Self::Strong(Arc::clone(s)),
            Self::Weak(w) => Self::Weak(Weak::clone(w)),
        }
    }
}

impl<S> SchemaRef<S> {
    pub(crate) fn upgrade(&self, table: &'static str) -> Result<Arc<S>, RepoError> {
        match self {
            Self::Strong(s) => Ok(Arc::clone(s)),
            Self::Weak(w) => w.upgrade().ok_or(RepoError::SchemaDropped { table }),
        }
    }
}

/// Numeric delta of an [`AtomicOp`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    Int(i64),
    Real(f64),
}

impl From<i64> for Delta {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Delta {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Delta {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<Delta> for Value {
    fn from(value: Delta) -> Self {
        match value {
            Delta::Int(v) => Self::Int(v),
            Delta::Real(v) => Self::Real(v),
        }
    }
}

/// `field = field + delta`, applied in a single statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicOp {
    pub field: String,
    pub delta: Delta,
}

impl AtomicOp {
    #[must_use]
    pub fn new(field: impl Into<String>, delta: impl Into<Delta>) -> Self {
        Self {
            field: field.into(),
            delta: delta.into(),
        }
    }

    #[must_use]
    pub fn increment(field: impl Into<String>, by: i64) -> Self {
        Self::new(field, by)
    }

    /// `field = field - by`. `i64::MIN` saturates to a delta of `i64::MAX`.
    #[must_use]
    pub fn decrement(field: impl Into<String>, by: i64) -> Self {
        Self::new(field, by.saturating_neg())
    }
}

/// CRUD engine for model `M` of schema `S`.
pub struct Repository<S, M> {
    schema: SchemaRef<S>,
    _model: PhantomData<fn() -> M>,
}

impl<S, M> Clone for Repository<S, M> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            _model: PhantomData,
        }
    }
}

impl<S, M> std::fmt::Debug for Repository<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("model", &std::any::type_name::<M>())
            .finish_non_exhaustive()
    }
}

impl<S, M> Repository<S, M>
where
    S: Send + Sync + 'static,
    M: Model<S>,
{
    #[must_use]
    pub fn new(schema: Arc<S>) -> Self {
        Self {
            schema: SchemaRef::Strong(schema),
            _model: PhantomData,
        }
    }

    /// Repository for a schema under construction via [`Arc::new_cyclic`].
    #[must_use]
    pub fn cyclic(schema: Weak<S>) -> Self {
        Self {
            schema: SchemaRef::Weak(schema),
            _model: PhantomData,
        }
    }

    /// Start a query projecting `fields`, or every declared field when empty.
    pub fn select(&self, fields: &[&'static str]) -> Query<S, M> {
        let fields = if fields.is_empty() {
            M::field_names().to_vec()
        } else {
            fields.to_vec()
        };
        Query::new(self.schema.clone(), fields)
    }

    /// # Errors
    /// See [`Query::execute`].
    pub async fn find_all(&self, ctx: &DbCtx) -> Result<Vec<M>, RepoError> {
        self.select(&[]).execute(ctx).await
    }

    /// Fetch by identifier; an unknown id yields `M::default()`.
    ///
    /// # Errors
    /// See [`Query::first`].
    pub async fn find_by_id(&self, ctx: &DbCtx, id: impl Into<Value>) -> Result<M, RepoError> {
        self.select(&[])
            .filter_owned(eq_fragment(M::id_column()), vec![id.into()])
            .first(ctx)
            .await
    }

    /// Fetch rows matching every `column = value` pair in `criteria`.
    ///
    /// Keys must be declared fields or the identifier column. Fragments are
    /// rendered in key order.
    ///
    /// # Errors
    /// `RepoError::UnknownField` before any SQL for an undeclared key,
    /// otherwise see [`Query::execute`].
    pub async fn find_by(
        &self,
        ctx: &DbCtx,
        criteria: &BTreeMap<&str, Value>,
    ) -> Result<Vec<M>, RepoError> {
        let mut query = self.select(&[]);
        for (name, value) in criteria {
            let column = resolve_column::<S, M>(name, true)?;
            query = query.filter_owned(eq_fragment(column), vec![value.clone()]);
        }
        query.execute(ctx).await
    }

    /// # Errors
    /// Database failures, or `RepoError::EmptyCount` if `COUNT(*)` returns
    /// no row.
    pub async fn count(&self, ctx: &DbCtx) -> Result<i64, RepoError> {
        let table = M::table_name();
        let conn = ctx.require_connection()?;
        let mut sql = String::from("SELECT COUNT(*) FROM ");
        sql.push_str(table);

        let row = ctx
            .guard(conn.query_one(&sql, &[]))
            .await?
            .ok_or(RepoError::EmptyCount { table })?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Insert `entity` and return the stored row, re-read from the database.
    ///
    /// # Errors
    /// - `RepoError::Hook` from `before_create` (nothing written) or
    ///   `after_create` (row already written).
    /// - `RepoError::FieldMismatch` before any SQL.
    /// - Database failures.
    pub async fn create(&self, ctx: &DbCtx, mut entity: M) -> Result<M, RepoError> {
        hooks::dispatch::<S, M>(ctx, &mut entity, HookStage::BeforeCreate).await?;
        domain::inject::<S, M>(ctx, &mut entity);

        let values = checked_values::<S, M>(&entity)?;
        let auto_id = M::is_auto_increment_id();

        let mut columns: Vec<&str> = Vec::with_capacity(values.len() + 1);
        let mut args = Vec::with_capacity(values.len() + 1);
        if !auto_id {
            columns.push(M::id_column());
            args.push(entity.id());
        }
        columns.extend_from_slice(M::field_names());
        args.extend(values);

        let mut sql = String::from("INSERT INTO ");
        sql.push_str(M::table_name());
        sql.push_str(" (");
        sql.push_str(&columns.join(", "));
        sql.push_str(") VALUES (");
        sql.push_str(&vec!["?"; columns.len()].join(", "));
        sql.push(')');

        let conn = ctx.require_connection()?;
        let res = ctx.guard(conn.execute(&sql, &args)).await?;
        let id = if auto_id {
            Value::Int(res.last_insert_id)
        } else {
            entity.id()
        };
        debug!(table = M::table_name(), id = ?id, "row created");

        let mut created = self.find_by_id(ctx, id).await?;
        hooks::dispatch::<S, M>(ctx, &mut created, HookStage::AfterCreate).await?;
        Ok(created)
    }

    /// Write every declared field of `entity` to its row. Returns the number
    /// of rows affected, which is 0 when the row does not exist or belongs
    /// to another domain.
    ///
    /// # Errors
    /// Same classes as [`Repository::create`].
    pub async fn update(&self, ctx: &DbCtx, entity: &mut M) -> Result<u64, RepoError> {
        hooks::dispatch::<S, M>(ctx, entity, HookStage::BeforeUpdate).await?;

        let mut args = checked_values::<S, M>(entity)?;
        let mut sql = String::from("UPDATE ");
        sql.push_str(M::table_name());
        sql.push_str(" SET ");
        for (i, field) in M::field_names().iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(field);
            sql.push_str(" = ?");
        }
        sql.push_str(" WHERE ");
        sql.push_str(&eq_fragment(M::id_column()));
        args.push(entity.id());
        if let Some(scope) = domain::predicate::<S, M>(ctx, entity) {
            scope.append_to(&mut sql, &mut args);
        }

        let affected = Self::run(ctx, &sql, &args).await?;
        hooks::dispatch::<S, M>(ctx, entity, HookStage::AfterUpdate).await?;
        Ok(affected)
    }

    /// Delete the row of `entity`. Returns the number of rows affected.
    ///
    /// # Errors
    /// Same classes as [`Repository::create`].
    pub async fn delete(&self, ctx: &DbCtx, entity: &mut M) -> Result<u64, RepoError> {
        hooks::dispatch::<S, M>(ctx, entity, HookStage::BeforeDelete).await?;

        let mut sql = String::from("DELETE FROM ");
        sql.push_str(M::table_name());
        sql.push_str(" WHERE ");
        sql.push_str(&eq_fragment(M::id_column()));
        let mut args = vec![entity.id()];
        if let Some(scope) = domain::predicate::<S, M>(ctx, entity) {
            scope.append_to(&mut sql, &mut args);
        }

        let affected = Self::run(ctx, &sql, &args).await?;
        hooks::dispatch::<S, M>(ctx, entity, HookStage::AfterDelete).await?;
        Ok(affected)
    }

    /// Apply `ops` to the row with identifier `id` in one statement.
    ///
    /// No ops is a no-op returning `Ok(0)`. Hooks are not invoked.
    ///
    /// # Errors
    /// `RepoError::UnknownField` before any SQL when an op names a column
    /// that is not a declared field, `RepoError::DuplicateField` when two ops
    /// name the same column, otherwise database failures.
    pub async fn atomic_update(
        &self,
        ctx: &DbCtx,
        id: impl Into<Value>,
        ops: &[AtomicOp],
    ) -> Result<u64, RepoError> {
        if ops.is_empty() {
            return Ok(0);
        }
        let mut columns = Vec::with_capacity(ops.len());
        for op in ops {
            let column = resolve_column::<S, M>(&op.field, false)?;
            // SQLite keeps only the last assignment to a repeated column.
            if columns.contains(&column) {
                return Err(RepoError::DuplicateField {
                    table: M::table_name(),
                    field: column,
                });
            }
            columns.push(column);
        }

        let mut sql = String::from("UPDATE ");
        sql.push_str(M::table_name());
        sql.push_str(" SET ");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column);
            sql.push_str(" = ");
            sql.push_str(column);
            sql.push_str(" + ?");
        }
        sql.push_str(" WHERE ");
        sql.push_str(&eq_fragment(M::id_column()));

        let mut args: Vec<Value> = ops.iter().map(|op| op.delta.into()).collect();
        args.push(id.into());
        if let Some(scope) = domain::predicate_for_type::<S, M>(ctx) {
            scope.append_to(&mut sql, &mut args);
        }

        Self::run(ctx, &sql, &args).await
    }

    async fn run(ctx: &DbCtx, sql: &str, args: &[Value]) -> Result<u64, RepoError> {
        let conn = ctx.require_connection()?;
        let res = ctx.guard(conn.execute(sql, args)).await?;
        debug!(
            table = M::table_name(),
            rows_affected = res.rows_affected,
            "write executed"
        );
        Ok(res.rows_affected)
    }
}

fn eq_fragment(column: &str) -> String {
    let mut fragment = String::with_capacity(column.len() + 4);
    fragment.push_str(column);
    fragment.push_str(" = ?");
    fragment
}

/// Map a runtime column name onto the model's static metadata.
fn resolve_column<S, M: Model<S>>(name: &str, allow_id: bool) -> Result<&'static str, RepoError> {
    if allow_id && name == M::id_column() {
        return Ok(M::id_column());
    }
    M::field_names()
        .iter()
        .copied()
        .find(|field| *field == name)
        .ok_or_else(|| RepoError::UnknownField {
            table: M::table_name(),
            field: name.to_owned(),
        })
}

fn checked_values<S, M: Model<S>>(entity: &M) -> Result<Vec<Value>, RepoError> {
    let values = entity.field_values();
    let names = M::field_names().len();
    if values.len() != names {
        return Err(RepoError::FieldMismatch {
            table: M::table_name(),
            names,
            values: values.len(),
        });
    }
    Ok(values)
}
