//! Staged SELECT builder.
//!
//! The builder uses typestate markers so that clauses can only be added in
//! an order that renders valid SQL:
//!
//! ```text
//! Filtering --limit--> Limited --offset--> Paged
//!     \__________________offset_____________/
//! ```
//!
//! `filter` and `order_by` are only available while `Filtering`, in any
//! order and any number of times. Every stage can `build`, `execute` or
//! fetch the `first` row.
//!
//! ```rust,ignore
//! let cheap = shop.products
//!     .select(&["name", "price"])
//!     .filter("price < ?", [10.0])
//!     .order_by("price", Direction::Asc)
//!     .limit(20)
//!     .offset(40)
//!     .execute(&ctx)
//!     .await?;
//! ```
//!
//! Filter fragments and order columns are `&'static str`: they are trusted
//! SQL written at compile time. Runtime data goes through bound arguments.

use std::borrow::Cow;
use std::marker::PhantomData;

use tracing::debug;

use crate::context::DbCtx;
use crate::error::RepoError;
use crate::model::Model;
use crate::repository::SchemaRef;
use crate::value::Value;

/// Typestate marker: WHERE and ORDER BY clauses may still be added.
#[derive(Debug, Clone, Copy)]
pub struct Filtering;

/// Typestate marker: LIMIT is set, only OFFSET may follow.
#[derive(Debug, Clone, Copy)]
pub struct Limited;

/// Typestate marker: OFFSET is set, the query is complete.
#[derive(Debug, Clone, Copy)]
pub struct Paged;

/// Sort direction for [`Query::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A SELECT over the table of `M`, in stage `St`.
#[must_use]
pub struct Query<S, M, St = Filtering> {
    schema: SchemaRef<S>,
    fields: Vec<&'static str>,
    wheres: Vec<(Cow<'static, str>, Vec<Value>)>,
    orders: Vec<(&'static str, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
    _state: PhantomData<fn() -> (M, St)>,
}

impl<S, M, St> std::fmt::Debug for Query<S, M, St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("fields", &self.fields)
            .field("wheres", &self.wheres)
            .field("orders", &self.orders)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl<S, M: Model<S>> Query<S, M, Filtering> {
    pub(crate) fn new(schema: SchemaRef<S>, fields: Vec<&'static str>) -> Self {
        Self {
            schema,
            fields,
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            _state: PhantomData,
        }
    }

    /// Add a WHERE fragment; fragments are joined with `AND`.
    ///
    /// `args` bind to the fragment's `?` placeholders in order.
    pub fn filter<I>(mut self, fragment: &'static str, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.wheres.push((
            Cow::Borrowed(fragment),
            args.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Filter built from allowlisted identifiers at runtime.
    pub(crate) fn filter_owned(mut self, fragment: String, args: Vec<Value>) -> Self {
        self.wheres.push((Cow::Owned(fragment), args));
        self
    }

    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.orders.push((column, direction));
        self
    }

    pub fn limit(mut self, n: u64) -> Query<S, M, Limited> {
        self.limit = Some(n);
        self.into_stage()
    }

    /// Skip `n` rows without a row limit.
    pub fn offset(mut self, n: u64) -> Query<S, M, Paged> {
        self.offset = Some(n);
        self.into_stage()
    }
}

impl<S, M: Model<S>> Query<S, M, Limited> {
    pub fn offset(mut self, n: u64) -> Query<S, M, Paged> {
        self.offset = Some(n);
        self.into_stage()
    }
}

impl<S, M: Model<S>, St> Query<S, M, St> {
    fn into_stage<Next>(self) -> Query<S, M, Next> {
        Query {
            schema: self.schema,
            fields: self.fields,
            wheres: self.wheres,
            orders: self.orders,
            limit: self.limit,
            offset: self.offset,
            _state: PhantomData,
        }
    }

    /// Render SQL and positional arguments.
    ///
    /// The output is a pure function of the clauses added: WHERE, ORDER BY,
    /// LIMIT, OFFSET, in that order. An explicit projection always starts
    /// with the identifier column.
    #[must_use]
    pub fn build(&self) -> (String, Vec<Value>) {
        let id = M::id_column();
        let mut sql = String::from("SELECT ");
        if self.fields.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(id);
            for field in self.fields.iter().filter(|f| **f != id) {
                sql.push_str(", ");
                sql.push_str(field);
            }
        }
        sql.push_str(" FROM ");
        sql.push_str(M::table_name());

        let mut args = Vec::new();
        for (i, (fragment, fragment_args)) in self.wheres.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(fragment);
            args.extend(fragment_args.iter().cloned());
        }

        for (i, (column, direction)) in self.orders.iter().enumerate() {
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            sql.push_str(column);
            sql.push(' ');
            sql.push_str(direction.as_sql());
        }

        // SQLite rejects OFFSET without LIMIT; -1 means "no limit".
        match (self.limit, self.offset) {
            (Some(limit), _) => {
                sql.push_str(" LIMIT ");
                sql.push_str(&limit.to_string());
            }
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(" OFFSET ");
            sql.push_str(&offset.to_string());
        }

        (sql, args)
    }

    /// Run the query and decode every row. No rows yields an empty vector.
    ///
    /// # Errors
    /// Connection, cancellation and decode failures, or
    /// `RepoError::SchemaDropped` when the owning schema is gone.
    pub async fn execute(self, ctx: &DbCtx) -> Result<Vec<M>, RepoError> {
        let schema = self.schema.upgrade(M::table_name())?;
        let conn = ctx.require_connection()?;
        let (sql, args) = self.build();
        debug!(table = M::table_name(), sql = %sql, args = args.len(), "select");

        let rows = ctx.guard(conn.query_rows(&sql, &args)).await?;
        rows.iter()
            .map(|row| M::decode(ctx, &schema, row))
            .collect()
    }

    /// Fetch a single row, forcing `LIMIT 1` when no limit was set.
    ///
    /// No matching row is not an error: the zero value `M::default()` is
    /// returned instead.
    ///
    /// # Errors
    /// Same as [`Query::execute`].
    pub async fn first(mut self, ctx: &DbCtx) -> Result<M, RepoError> {
        let schema = self.schema.upgrade(M::table_name())?;
        let conn = ctx.require_connection()?;
        if self.limit.is_none() {
            self.limit = Some(1);
        }
        let (sql, args) = self.build();
        debug!(table = M::table_name(), sql = %sql, args = args.len(), "select first");

        match ctx.guard(conn.query_one(&sql, &args)).await? {
            Some(row) => M::decode(ctx, &schema, &row),
            None => Ok(M::default()),
        }
    }
}
