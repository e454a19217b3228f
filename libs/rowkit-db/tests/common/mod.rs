#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

//! Shared fixtures: a temp-file database, the `Shop` schema and its models.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rowkit_db::{
    Connection, DatabaseConfig, DbCtx, DbManager, DomainScoped, ExecResult, HookResult, Hooks,
    Model, RepoError, Repository, RowExt, SqliteRow, Value,
};
use sqlx::Row;
use tempfile::TempDir;

pub type Journal = Arc<Mutex<Vec<String>>>;

const DDL: &[&str] = &[
    "CREATE TABLE products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        price REAL NOT NULL DEFAULT 0,
        count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE widgets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE tags (
        id TEXT PRIMARY KEY,
        label TEXT NOT NULL
    )",
    "CREATE TABLE notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        domain TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL,
        hits INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE line_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        product_id INTEGER NOT NULL REFERENCES products(id),
        qty INTEGER NOT NULL
    )",
];

/// Every repository of the test application, built once.
pub struct Shop {
    pub products: Repository<Shop, Product>,
    pub widgets: Repository<Shop, Widget>,
    pub tags: Repository<Shop, Tag>,
    pub notes: Repository<Shop, Note>,
    pub line_items: Repository<Shop, LineItem>,
    pub journal: Journal,
}

impl Shop {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            products: Repository::cyclic(weak.clone()),
            widgets: Repository::cyclic(weak.clone()),
            tags: Repository::cyclic(weak.clone()),
            notes: Repository::cyclic(weak.clone()),
            line_items: Repository::cyclic(weak.clone()),
            journal: Journal::default(),
        })
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

pub struct TestDb {
    pub manager: DbManager,
    pub shop: Arc<Shop>,
    _dir: TempDir,
}

impl TestDb {
    pub fn ctx(&self) -> DbCtx {
        self.manager.context()
    }

    /// Row count read straight from the pool, bypassing the repository.
    pub async fn raw_count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(self.manager.pool().pool())
            .await
            .unwrap()
    }
}

pub async fn setup() -> TestDb {
    setup_with(false).await
}

pub async fn setup_with(domain_filtering: bool) -> TestDb {
    let dir = TempDir::new().unwrap();
    let cfg = DatabaseConfig {
        path: Some(dir.path().join("shop.db")),
        domain_filtering,
        ..Default::default()
    };
    let manager = DbManager::connect(&cfg).await.unwrap();
    for ddl in DDL {
        sqlx::query(ddl)
            .execute(manager.pool().pool())
            .await
            .unwrap();
    }
    TestDb {
        manager,
        shop: Shop::new(),
        _dir: dir,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub count: i64,
}

impl Product {
    pub fn new(name: &str, price: f64, count: i64) -> Self {
        Self {
            id: 0,
            name: name.to_owned(),
            price,
            count,
        }
    }
}

impl Model<Shop> for Product {
    fn table_name() -> &'static str {
        "products"
    }

    fn field_names() -> &'static [&'static str] {
        &["name", "price", "count"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::from(&self.name),
            Value::from(self.price),
            Value::from(self.count),
        ]
    }

    fn decode(_: &DbCtx, _: &Arc<Shop>, row: &SqliteRow) -> Result<Self, RepoError> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.get_opt("name")?.unwrap_or_default(),
            price: row.get_opt("price")?.unwrap_or_default(),
            count: row.get_opt("count")?.unwrap_or_default(),
        })
    }

    fn id(&self) -> Value {
        Value::from(self.id)
    }
}

/// Model whose hooks write to the shop journal.
#[derive(Debug, Clone, Default)]
pub struct Widget {
    pub id: i64,
    pub name: String,
    pub journal: Option<Journal>,
}

impl Widget {
    pub fn new(shop: &Shop, name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_owned(),
            journal: Some(shop.journal.clone()),
        }
    }

    fn record(&self, entry: &str) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(entry.to_owned());
        }
    }
}

#[async_trait]
impl Hooks for Widget {
    async fn before_create(&mut self, _ctx: &DbCtx) -> HookResult {
        if self.name.starts_with("reject") {
            anyhow::bail!("widget name {} is not allowed", self.name);
        }
        self.record("before_create");
        Ok(())
    }

    async fn after_create(&mut self, _ctx: &DbCtx) -> HookResult {
        self.record("after_create");
        if self.name == "after-fail" {
            anyhow::bail!("after_create refused {}", self.id);
        }
        Ok(())
    }

    async fn before_update(&mut self, _ctx: &DbCtx) -> HookResult {
        if self.name.starts_with("frozen") {
            anyhow::bail!("widget {} cannot be renamed to {}", self.id, self.name);
        }
        self.record("before_update");
        Ok(())
    }

    async fn after_update(&mut self, _ctx: &DbCtx) -> HookResult {
        self.record("after_update");
        if self.name == "after-update-fail" {
            anyhow::bail!("after_update refused {}", self.id);
        }
        Ok(())
    }

    async fn before_delete(&mut self, _ctx: &DbCtx) -> HookResult {
        if self.name == "locked" {
            anyhow::bail!("widget {} is locked", self.id);
        }
        self.record("before_delete");
        Ok(())
    }

    async fn after_delete(&mut self, _ctx: &DbCtx) -> HookResult {
        self.record("after_delete");
        Ok(())
    }
}

impl Model<Shop> for Widget {
    fn table_name() -> &'static str {
        "widgets"
    }

    fn field_names() -> &'static [&'static str] {
        &["name"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::from(&self.name)]
    }

    fn decode(_: &DbCtx, shop: &Arc<Shop>, row: &SqliteRow) -> Result<Self, RepoError> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            journal: Some(shop.journal.clone()),
        })
    }

    fn id(&self) -> Value {
        Value::from(self.id)
    }

    fn hooks(&mut self) -> Option<&mut dyn Hooks> {
        Some(self)
    }
}

/// Model with a caller-assigned text identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: String,
    pub label: String,
}

impl Model<Shop> for Tag {
    fn table_name() -> &'static str {
        "tags"
    }

    fn field_names() -> &'static [&'static str] {
        &["label"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::from(&self.label)]
    }

    fn decode(_: &DbCtx, _: &Arc<Shop>, row: &SqliteRow) -> Result<Self, RepoError> {
        Ok(Self {
            id: row.try_get("id")?,
            label: row.try_get("label")?,
        })
    }

    fn id(&self) -> Value {
        Value::from(&self.id)
    }

    fn is_auto_increment_id() -> bool {
        false
    }
}

/// Tenant-owned model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub id: i64,
    pub domain: String,
    pub body: String,
    pub hits: i64,
}

impl Note {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_owned(),
            ..Default::default()
        }
    }
}

impl DomainScoped for Note {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn set_domain(&mut self, domain: &str) {
        domain.clone_into(&mut self.domain);
    }
}

impl Model<Shop> for Note {
    fn table_name() -> &'static str {
        "notes"
    }

    fn field_names() -> &'static [&'static str] {
        &["domain", "body", "hits"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::from(&self.domain),
            Value::from(&self.body),
            Value::from(self.hits),
        ]
    }

    fn decode(_: &DbCtx, _: &Arc<Shop>, row: &SqliteRow) -> Result<Self, RepoError> {
        Ok(Self {
            id: row.try_get("id")?,
            domain: row.try_get("domain")?,
            body: row.try_get("body")?,
            hits: row.try_get("hits")?,
        })
    }

    fn id(&self) -> Value {
        Value::from(self.id)
    }

    fn domain_scope(&mut self) -> Option<&mut dyn DomainScoped> {
        Some(self)
    }
}

/// Model that resolves a relationship through the schema it was decoded with.
#[derive(Clone, Default)]
pub struct LineItem {
    pub id: i64,
    pub product_id: i64,
    pub qty: i64,
    shop: Option<Arc<Shop>>,
}

impl LineItem {
    pub fn new(product_id: i64, qty: i64) -> Self {
        Self {
            product_id,
            qty,
            ..Default::default()
        }
    }

    pub async fn product(&self, ctx: &DbCtx) -> Result<Product, RepoError> {
        match &self.shop {
            Some(shop) => shop.products.find_by_id(ctx, self.product_id).await,
            None => Ok(Product::default()),
        }
    }
}

impl Model<Shop> for LineItem {
    fn table_name() -> &'static str {
        "line_items"
    }

    fn field_names() -> &'static [&'static str] {
        &["product_id", "qty"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::from(self.product_id), Value::from(self.qty)]
    }

    fn decode(_: &DbCtx, shop: &Arc<Shop>, row: &SqliteRow) -> Result<Self, RepoError> {
        Ok(Self {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            qty: row.try_get("qty")?,
            shop: Some(Arc::clone(shop)),
        })
    }

    fn id(&self) -> Value {
        Value::from(self.id)
    }
}

/// Connection wrapper that records every write statement's verb.
///
/// It is not a pool, so transactions cannot be started on it.
pub struct RecordingConn {
    inner: Arc<dyn Connection>,
    journal: Journal,
}

impl RecordingConn {
    pub fn wrap(ctx: &DbCtx, journal: Journal) -> DbCtx {
        let inner = ctx.connection().expect("context has a connection");
        ctx.with_connection(Arc::new(Self { inner, journal }))
    }
}

#[async_trait]
impl Connection for RecordingConn {
    async fn execute(&self, sql: &str, args: &[Value]) -> rowkit_db::Result<ExecResult> {
        let verb = sql.split_whitespace().next().unwrap_or_default();
        self.journal.lock().unwrap().push(format!("sql:{verb}"));
        self.inner.execute(sql, args).await
    }

    async fn query_rows(&self, sql: &str, args: &[Value]) -> rowkit_db::Result<Vec<SqliteRow>> {
        self.inner.query_rows(sql, args).await
    }

    async fn query_one(&self, sql: &str, args: &[Value]) -> rowkit_db::Result<Option<SqliteRow>> {
        self.inner.query_one(sql, args).await
    }

    async fn close(&self) -> rowkit_db::Result<()> {
        self.inner.close().await
    }
}
