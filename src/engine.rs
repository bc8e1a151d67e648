//! Attachment pool and federated query execution.
//!
//! Each per-platform database is `ATTACH`ed to an in-memory SQLite
//! connection, a *container*. SQLite caps the number of attachments per
//! connection, so once a container is full the next database goes into a
//! fresh one. A query runs one `UNION ALL` statement per container and
//! concatenates the results; with more than one container the rows are
//! sorted again in memory.
//!
//! [`Federation`] methods take `&mut self`, which keeps attach, detach and
//! query mutually exclusive. Callers sharing one federation between tasks
//! wrap it in a mutex, see [`SharedFederation`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mut fed = Federation::open(Catalog::games(), None).await?;
//! let snes = fed.attach("Super Nintendo", "/data/snes.sqlite").await?;
//!
//! let result = fed
//!     .query(&QueryRequest::new(["Name", "Year"]).filter("Year >= 1992").sort("-Year".parse()?))
//!     .await?;
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builder::{build_select, order_by_clause, resolve_sort, result_columns, union_all};
use crate::catalog::Catalog;
use crate::config::RomqlConfig;
use crate::error::{RomqlError, RomqlResult};
use crate::merge::{sort_rows, CellValue, QueryResult, SortKey, SortOrder};
use crate::parser;
use crate::schema::{quote_ident, sanitize_schema_name, DbSchema, FulfillableColumnSet};

/// SQLite's compiled-in default for `SQLITE_MAX_ATTACHED`.
pub const DEFAULT_MAX_ATTACHED: usize = 10;

/// A federation shared between tasks.
pub type SharedFederation = Arc<tokio::sync::Mutex<Federation>>;

/// One attached database.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub path: PathBuf,
    pub schema: DbSchema,
    pub fulfillable: FulfillableColumnSet,
    container: usize,
}

/// One connection hosting up to `max_attached` attachments.
struct Container {
    id: usize,
    conn: SqliteConnection,
    members: Vec<String>,
}

/// What to fetch.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Catalog column ids, in result order.
    pub columns: Vec<String>,
    /// Filter expression; blank means no filter.
    pub filter: Option<String>,
    pub sort: Vec<SortKey>,
    /// Restrict the query to these schemas; `None` queries all.
    pub schemas: Option<Vec<String>>,
}

impl QueryRequest {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn schema(mut self, name: impl Into<String>) -> Self {
        self.schemas.get_or_insert_with(Vec::new).push(name.into());
        self
    }
}

/// Statements for one query, one per container that has work.
struct QueryPlan {
    columns: Vec<String>,
    statements: Vec<(usize, String)>,
    sort: Vec<SortOrder>,
}

/// The attachment pool.
pub struct Federation {
    catalog: Catalog,
    max_attached: usize,
    containers: Vec<Container>,
    attachments: BTreeMap<String, Attachment>,
    next_container: usize,
}

impl Federation {
    /// Discover the engine's attach limit and start an empty pool.
    ///
    /// `cap` may lower the limit, never raise it.
    pub async fn open(catalog: Catalog, cap: Option<usize>) -> RomqlResult<Self> {
        let mut probe = open_connection().await?;
        let engine_limit = attach_limit(&mut probe).await?;
        if let Err(e) = probe.close().await {
            warn!(error = %e, "closing probe connection failed");
        }

        let max_attached = cap.map_or(engine_limit, |c| c.min(engine_limit)).max(1);
        info!(engine_limit, max_attached, "attachment pool ready");

        Ok(Self {
            catalog,
            max_attached,
            containers: Vec::new(),
            attachments: BTreeMap::new(),
            next_container: 0,
        })
    }

    /// Open a pool and attach every configured database.
    pub async fn from_config(config: &RomqlConfig) -> RomqlResult<Self> {
        let mut federation = Self::open(config.catalog()?, config.max_attached).await?;
        for db in &config.databases {
            federation.attach(&db.name, &db.path).await?;
        }
        Ok(federation)
    }

    pub fn into_shared(self) -> SharedFederation {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn max_attached(&self) -> usize {
        self.max_attached
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Look up an attachment; schema names match ignoring ASCII case.
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.get(self.attached_name(name)?)
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.values()
    }

    /// Attach the database at `path`, returning the schema name it got.
    ///
    /// `name` is sanitized and made unique. On failure nothing changes:
    /// the database is detached again and a container opened for it is
    /// closed.
    pub async fn attach(&mut self, name: &str, path: impl AsRef<Path>) -> RomqlResult<String> {
        let path = path.as_ref();
        let schema_name = self.unique_name(&sanitize_schema_name(name));

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(RomqlError::Schema(format!(
                    "'{}' is not a file",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RomqlError::Schema(format!(
                    "cannot open '{}': {}",
                    path.display(),
                    e
                )));
            }
        }
        let path_text = path.to_str().ok_or_else(|| {
            RomqlError::Schema(format!("'{}' is not valid UTF-8", path.display()))
        })?;

        let (slot, opened) = match self
            .containers
            .iter()
            .position(|c| c.members.len() < self.max_attached)
        {
            Some(slot) => (slot, false),
            None => {
                let conn = open_connection().await?;
                let id = self.next_container;
                self.next_container += 1;
                self.containers.push(Container {
                    id,
                    conn,
                    members: Vec::new(),
                });
                info!(container = id, "opened container");
                (self.containers.len() - 1, true)
            }
        };

        match self.attach_in(slot, &schema_name, path_text).await {
            Ok(attachment) => {
                info!(
                    schema = %schema_name,
                    path = %path.display(),
                    container = attachment.container,
                    fulfillable = attachment.fulfillable.len(),
                    "attached database"
                );
                self.containers[slot].members.push(schema_name.clone());
                self.attachments.insert(schema_name.clone(), attachment);
                Ok(schema_name)
            }
            Err(e) => {
                warn!(schema = %schema_name, error = %e, "attach rolled back");
                if opened {
                    let container = self.containers.remove(slot);
                    if let Err(close_err) = container.conn.close().await {
                        warn!(error = %close_err, "closing unused container failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn attach_in(
        &mut self,
        slot: usize,
        schema_name: &str,
        path: &str,
    ) -> RomqlResult<Attachment> {
        let container = &mut self.containers[slot];
        let conn = &mut container.conn;

        let sql = format!("ATTACH DATABASE ? AS {}", quote_ident(schema_name));
        sqlx::query(&sql)
            .bind(path)
            .persistent(false)
            .execute(&mut *conn)
            .await
            .map_err(|e| RomqlError::Schema(format!("cannot attach '{}': {}", path, e)))?;

        let schema = match DbSchema::load(conn, schema_name).await {
            Ok(schema) if self.catalog.accepts(&schema) => schema,
            Ok(_) => {
                detach_quietly(conn, schema_name).await;
                return Err(RomqlError::Schema(format!(
                    "'{}' has no {}.{}",
                    path,
                    self.catalog.root_table(),
                    self.catalog.key_column()
                )));
            }
            Err(e) => {
                detach_quietly(conn, schema_name).await;
                return Err(RomqlError::Schema(format!(
                    "'{}' is not a readable database: {}",
                    path, e
                )));
            }
        };

        let fulfillable = self.catalog.fulfillable(&schema);
        Ok(Attachment {
            name: schema_name.to_string(),
            path: PathBuf::from(path),
            schema,
            fulfillable,
            container: container.id,
        })
    }

    /// Detach a schema. A container left empty is closed.
    pub async fn detach(&mut self, name: &str) -> RomqlResult<()> {
        let Some(attachment) = self.attachment(name) else {
            return Err(RomqlError::Schema(format!("schema '{}' is not attached", name)));
        };
        let (name, container_id) = (attachment.name.clone(), attachment.container);
        let name = name.as_str();
        let Some(slot) = self.containers.iter().position(|c| c.id == container_id) else {
            return Err(RomqlError::Schema(format!("schema '{}' has no container", name)));
        };

        let sql = format!("DETACH DATABASE {}", quote_ident(name));
        sqlx::query(&sql)
            .persistent(false)
            .execute(&mut self.containers[slot].conn)
            .await
            .map_err(|e| RomqlError::engine(&sql, e))?;

        self.attachments.remove(name);
        let container = &mut self.containers[slot];
        container.members.retain(|m| m != name);
        info!(schema = name, container = container.id, "detached database");

        if container.members.is_empty() {
            let container = self.containers.remove(slot);
            info!(container = container.id, "closing empty container");
            if let Err(e) = container.conn.close().await {
                warn!(error = %e, "closing container failed");
            }
        }
        Ok(())
    }

    /// The statements `query` would run, one per container.
    pub fn statements(&self, request: &QueryRequest) -> RomqlResult<Vec<String>> {
        Ok(self
            .plan(request)?
            .statements
            .into_iter()
            .map(|(_, sql)| sql)
            .collect())
    }

    /// Run a federated query.
    pub async fn query(&mut self, request: &QueryRequest) -> RomqlResult<QueryResult> {
        let plan = self.plan(request)?;
        let mut result = QueryResult {
            columns: plan.columns,
            rows: Vec::new(),
        };

        for (slot, sql) in &plan.statements {
            let conn = &mut self.containers[*slot].conn;
            let rows = sqlx::query(sql)
                .persistent(false)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| RomqlError::engine(sql, e))?;
            debug!(container = slot, rows = rows.len(), "container returned");
            for row in &rows {
                result
                    .rows
                    .push(decode_row(row).map_err(|e| RomqlError::engine(sql, e))?);
            }
        }

        if plan.statements.len() > 1 {
            sort_rows(&mut result.rows, &plan.sort);
        }
        Ok(result)
    }

    fn plan(&self, request: &QueryRequest) -> RomqlResult<QueryPlan> {
        let filter = match request.filter.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(parser::parse(text)?),
            _ => None,
        };
        let columns = result_columns(&self.catalog, &request.columns)?;
        let sort = resolve_sort(&self.catalog, &request.columns, &request.sort)?;

        if let Some(scope) = &request.schemas {
            for name in scope {
                if self.attached_name(name).is_none() {
                    return Err(RomqlError::Schema(format!(
                        "schema '{}' is not attached",
                        name
                    )));
                }
            }
        }
        let in_scope = |name: &str| {
            request
                .schemas
                .as_ref()
                .is_none_or(|scope| scope.iter().any(|s| s.eq_ignore_ascii_case(name)))
        };

        let busy: Vec<usize> = self
            .containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.members.iter().any(|m| in_scope(m.as_str())))
            .map(|(slot, _)| slot)
            .collect();

        // A lone container can sort natively.
        let order_by = if busy.len() == 1 {
            order_by_clause(&sort)
        } else {
            String::new()
        };

        let mut statements = Vec::with_capacity(busy.len());
        for slot in busy {
            let mut parts = Vec::new();
            for member in &self.containers[slot].members {
                if !in_scope(member.as_str()) {
                    continue;
                }
                let Some(attachment) = self.attachments.get(member) else {
                    continue;
                };
                parts.push(build_select(
                    &self.catalog,
                    &attachment.name,
                    &attachment.fulfillable,
                    &request.columns,
                    filter.as_ref(),
                )?);
            }
            statements.push((slot, union_all(&parts, &order_by)));
        }

        Ok(QueryPlan {
            columns,
            statements,
            sort: sort.into_iter().map(|(_, order)| order).collect(),
        })
    }

    /// The attached schema name equal to `name` ignoring ASCII case.
    fn attached_name(&self, name: &str) -> Option<&str> {
        self.attachments
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    fn unique_name(&self, base: &str) -> String {
        let taken = |n: &str| self.attached_name(n).is_some();
        if !taken(base) {
            return base.to_string();
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{}_{}", base, suffix);
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

async fn open_connection() -> RomqlResult<SqliteConnection> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| RomqlError::engine("sqlite::memory:", e))?
        .with_regexp();
    options
        .connect()
        .await
        .map_err(|e| RomqlError::engine("sqlite::memory:", e))
}

/// `MAX_ATTACHED=N` from the compile options, or SQLite's default.
async fn attach_limit(conn: &mut SqliteConnection) -> RomqlResult<usize> {
    let sql = "PRAGMA compile_options";
    let options: Vec<String> = sqlx::query_scalar(sql)
        .persistent(false)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| RomqlError::engine(sql, e))?;
    Ok(options
        .iter()
        .find_map(|opt| opt.strip_prefix("MAX_ATTACHED=")?.parse().ok())
        .unwrap_or(DEFAULT_MAX_ATTACHED))
}

async fn detach_quietly(conn: &mut SqliteConnection, schema_name: &str) {
    let sql = format!("DETACH DATABASE {}", quote_ident(schema_name));
    if let Err(e) = sqlx::query(&sql).persistent(false).execute(&mut *conn).await {
        warn!(schema = schema_name, error = %e, "detach after failed attach");
    }
}

/// Decode a row by each value's storage class.
fn decode_row(row: &SqliteRow) -> Result<Vec<CellValue>, sqlx::Error> {
    let mut cells = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let type_name = {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                cells.push(CellValue::Null);
                continue;
            }
            raw.type_info().name().to_string()
        };

        let cell = match type_name.as_str() {
            "INTEGER" => CellValue::Integer(row.try_get(i)?),
            "REAL" => CellValue::Real(row.try_get(i)?),
            "BLOB" => CellValue::Blob(row.try_get(i)?),
            _ => CellValue::Text(row.try_get(i)?),
        };
        cells.push(cell);
    }
    Ok(cells)
}
