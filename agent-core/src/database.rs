//! Multi-database access.
//!
//! The engine never links server database drivers. It talks through the
//! `SqlDriver` seam, with two implementations:
//! - `SqliteDriver`: the embedded engine (rusqlite), used for sqlite URLs
//!   and as the integration-test database
//! - `ToolboxDriver`: forwards `get_schema`/`execute_sql` actions to the
//!   out-of-process SQL toolbox worker for every other database kind
//!
//! `MultiDatabaseManager` owns one handle per configured database plus a
//! per-database schema cache (TTL 300 s, read-through, single-flight
//! refresh). When databases are disabled no driver is ever constructed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::protocol::{ColumnSchema, RowObject, SchemaDump, TableSchema};
use crate::settings::{DatabaseKind, Settings};

/// Default lifetime of a cached schema dump.
pub const SCHEMA_CACHE_TTL: Duration = Duration::from_secs(300);

/// The driver seam every configured database sits behind.
pub trait SqlDriver: Send + Sync {
    fn fetch_schema(&self) -> BoxFuture<'_, Result<SchemaDump, String>>;
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<RowObject>, String>>;
}

// ============================================================================
// Embedded SQLite driver
// ============================================================================

/// Driver for an embedded SQLite database file.
pub struct SqliteDriver {
    path: String,
}

impl SqliteDriver {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    fn open(path: &str) -> Result<rusqlite::Connection, String> {
        rusqlite::Connection::open(path)
            .map_err(|e| format!("Failed to open sqlite database {}: {}", path, e))
    }

    fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => json!(i),
            ValueRef::Real(f) => json!(f),
            ValueRef::Text(t) => json!(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => json!(format!("<{} bytes>", b.len())),
        }
    }
}

impl SqlDriver for SqliteDriver {
    fn fetch_schema(&self) -> BoxFuture<'_, Result<SchemaDump, String>> {
        let path = self.path.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = Self::open(&path)?;
                let mut tables = Vec::new();
                {
                    let mut stmt = conn
                        .prepare(
                            "SELECT name FROM sqlite_master \
                             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                        )
                        .map_err(|e| format!("Schema query failed: {}", e))?;
                    let mut rows = stmt
                        .query([])
                        .map_err(|e| format!("Schema query failed: {}", e))?;
                    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
                        let name: String = row.get(0).map_err(|e| e.to_string())?;
                        tables.push(name);
                    }
                }

                let mut dump = SchemaDump::new();
                for table in tables {
                    let mut stmt = conn
                        .prepare(&format!("PRAGMA table_info(\"{}\")", table))
                        .map_err(|e| format!("table_info failed for {}: {}", table, e))?;
                    let mut rows = stmt
                        .query([])
                        .map_err(|e| format!("table_info failed for {}: {}", table, e))?;
                    let mut columns = Vec::new();
                    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
                        let name: String = row.get(1).map_err(|e| e.to_string())?;
                        let column_type: String = row.get(2).map_err(|e| e.to_string())?;
                        let notnull: i64 = row.get(3).map_err(|e| e.to_string())?;
                        columns.push(ColumnSchema {
                            name,
                            column_type,
                            nullable: notnull == 0,
                            comment: None,
                        });
                    }
                    dump.insert(
                        table,
                        TableSchema {
                            columns,
                            comment: None,
                        },
                    );
                }
                Ok(dump)
            })
            .await
            .map_err(|e| format!("Schema task panicked: {}", e))?
        })
    }

    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<RowObject>, String>> {
        let path = self.path.clone();
        let sql = sql.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = Self::open(&path)?;
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| format!("SQL prepare failed: {}", e))?;
                let column_names: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let mut rows = stmt
                    .query([])
                    .map_err(|e| format!("SQL execution failed: {}", e))?;

                let mut results = Vec::new();
                while let Some(row) = rows.next().map_err(|e| e.to_string())? {
                    let mut object = Map::new();
                    for (i, name) in column_names.iter().enumerate() {
                        let value = row
                            .get_ref(i)
                            .map(Self::value_to_json)
                            .unwrap_or(Value::Null);
                        object.insert(name.clone(), value);
                    }
                    results.push(object);
                }
                Ok(results)
            })
            .await
            .map_err(|e| format!("SQL task panicked: {}", e))?
        })
    }
}

// ============================================================================
// Toolbox driver
// ============================================================================

/// Driver that forwards to the out-of-process SQL toolbox worker.
pub struct ToolboxDriver {
    endpoint: String,
    db_name: String,
    client: reqwest::Client,
}

impl ToolboxDriver {
    pub fn new(endpoint: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            db_name: db_name.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, action: &str, parameters: Value) -> Result<Value, String> {
        let reply: Value = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "action": action, "parameters": parameters }))
            .send()
            .await
            .map_err(|e| format!("Toolbox call '{}' failed: {}", action, e))?
            .json()
            .await
            .map_err(|e| format!("Toolbox reply for '{}' is not JSON: {}", action, e))?;

        if reply.get("status").and_then(Value::as_str) == Some("success") {
            Ok(reply)
        } else {
            let error = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown toolbox error");
            Err(format!("Toolbox '{}' error: {}", action, error))
        }
    }
}

impl SqlDriver for ToolboxDriver {
    fn fetch_schema(&self) -> BoxFuture<'_, Result<SchemaDump, String>> {
        Box::pin(async move {
            let reply = self
                .call("get_schema", json!({ "db_name": self.db_name }))
                .await?;
            let schema = reply.get("schema").cloned().unwrap_or(json!({}));
            serde_json::from_value(schema)
                .map_err(|e| format!("Toolbox schema for '{}' is malformed: {}", self.db_name, e))
        })
    }

    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<RowObject>, String>> {
        Box::pin(async move {
            let reply = self
                .call(
                    "execute_sql",
                    json!({ "sql_query": sql, "db_name": self.db_name }),
                )
                .await?;
            let results = reply.get("results").cloned().unwrap_or(json!([]));
            serde_json::from_value(results)
                .map_err(|e| format!("Toolbox results for '{}' are malformed: {}", self.db_name, e))
        })
    }
}

// ============================================================================
// Manager
// ============================================================================

/// One configured database behind its driver.
pub struct DatabaseHandle {
    pub name: String,
    pub kind: DatabaseKind,
    pub driver: Arc<dyn SqlDriver>,
}

struct CachedSchema {
    dump: SchemaDump,
    fetched_at: Instant,
}

/// Owns every configured database and the per-database schema cache.
pub struct MultiDatabaseManager {
    handles: Vec<DatabaseHandle>,
    disabled: bool,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CachedSchema>>,
    refresh_locks: HashMap<String, Mutex<()>>,
}

impl MultiDatabaseManager {
    /// Build from settings. With `DISABLE_DATABASES` set, no driver is
    /// constructed at all.
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.disable_databases {
            println!("[Database] Databases are disabled; no drivers constructed");
            return Self::with_handles(Vec::new(), true);
        }

        let mut handles = Vec::new();
        for config in &settings.databases {
            let driver: Arc<dyn SqlDriver> = match config.sqlite_path() {
                Some(path) => Arc::new(SqliteDriver::new(path)),
                None => Arc::new(ToolboxDriver::new(
                    settings.sql_toolbox_url.clone(),
                    config.name.clone(),
                )),
            };
            println!(
                "[Database] Configured '{}' ({:?})",
                config.name, config.kind
            );
            handles.push(DatabaseHandle {
                name: config.name.clone(),
                kind: config.kind,
                driver,
            });
        }
        Self::with_handles(handles, false)
    }

    pub fn with_handles(handles: Vec<DatabaseHandle>, disabled: bool) -> Self {
        let refresh_locks = handles
            .iter()
            .map(|h| (h.name.clone(), Mutex::new(())))
            .collect();
        Self {
            handles,
            disabled,
            cache_ttl: SCHEMA_CACHE_TTL,
            cache: RwLock::new(HashMap::new()),
            refresh_locks,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn list_databases(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name.clone()).collect()
    }

    fn handle(&self, db_name: &str) -> Result<&DatabaseHandle, String> {
        self.handles
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(db_name))
            .ok_or_else(|| format!("Unknown database '{}'", db_name))
    }

    /// Read-through cached schema dump for one database. Concurrent misses
    /// for the same database collapse into a single driver fetch.
    pub async fn get_schema_dump(&self, db_name: &str) -> Result<SchemaDump, String> {
        if self.disabled {
            return Ok(SchemaDump::new());
        }

        if let Some(cached) = self.cache.read().await.get(db_name) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.dump.clone());
            }
        }

        let handle = self.handle(db_name)?;
        let lock = self
            .refresh_locks
            .get(&handle.name)
            .ok_or_else(|| format!("No refresh lock for '{}'", db_name))?;
        let _guard = lock.lock().await;

        // Another task may have refreshed while this one waited.
        if let Some(cached) = self.cache.read().await.get(db_name) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.dump.clone());
            }
        }

        let dump = handle.driver.fetch_schema().await?;
        println!(
            "[Database] Refreshed schema for '{}': {} table(s)",
            db_name,
            dump.len()
        );
        self.cache.write().await.insert(
            handle.name.clone(),
            CachedSchema {
                dump: dump.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(dump)
    }

    /// Drop the cached schema for one database.
    pub async fn invalidate_schema(&self, db_name: &str) {
        self.cache.write().await.remove(db_name);
    }

    /// Execute a statement on one database.
    pub async fn execute_query(
        &self,
        db_name: &str,
        sql: &str,
    ) -> Result<Vec<RowObject>, String> {
        if self.disabled {
            println!("[Database] Databases disabled; returning no rows");
            return Ok(Vec::new());
        }
        let handle = self.handle(db_name)?;
        handle.driver.execute(sql).await
    }
}
