//! Shared test harness: scripted LLM backends, SQLite fixtures, and
//! dependency-container builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::database::{DatabaseHandle, MultiDatabaseManager, SqliteDriver};
use crate::engine::AgentDeps;
use crate::llm::{CompletionBackend, LlmRouter};
use crate::registry::RegistryClient;
use crate::services::ServiceAdapter;
use crate::settings::{DatabaseKind, LlmRole, Settings};

/// Returns pre-scripted replies in order; errors when the script runs dry.
pub struct ScriptedBackend {
    name: &'static str,
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &'static str, replies: &[&str]) -> Arc<Self> {
        Self::from_strings(name, replies.iter().map(|r| r.to_string()).collect())
    }

    pub fn from_strings(name: &'static str, replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for ScriptedBackend {
    fn complete<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| format!("scripted backend '{}' ran out of replies", self.name))
        })
    }

    fn describe(&self) -> String {
        format!("scripted:{}", self.name)
    }
}

/// Echoes the prompt back, so assertions can check what evidence reached
/// the synthesizer.
pub struct EchoBackend {
    calls: AtomicUsize,
}

impl EchoBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for EchoBackend {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        })
    }

    fn describe(&self) -> String {
        "echo".to_string()
    }
}

/// Create a scratch SQLite database and run the given batch against it.
pub fn sqlite_db(ddl: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.db").to_string_lossy().to_string();
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(ddl).unwrap();
    (dir, path)
}

/// One embedded database handle for the manager.
pub fn sqlite_handle(name: &str, path: &str) -> DatabaseHandle {
    DatabaseHandle {
        name: name.to_string(),
        kind: DatabaseKind::Sqlite,
        driver: Arc::new(SqliteDriver::new(path)),
    }
}

/// Dependency container around scripted backends and explicit handles.
pub fn test_deps(
    llm: LlmRouter,
    handles: Vec<DatabaseHandle>,
    registry_url: Option<String>,
) -> Arc<AgentDeps> {
    let mut settings = Settings::default();
    settings.disable_databases = handles.is_empty();
    settings.registry_url = registry_url.clone();
    let disabled = handles.is_empty();
    Arc::new(AgentDeps {
        settings,
        llm,
        databases: Arc::new(MultiDatabaseManager::with_handles(handles, disabled)),
        adapter: ServiceAdapter::new(Duration::from_secs(5)),
        registry: registry_url.map(RegistryClient::new),
        deadline: None,
    })
}

/// Router with a scripted SQL backend and an echoing response backend.
pub fn sql_router(sql: Arc<ScriptedBackend>, response: Arc<EchoBackend>) -> LlmRouter {
    LlmRouter::empty()
        .with_backend(LlmRole::Sql, sql)
        .with_backend(LlmRole::Response, response)
}

/// Convenience role attach for scripted prompt/planner backends.
pub fn with_role(router: LlmRouter, role: LlmRole, backend: Arc<ScriptedBackend>) -> LlmRouter {
    router.with_backend(role, backend)
}
