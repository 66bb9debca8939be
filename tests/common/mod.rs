#![allow(dead_code)]

use corpfront::DbError;
use corpfront::db::{Column, Row, SessionBackend, Statement, Value};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin,
    Execute(String),
    Fetch(String),
    Commit,
    Rollback,
    Invalidate,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Execute,
    Fetch,
    Commit,
    Rollback,
}

/// Shared view of what a [`ScriptedBackend`] was asked to do.
#[derive(Clone, Default)]
pub struct Script {
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Arc<Mutex<HashMap<Op, VecDeque<fn() -> DbError>>>>,
    rows: Arc<Mutex<Vec<Row>>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with `err()`.
    pub fn fail(&self, op: Op, times: usize, err: fn() -> DbError) -> &Self {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(err);
        }
        self
    }

    pub fn with_rows(&self, rows: Vec<Row>) -> &Self {
        *self.rows.lock().unwrap() = rows;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn backend(&self) -> ScriptedBackend {
        ScriptedBackend {
            script: self.clone(),
            in_tx: false,
            next_id: 100,
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(&self, op: Op) -> Option<DbError> {
        self.failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .map(|make| make())
    }
}

/// In-memory backend that replays scripted failures and logs every call.
pub struct ScriptedBackend {
    script: Script,
    in_tx: bool,
    next_id: i64,
}

impl SessionBackend for ScriptedBackend {
    async fn begin(&mut self) -> Result<(), DbError> {
        if !self.in_tx {
            self.script.record(Call::Begin);
            self.in_tx = true;
        }
        Ok(())
    }

    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        self.begin().await?;
        self.script.record(Call::Execute(stmt.sql.clone()));
        match self.script.take_failure(Op::Execute) {
            Some(err) => Err(err),
            None => Ok(1),
        }
    }

    async fn fetch_all(&mut self, stmt: &Statement, columns: &[Column]) -> Result<Vec<Row>, DbError> {
        self.begin().await?;
        self.script.record(Call::Fetch(stmt.sql.clone()));
        if let Some(err) = self.script.take_failure(Op::Fetch) {
            return Err(err);
        }
        if stmt.sql.starts_with("INSERT") {
            self.next_id += 1;
            let pk = columns.first().map_or("id", |c| c.name);
            return Ok(vec![Row::new().with(pk, self.next_id)]);
        }
        let rows = self.script.rows.lock().unwrap().clone();
        if stmt.sql.starts_with("SELECT COUNT(*)") {
            return Ok(vec![Row::new().with("value", Value::Int(rows.len() as i64))]);
        }
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.script.record(Call::Commit);
        if let Some(err) = self.script.take_failure(Op::Commit) {
            return Err(err);
        }
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_tx {
            self.script.record(Call::Rollback);
            // A failed rollback leaves the transaction open.
            if let Some(err) = self.script.take_failure(Op::Rollback) {
                return Err(err);
            }
            self.in_tx = false;
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.script.record(Call::Invalidate);
        self.in_tx = false;
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn close(mut self) -> Result<(), DbError> {
        self.rollback().await?;
        self.script.record(Call::Close);
        Ok(())
    }
}

pub fn connection_reset() -> DbError {
    DbError::Sqlx(sqlx::Error::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    )))
}

/// Not a first-class connection error; only the message gives it away.
pub fn server_closed() -> DbError {
    DbError::Sqlx(sqlx::Error::Configuration(
        "server closed the connection unexpectedly".into(),
    ))
}

pub fn syntax_error() -> DbError {
    DbError::Sqlx(sqlx::Error::Configuration(
        "syntax error at or near \"UPDAT\"".into(),
    ))
}

/// Driver-shaped error carrying a SQLSTATE, as PostgreSQL reports it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SqlStateError {
    code: &'static str,
    message: &'static str,
}

impl sqlx::error::DatabaseError for SqlStateError {
    fn message(&self) -> &str {
        self.message
    }

    fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
        Some(self.code.into())
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        match self.code {
            "23505" => sqlx::error::ErrorKind::UniqueViolation,
            _ => sqlx::error::ErrorKind::Other,
        }
    }
}

/// Duplicate key; the message also contains the `connection` marker.
pub fn unique_violation() -> DbError {
    DbError::Sqlx(sqlx::Error::Database(Box::new(SqlStateError {
        code: "23505",
        message: "duplicate key value violates unique constraint \"ix_api_configs_connection_key\"",
    })))
}

pub fn api_config_row(id: i64, key: &str, value: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("config_key", key)
        .with("config_value", value)
        .with("description", Value::Null)
        .with("is_active", 1_i64)
        .with("updated_at", Value::Null)
        .with("updated_by", Value::Null)
}

pub fn temp_sqlite_path(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!(
        "corpfront_{tag}_{}_{nanos}.db",
        std::process::id()
    ))
}

pub fn sqlite_url(path: &std::path::Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Fresh SQLite file with the dashboard schema applied.
pub async fn sqlite_pool(tag: &str) -> (sqlx::AnyPool, PathBuf) {
    let path = temp_sqlite_path(tag);
    let url = sqlite_url(&path);
    let cfg = corpfront::config::DatabaseConfig {
        url: url.clone(),
        fallback_url: url,
        ..Default::default()
    };
    let (pool, engine) = corpfront::db::pool::connect(&cfg).await.unwrap();
    assert_eq!(engine, corpfront::db::pool::Engine::Sqlite);
    let mut session = corpfront::ResilientSession::new(
        pool.clone(),
        Arc::new(corpfront::RetryPolicy::immediate(3)),
    );
    corpfront::db::schema::init_schema(&mut session, false)
        .await
        .unwrap();
    session.close().await.unwrap();
    (pool, path)
}

pub async fn cleanup(pool: sqlx::AnyPool, path: PathBuf) {
    pool.close().await;
    let _ = std::fs::remove_file(path);
}

/// Real backend that counts how many statements reached it.
pub struct CountingBackend {
    inner: corpfront::db::SqlxBackend,
    pub executes: Arc<std::sync::atomic::AtomicUsize>,
}

impl CountingBackend {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self {
            inner: corpfront::db::SqlxBackend::new(pool),
            executes: Arc::default(),
        }
    }
}

impl SessionBackend for CountingBackend {
    async fn begin(&mut self) -> Result<(), DbError> {
        self.inner.begin().await
    }

    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        self.executes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.execute(stmt).await
    }

    async fn fetch_all(&mut self, stmt: &Statement, columns: &[Column]) -> Result<Vec<Row>, DbError> {
        self.inner.fetch_all(stmt, columns).await
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.inner.rollback().await
    }

    fn invalidate(&mut self) {
        self.inner.invalidate()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    async fn close(self) -> Result<(), DbError> {
        self.inner.close().await
    }
}
