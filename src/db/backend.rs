//! The operations a [`ResilientSession`](crate::db::session::ResilientSession)
//! drives, and the production implementation over an `sqlx` `Any` pool.

use crate::db::statement::Statement;
use crate::db::value::{Column, ColumnType, Row, Value};
use crate::error::DbError;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Executor, Row as _};
use std::future::Future;
use tracing::{debug, warn};

/// One unit of work against a database connection.
///
/// Implementations autobegin: the first `execute` or `fetch_all` after a
/// commit or rollback opens a new transaction.
pub trait SessionBackend: Send {
    fn begin(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Run a statement and report rows affected.
    fn execute(&mut self, stmt: &Statement) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Run a statement and decode every row by the declared column types,
    /// positionally.
    fn fetch_all(
        &mut self,
        stmt: &Statement,
        columns: &[Column],
    ) -> impl Future<Output = Result<Vec<Row>, DbError>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Discard the physical connection so it is never handed out again.
    fn invalidate(&mut self);

    fn in_transaction(&self) -> bool;

    /// Roll back anything open and release the connection.
    fn close(self) -> impl Future<Output = Result<(), DbError>> + Send
    where
        Self: Sized;
}

/// [`SessionBackend`] over a pooled `sqlx` connection.
///
/// The connection is acquired lazily and held until `close`, `invalidate` or
/// drop. Dropping with a transaction still open detaches the connection from
/// the pool instead of returning it, so the server rolls the work back.
pub struct SqlxBackend {
    pool: AnyPool,
    conn: Option<PoolConnection<Any>>,
    in_tx: bool,
}

impl SqlxBackend {
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            conn: None,
            in_tx: false,
        }
    }

    async fn connection(&mut self) -> Result<&mut PoolConnection<Any>, DbError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.pool.acquire().await?,
        };
        Ok(self.conn.insert(conn))
    }
}

fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Null | Value::TypedNull(ColumnType::Text) => query.bind(None::<String>),
        Value::TypedNull(ColumnType::Int | ColumnType::Bool) => query.bind(None::<i64>),
        Value::TypedNull(ColumnType::Float) => query.bind(None::<f64>),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
    }
}

fn build_query(stmt: &Statement) -> Query<'_, Any, AnyArguments<'_>> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |query, value| bind_value(query, value))
}

// INTEGER is INT4 on PostgreSQL and 64-bit on SQLite; accept both widths.
fn decode_column(row: &AnyRow, index: usize, ty: ColumnType) -> Result<Value, DbError> {
    let value = match ty {
        ColumnType::Int | ColumnType::Bool => {
            let raw = row
                .try_get::<Option<i64>, _>(index)
                .or_else(|_| row.try_get::<Option<i32>, _>(index).map(|v| v.map(i64::from)))?;
            match (ty, raw) {
                (_, None) => Value::Null,
                (ColumnType::Bool, Some(v)) => Value::Bool(v != 0),
                (_, Some(v)) => Value::Int(v),
            }
        }
        ColumnType::Float => row
            .try_get::<Option<f64>, _>(index)
            .or_else(|_| row.try_get::<Option<f32>, _>(index).map(|v| v.map(f64::from)))?
            .map_or(Value::Null, Value::Float),
        ColumnType::Text => row
            .try_get::<Option<String>, _>(index)?
            .map_or(Value::Null, Value::Text),
    };
    Ok(value)
}

fn decode_row(row: &AnyRow, columns: &[Column]) -> Result<Row, DbError> {
    let mut out = Row::new();
    for (index, column) in columns.iter().enumerate() {
        out.push(column.name, decode_column(row, index, column.ty)?);
    }
    Ok(out)
}

impl SessionBackend for SqlxBackend {
    async fn begin(&mut self) -> Result<(), DbError> {
        if self.in_tx {
            return Ok(());
        }
        let conn = self.connection().await?;
        (&mut **conn).execute("BEGIN").await?;
        self.in_tx = true;
        Ok(())
    }

    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        self.begin().await?;
        let conn = self.connection().await?;
        let result = build_query(stmt).execute(&mut **conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, stmt: &Statement, columns: &[Column]) -> Result<Vec<Row>, DbError> {
        self.begin().await?;
        let conn = self.connection().await?;
        let rows = build_query(stmt).fetch_all(&mut **conn).await?;
        rows.iter().map(|row| decode_row(row, columns)).collect()
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if !self.in_tx {
            return Ok(());
        }
        let conn = self.connection().await?;
        (&mut **conn).execute("COMMIT").await?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if !self.in_tx {
            return Ok(());
        }
        self.in_tx = false;
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        if let Err(e) = (&mut **conn).execute("ROLLBACK").await {
            // A connection that cannot roll back is in an unknown state.
            self.invalidate();
            return Err(e.into());
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("discarding pooled connection");
            drop(conn.detach());
        }
        self.in_tx = false;
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn close(mut self) -> Result<(), DbError> {
        let result = self.rollback().await;
        // Returns the connection to the pool unless rollback invalidated it.
        self.conn.take();
        result
    }
}

impl Drop for SqlxBackend {
    fn drop(&mut self) {
        if self.in_tx {
            warn!("session dropped with an open transaction; discarding its connection");
            self.invalidate();
        }
    }
}
