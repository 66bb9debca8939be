//! The resilient session: one unit of work whose `execute`, `commit` and
//! terminal query calls survive transient connection loss.
//!
//! A failed attempt is classified by [`RetryPolicy::classify`]. Retryable
//! failures trigger recovery (rollback, identity cache cleared, connection
//! invalidated) and another attempt after the next backoff delay. Writes that
//! already succeeded in the lost transaction are kept in a journal and
//! replayed onto the fresh connection before the next attempt, so a retried
//! `commit` never silently drops them. After the budget is spent the last
//! error is returned as-is.
//!
//! A permanent failure is returned on the first attempt after a single
//! rollback that also discards staged, journaled and cached state.
//!
//! `add`, `delete`, `flush`, `refresh`, `rollback`, `get` and `close` pass
//! straight through with no retry.

use crate::db::backend::{SessionBackend, SqlxBackend};
use crate::db::entity::{Entity, insert_statement};
use crate::db::query::QueryProxy;
use crate::db::retry::{RetryPolicy, Transience};
use crate::db::statement::{Select, Statement};
use crate::db::value::{Column, ColumnType, Row, Value};
use crate::error::DbError;
use sqlx::AnyPool;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

type CachedEntity = Box<dyn Any + Send + Sync>;
type IdentityKey = (&'static str, i64);

enum StagedWrite {
    Insert {
        table: &'static str,
        primary_key: &'static str,
        values: Vec<(&'static str, Value)>,
        into_cached: Box<dyn FnOnce(i64) -> CachedEntity + Send + Sync>,
    },
    Delete {
        key: IdentityKey,
        statement: Statement,
    },
}

pub struct ResilientSession<B: SessionBackend = SqlxBackend> {
    backend: B,
    policy: Arc<RetryPolicy>,
    identity: HashMap<IdentityKey, CachedEntity>,
    staged: VecDeque<StagedWrite>,
    journal: Vec<Statement>,
    // Set when recovery rolled back a transaction that held journaled writes.
    replay_pending: bool,
}

/// Runs `$attempt` (an expression producing a future borrowing `$session`)
/// until it succeeds, fails permanently, or the backoff runs dry.
macro_rules! with_retry {
    ($session:ident, $op:literal, $attempt:expr) => {{
        let mut delays = $session.policy.backoff();
        let mut attempt: usize = 0;
        loop {
            let outcome = match $session.restore_journal().await {
                Ok(()) => $attempt.await,
                Err(e) => Err(e),
            };
            let err = match outcome {
                Ok(value) => break Ok(value),
                Err(err) => err,
            };
            let transience = $session.policy.classify(&err);
            if let Transience::Marker(marker) = &transience {
                warn!(
                    operation = $op,
                    marker = %marker,
                    error = %err,
                    "treating database error as transient by message match"
                );
            }
            if !transience.is_retryable() {
                $session.abandon().await;
                break Err(err);
            }
            $session.recover().await;
            let Some(delay) = delays.next() else {
                warn!(
                    operation = $op,
                    attempts = attempt + 1,
                    error = %err,
                    "database retry budget exhausted"
                );
                break Err(err);
            };
            attempt += 1;
            warn!(
                operation = $op,
                attempt,
                max_times = $session.policy.max_times(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient database failure, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }};
}

impl ResilientSession<SqlxBackend> {
    pub fn new(pool: AnyPool, policy: Arc<RetryPolicy>) -> Self {
        Self::with_backend(SqlxBackend::new(pool), policy)
    }
}

impl<B: SessionBackend> ResilientSession<B> {
    pub fn with_backend(backend: B, policy: Arc<RetryPolicy>) -> Self {
        Self {
            backend,
            policy,
            identity: HashMap::new(),
            staged: VecDeque::new(),
            journal: Vec::new(),
            replay_pending: false,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.backend.in_transaction()
    }

    pub fn pending_writes(&self) -> usize {
        self.staged.len()
    }

    /// Run a write (or DDL) statement. Staged writes are flushed first.
    pub async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        let affected = with_retry!(self, "execute", self.flush_then_execute(stmt))?;
        self.journal.push(stmt.clone());
        Ok(affected)
    }

    /// Flush staged writes and commit.
    pub async fn commit(&mut self) -> Result<(), DbError> {
        with_retry!(self, "commit", self.flush_then_commit())?;
        self.journal.clear();
        self.replay_pending = false;
        self.identity.clear();
        Ok(())
    }

    pub fn query<E: Entity>(&mut self) -> QueryProxy<'_, E, B> {
        QueryProxy::new(self, E::select())
    }

    /// Run an arbitrary read with retry and decode by `columns`.
    pub async fn fetch_all(
        &mut self,
        stmt: &Statement,
        columns: &[Column],
    ) -> Result<Vec<Row>, DbError> {
        with_retry!(self, "query", self.flush_then_fetch(stmt, columns))
    }

    /// First column of the first row, if any.
    pub async fn scalar(&mut self, stmt: &Statement, ty: ColumnType) -> Result<Option<Value>, DbError> {
        let rows = self
            .fetch_all(stmt, &[Column { name: "value", ty }])
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.first().cloned()))
    }

    pub(crate) async fn load_select<E: Entity>(&mut self, select: &Select) -> Result<Vec<E>, DbError> {
        let stmt = select.to_statement();
        let rows = self.fetch_all(&stmt, select.columns()).await?;
        let entities = rows
            .iter()
            .map(E::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        for entity in &entities {
            self.remember(entity);
        }
        Ok(entities)
    }

    /// Stage an insert; it is written on the next flush, execute, query or commit.
    pub fn add<E: Entity>(&mut self, entity: E) {
        let values = entity.typed_insert_values();
        self.staged.push_back(StagedWrite::Insert {
            table: E::TABLE,
            primary_key: E::PRIMARY_KEY,
            values,
            into_cached: Box::new(move |id| {
                let mut entity = entity;
                entity.set_id(id);
                Box::new(entity)
            }),
        });
    }

    /// Stage a delete by primary key.
    pub fn delete<E: Entity>(&mut self, entity: &E) -> Result<(), DbError> {
        let statement = entity.delete_statement()?;
        let id = entity.id().ok_or(DbError::Unpersisted { entity: E::TABLE })?;
        self.staged.push_back(StagedWrite::Delete {
            key: (E::TABLE, id),
            statement,
        });
        Ok(())
    }

    /// Write staged changes into the open transaction. No retry.
    pub async fn flush(&mut self) -> Result<(), DbError> {
        self.restore_journal().await?;
        self.flush_staged().await
    }

    /// Read by primary key, consulting the identity cache first. No retry.
    pub async fn get<E: Entity>(&mut self, id: i64) -> Result<Option<E>, DbError> {
        if let Some(cached) = self
            .identity
            .get(&(E::TABLE, id))
            .and_then(|c| c.downcast_ref::<E>())
        {
            return Ok(Some(cached.clone()));
        }
        self.restore_journal().await?;
        let select = E::select_by_id(id);
        let rows = self
            .backend
            .fetch_all(&select.to_statement(), select.columns())
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let entity = E::from_row(row)?;
        self.remember(&entity);
        Ok(Some(entity))
    }

    /// Re-read `entity` from the database in place. No retry.
    pub async fn refresh<E: Entity>(&mut self, entity: &mut E) -> Result<(), DbError> {
        let id = entity.id().ok_or(DbError::Unpersisted { entity: E::TABLE })?;
        self.restore_journal().await?;
        let select = E::select_by_id(id);
        let rows = self
            .backend
            .fetch_all(&select.to_statement(), select.columns())
            .await?;
        let row = rows
            .first()
            .ok_or(DbError::NotFound { entity: E::TABLE, id })?;
        *entity = E::from_row(row)?;
        self.remember(entity);
        Ok(())
    }

    /// Roll back and forget everything staged, journaled or cached. No retry.
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        self.forget();
        self.backend.rollback().await
    }

    /// Release the session. Uncommitted work is rolled back.
    pub async fn close(self) -> Result<(), DbError> {
        if !self.staged.is_empty() || !self.journal.is_empty() {
            debug!(
                staged = self.staged.len(),
                journaled = self.journal.len(),
                "closing session with uncommitted writes"
            );
        }
        self.backend.close().await
    }

    fn remember<E: Entity>(&mut self, entity: &E) {
        if let Some(id) = entity.id() {
            self.identity.insert((E::TABLE, id), Box::new(entity.clone()));
        }
    }

    fn forget(&mut self) {
        self.staged.clear();
        self.journal.clear();
        self.replay_pending = false;
        self.identity.clear();
    }

    // The connection is still good; only the transaction is dead.
    async fn abandon(&mut self) {
        self.forget();
        if let Err(e) = self.backend.rollback().await {
            warn!(error = %e, "rollback after permanent failure failed");
        }
    }

    async fn recover(&mut self) {
        if let Err(e) = self.backend.rollback().await {
            warn!(error = %e, "rollback during recovery failed");
        }
        self.identity.clear();
        self.backend.invalidate();
        self.replay_pending = !self.journal.is_empty();
    }

    async fn restore_journal(&mut self) -> Result<(), DbError> {
        if !self.replay_pending {
            return Ok(());
        }
        debug!(statements = self.journal.len(), "replaying transaction journal");
        for stmt in &self.journal {
            self.backend.execute(stmt).await?;
        }
        self.replay_pending = false;
        Ok(())
    }

    async fn flush_staged(&mut self) -> Result<(), DbError> {
        while let Some(write) = self.staged.pop_front() {
            match self.apply_staged(&write).await {
                Ok((journaled, assigned_id)) => {
                    self.journal.push(journaled);
                    self.settle(write, assigned_id);
                }
                Err(e) => {
                    self.staged.push_front(write);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    // Runs one staged write; returns the statement that reproduces it and,
    // for inserts, the id the database assigned.
    async fn apply_staged(&mut self, write: &StagedWrite) -> Result<(Statement, Option<i64>), DbError> {
        match write {
            StagedWrite::Insert {
                table,
                primary_key,
                values,
                ..
            } => {
                let (table, primary_key) = (*table, *primary_key);
                let stmt = insert_statement(table, primary_key, values, None);
                let rows = self
                    .backend
                    .fetch_all(&stmt, &[Column::int(primary_key)])
                    .await?;
                let id = rows
                    .first()
                    .ok_or(DbError::NoRows { entity: table })?
                    .get_i64(primary_key)?;
                Ok((insert_statement(table, primary_key, values, Some(id)), Some(id)))
            }
            StagedWrite::Delete { statement, .. } => {
                self.backend.execute(statement).await?;
                Ok((statement.clone(), None))
            }
        }
    }

    fn settle(&mut self, write: StagedWrite, assigned_id: Option<i64>) {
        match (write, assigned_id) {
            (StagedWrite::Insert { table, into_cached, .. }, Some(id)) => {
                self.identity.insert((table, id), into_cached(id));
            }
            (StagedWrite::Insert { .. }, None) => {}
            (StagedWrite::Delete { key, .. }, _) => {
                self.identity.remove(&key);
            }
        }
    }

    async fn flush_then_execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        self.flush_staged().await?;
        self.backend.execute(stmt).await
    }

    async fn flush_then_fetch(&mut self, stmt: &Statement, columns: &[Column]) -> Result<Vec<Row>, DbError> {
        self.flush_staged().await?;
        self.backend.fetch_all(stmt, columns).await
    }

    async fn flush_then_commit(&mut self) -> Result<(), DbError> {
        self.flush_staged().await?;
        self.backend.commit().await
    }
}
