use crate::db::backend::SessionBackend;
use crate::db::entity::Entity;
use crate::db::session::ResilientSession;
use crate::db::statement::{CmpOp, Order, Select};
use crate::db::value::{Column, ColumnType, Value};
use crate::error::DbError;
use std::marker::PhantomData;

/// Lazy, chainable read bound to a session.
///
/// Chaining only rewrites the `Select`; nothing reaches the database until one
/// of the terminals (`first`, `all`, `one`, `count`, `scalar`) runs, and each
/// terminal goes through the session's retry loop.
#[must_use = "a query does nothing until a terminal method is awaited"]
pub struct QueryProxy<'s, E: Entity, B: SessionBackend> {
    session: &'s mut ResilientSession<B>,
    select: Select,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity, B: SessionBackend> QueryProxy<'s, E, B> {
    pub(crate) fn new(session: &'s mut ResilientSession<B>, select: Select) -> Self {
        Self {
            session,
            select,
            _entity: PhantomData,
        }
    }

    fn chain(self, f: impl FnOnce(Select) -> Select) -> Self {
        Self {
            session: self.session,
            select: f(self.select),
            _entity: PhantomData,
        }
    }

    pub fn filter(self, column: &str, op: CmpOp, value: impl Into<Value>) -> Self {
        self.chain(|s| s.filter(column, op, value))
    }

    pub fn filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, CmpOp::Eq, value)
    }

    pub fn filter_null(self, column: &str) -> Self {
        self.chain(|s| s.filter_null(column))
    }

    pub fn order_by(self, column: &str) -> Self {
        self.chain(|s| s.order_by(column, Order::Asc))
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.chain(|s| s.order_by(column, Order::Desc))
    }

    pub fn limit(self, n: u64) -> Self {
        self.chain(|s| s.limit(n))
    }

    pub fn offset(self, n: u64) -> Self {
        self.chain(|s| s.offset(n))
    }

    pub fn join(self, table: &str, on: &str) -> Self {
        self.chain(|s| s.join(table, on))
    }

    pub async fn all(self) -> Result<Vec<E>, DbError> {
        self.session.load_select::<E>(&self.select).await
    }

    pub async fn first(self) -> Result<Option<E>, DbError> {
        let select = self.select.limit(1);
        let mut rows = self.session.load_select::<E>(&select).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Exactly one row, else `NoRows` / `MultipleRows`.
    pub async fn one(self) -> Result<E, DbError> {
        let select = self.select.limit(2);
        let mut rows = self.session.load_select::<E>(&select).await?;
        match rows.len() {
            0 => Err(DbError::NoRows { entity: E::TABLE }),
            1 => Ok(rows.swap_remove(0)),
            _ => Err(DbError::MultipleRows { entity: E::TABLE }),
        }
    }

    pub async fn count(self) -> Result<i64, DbError> {
        let stmt = self.select.to_count_statement();
        match self.session.scalar(&stmt, ColumnType::Int).await? {
            Some(Value::Int(n)) => Ok(n),
            _ => Ok(0),
        }
    }

    /// First column of the first row after projecting onto `column`.
    pub async fn scalar(self, column: Column) -> Result<Option<Value>, DbError> {
        let stmt = self.select.project(&[column]).limit(1).to_statement();
        let value = self.session.scalar(&stmt, column.ty).await?;
        Ok(value.filter(|v| !v.is_null()))
    }
}
