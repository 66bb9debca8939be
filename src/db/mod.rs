//! Database layer.
//!
//! Layout:
//! - `session.rs`: `ResilientSession`, the retrying unit of work every caller uses
//! - `query.rs`: lazy `QueryProxy` returned by `ResilientSession::query`
//! - `retry.rs`: error classification and backoff
//! - `backend.rs`: `SessionBackend` trait and the `sqlx` implementation
//! - `value.rs`, `statement.rs`, `entity.rs`: values, bound SQL and row mapping
//! - `pool.rs`, `schema.rs`, `models.rs`: pool setup, DDL and the dashboard tables

pub mod backend;
pub mod entity;
pub mod models;
pub mod pool;
pub mod query;
pub mod retry;
pub mod schema;
pub mod session;
pub mod statement;
pub mod value;

pub use backend::{SessionBackend, SqlxBackend};
pub use entity::Entity;
pub use models::{ApiConfig, FileType, FileUpload};
pub use query::QueryProxy;
pub use retry::{RetryPolicy, Transience};
pub use session::ResilientSession;
pub use statement::{CmpOp, Order, Select, Statement};
pub use value::{Column, ColumnType, Row, Value};
