pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod router;
pub mod service;

pub use db::{ResilientSession, RetryPolicy};
pub use error::{CorpfrontError, DbError};
