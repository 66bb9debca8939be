use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use sqlx::AnyPool;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::warn;

use crate::db::{ResilientSession, RetryPolicy};

/// Everything needed to open a session: the pool and the retry policy.
#[derive(Debug, Clone)]
pub struct DbHandle {
    pub pool: AnyPool,
    pub policy: Arc<RetryPolicy>,
}

impl DbHandle {
    pub fn new(pool: AnyPool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy: Arc::new(policy),
        }
    }

    pub fn session(&self) -> ResilientSession {
        ResilientSession::new(self.pool.clone(), self.policy.clone())
    }
}

/// One session per request. Opening is free: no connection is taken from
/// the pool until the first statement runs.
///
/// Handlers end with [`DbSession::finish`]; an early return or a cancelled
/// request drops the session instead, which discards the connection if a
/// transaction is still open.
pub struct DbSession(pub ResilientSession);

impl DbSession {
    /// Close the session and pass `result` through. A failed close is logged
    /// and never masks the handler's own outcome.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = self.0.close().await {
            warn!(error = %e, "failed to close database session");
        }
        result
    }
}

impl<S> FromRequestParts<S> for DbSession
where
    S: Send + Sync,
    DbHandle: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(DbHandle::from_ref(state).session()))
    }
}
