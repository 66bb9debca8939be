use axum::extract::{FromRef, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};
use headers::authorization::Bearer;
use headers::{Authorization, HeaderMapExt};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::CorpfrontError;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// The configured admin secret. Empty means admin routes are closed.
#[derive(Debug, Clone, Default)]
pub struct AdminKey(Arc<str>);

impl AdminKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref().trim()))
    }

    fn matches(&self, candidate: &str) -> bool {
        !self.0.is_empty() && bool::from(candidate.trim().as_bytes().ct_eq(self.0.as_bytes()))
    }
}

/// Ensure the inbound request carries the admin key.
/// Accepts either:
/// - Header: `Authorization: Bearer <key>`
/// - Header: `x-admin-key: <key>`
pub fn ensure_admin(headers: &HeaderMap, expected: &AdminKey) -> Result<(), CorpfrontError> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>()
        && expected.matches(bearer.token())
    {
        return Ok(());
    }

    if let Some(key) = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok())
        && expected.matches(key)
    {
        return Ok(());
    }

    Err(CorpfrontError::Unauthorized)
}

#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin;

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    AdminKey: FromRef<S>,
{
    type Rejection = CorpfrontError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        ensure_admin(&parts.headers, &AdminKey::from_ref(state))?;
        Ok(Self)
    }
}
