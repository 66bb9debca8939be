use crate::db::models::ApiConfig;
use crate::db::statement::Statement;
use crate::db::value::timestamp_text;
use crate::db::{ResilientSession, SessionBackend};
use crate::error::DbError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<String>,
    loaded_at: Instant,
}

/// Key-value settings in `api_configs`, with a short read cache in front.
///
/// Cloning shares the cache. Reads only see active rows; blank values read as
/// `None`. Misses are cached too so a dashboard poll loop does not hit the
/// database for keys that were never set.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ConfigStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
        key: &str,
    ) -> Result<Option<String>, DbError> {
        if let Some(entry) = self.cache.read().await.get(key)
            && entry.loaded_at.elapsed() < self.ttl
        {
            return Ok(entry.value.clone());
        }

        let row = session
            .query::<ApiConfig>()
            .filter_eq("config_key", key)
            .filter_eq("is_active", true)
            .first()
            .await?;
        let value = row.and_then(|r| normalize(r.config_value.as_deref()));
        debug!(key, cached = value.is_some(), "config value loaded");
        self.store(key, value.clone()).await;
        Ok(value)
    }

    /// Upsert one key and commit.
    pub async fn set<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
        key: &str,
        value: &str,
    ) -> Result<(), DbError> {
        self.set_many(session, &[(key, value)]).await
    }

    /// Upsert several keys in one transaction.
    pub async fn set_many<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
        pairs: &[(&str, &str)],
    ) -> Result<(), DbError> {
        let mut visible = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let existing = session
                .query::<ApiConfig>()
                .filter_eq("config_key", *key)
                .first()
                .await?;
            match existing {
                Some(row) => {
                    let id = row.id.ok_or(DbError::Unpersisted {
                        entity: "api_configs",
                    })?;
                    session
                        .execute(
                            &Statement::new(
                                "UPDATE api_configs SET config_value = $1, updated_at = $2 WHERE id = $3",
                            )
                            .bind(*value)
                            .bind(timestamp_text(Utc::now()))
                            .bind(id),
                        )
                        .await?;
                    visible.push((*key, row.is_active.then(|| normalize(Some(*value))).flatten()));
                }
                None => {
                    session.add(ApiConfig::new(*key, *value));
                    visible.push((*key, normalize(Some(*value))));
                }
            }
        }
        session.commit().await?;

        for (key, value) in visible {
            self.store(key, value).await;
        }
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.write().await.remove(key);
    }

    async fn store(&self, key: &str, value: Option<String>) {
        self.cache.write().await.insert(
            key.to_string(),
            CacheEntry {
                value,
                loaded_at: Instant::now(),
            },
        );
    }
}
