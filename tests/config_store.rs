mod common;

use common::{cleanup, sqlite_pool};
use corpfront::db::{ResilientSession, RetryPolicy, Statement};
use corpfront::service::ConfigStore;
use std::sync::Arc;
use std::time::Duration;

fn policy() -> Arc<RetryPolicy> {
    Arc::new(RetryPolicy::immediate(3))
}

async fn overwrite_behind_cache(session: &mut ResilientSession, key: &str, value: &str) {
    session
        .execute(
            &Statement::new("UPDATE api_configs SET config_value = $1 WHERE config_key = $2")
                .bind(value)
                .bind(key),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();
}

#[tokio::test]
async fn cached_value_is_served_within_ttl() {
    let (pool, path) = sqlite_pool("cfg_ttl").await;
    let mut session = ResilientSession::new(pool.clone(), policy());
    let store = ConfigStore::new(Duration::from_secs(60));

    store.set(&mut session, "slideshow_type", "file").await.unwrap();
    overwrite_behind_cache(&mut session, "slideshow_type", "url").await;

    let value = store.get(&mut session, "slideshow_type").await.unwrap();
    assert_eq!(value.as_deref(), Some("file"));

    store.invalidate("slideshow_type").await;
    let value = store.get(&mut session, "slideshow_type").await.unwrap();
    assert_eq!(value.as_deref(), Some("url"));

    session.close().await.unwrap();
    cleanup(pool, path).await;
}

#[tokio::test]
async fn zero_ttl_always_reads_through() {
    let (pool, path) = sqlite_pool("cfg_zero").await;
    let mut session = ResilientSession::new(pool.clone(), policy());
    let store = ConfigStore::new(Duration::ZERO);

    store.set(&mut session, "k", "one").await.unwrap();
    overwrite_behind_cache(&mut session, "k", "two").await;

    assert_eq!(store.get(&mut session, "k").await.unwrap().as_deref(), Some("two"));

    session.close().await.unwrap();
    cleanup(pool, path).await;
}

#[tokio::test]
async fn set_updates_existing_row_and_blanks_read_as_none() {
    let (pool, path) = sqlite_pool("cfg_set").await;
    let mut session = ResilientSession::new(pool.clone(), policy());
    let store = ConfigStore::new(Duration::from_secs(60));

    assert_eq!(store.get(&mut session, "revenue_trend_file_id").await.unwrap(), None);

    store.set(&mut session, "revenue_trend_file_id", "12").await.unwrap();
    assert_eq!(
        store.get(&mut session, "revenue_trend_file_id").await.unwrap().as_deref(),
        Some("12")
    );

    store.set(&mut session, "revenue_trend_file_id", "  ").await.unwrap();
    assert_eq!(store.get(&mut session, "revenue_trend_file_id").await.unwrap(), None);

    let rows = session
        .query::<corpfront::db::ApiConfig>()
        .filter_eq("config_key", "revenue_trend_file_id")
        .count()
        .await
        .unwrap();
    assert_eq!(rows, 1);

    session.close().await.unwrap();
    cleanup(pool, path).await;
}

#[tokio::test]
async fn inactive_rows_are_invisible() {
    let (pool, path) = sqlite_pool("cfg_inactive").await;
    let mut session = ResilientSession::new(pool.clone(), policy());
    let store = ConfigStore::new(Duration::ZERO);

    store.set(&mut session, "slideshow_embed_url", "https://example.com").await.unwrap();
    session
        .execute(&Statement::new("UPDATE api_configs SET is_active = 0"))
        .await
        .unwrap();
    session.commit().await.unwrap();

    assert_eq!(store.get(&mut session, "slideshow_embed_url").await.unwrap(), None);

    session.close().await.unwrap();
    cleanup(pool, path).await;
}
