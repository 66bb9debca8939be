use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use corpfront::CorpfrontError;
use corpfront::config::Config;
use corpfront::db::{RetryPolicy, pool, schema};
use corpfront::middleware::db_session::DbHandle;
use corpfront::router::{DashboardState, dashboard_router};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), CorpfrontError> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.basic.listen_addr,
        postgres = cfg.database.is_postgres(),
        pool_size = cfg.database.pool_size,
        max_overflow = cfg.database.max_overflow,
        retry_max_times = cfg.retry.max_times,
        loglevel = %cfg.basic.loglevel,
        admin_routes = !cfg.basic.admin_key.trim().is_empty()
    );
    if cfg.basic.admin_key.trim().is_empty() {
        warn!("no admin key configured; /api/admin routes will reject every request");
    }

    let (pool, engine) = pool::connect(&cfg.database).await?;
    let postgres = engine == pool::Engine::Postgres;
    let db = DbHandle::new(pool.clone(), RetryPolicy::from_config(&cfg.retry));

    let mut session = db.session();
    schema::init_schema(&mut session, postgres).await?;
    session.close().await?;
    info!(postgres, "database schema ready");

    let state = DashboardState::new(db, &cfg);
    let app = dashboard_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
