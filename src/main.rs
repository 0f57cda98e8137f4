use http::{Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::{Any, CorsLayer};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall::{
    AppState, Config, db,
    middleware_layer::rate_limit::RateLimiter,
    routes,
    services::sessions::SessionManager,
    store::PgStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let pool = db::create_pool(&config.database_url, config.db_pool_max_size)?;
    tracing::info!(
        "✅ PostgreSQL pool initialized (max {} connections)",
        config.db_pool_max_size
    );

    if let Err(e) = db::run_migrations(&pool).await {
        tracing::error!("❌ Failed to apply database schema: {}", e);
        return Err(e.into());
    }

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis = redis::aio::ConnectionManager::new(redis_client).await?;
    tracing::info!("✅ Redis Connection Manager initialized (pooled)");

    let limiter = RateLimiter::new(
        redis,
        config.submit_rate_limit,
        config.rate_limit_window_secs,
    );

    let store = PgStore::new(pool, config.retry_policy());
    let addr: SocketAddr = config.bind_addr;
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs.max(1));
    let state = AppState::new(store, config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(86400));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1_000)
            .burst_size(5_000)
            .use_headers()
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let app = routes::router(state.clone(), Some(limiter))
        .layer(tower_governor::GovernorLayer::new(governor_conf))
        .layer(cors);

    let sweep_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            tracing::debug!("🧹 Sweeping overdue sessions...");
            if let Err(e) = SessionManager::sweep_overdue(sweep_state.store.as_ref()).await {
                tracing::error!("❌ Expiry sweep failed: {}", e);
            }
        }
    });

    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!(
        "✅ Background expiry sweep started (every {}s)",
        sweep_interval.as_secs()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
