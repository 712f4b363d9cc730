use anyhow::Context;
use launchkit_shared::{create_migration_pool, create_pool, run_migrations, KvCache};
use launchkit_web::{routes, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_env().context("loading configuration")?;

    // Migrations get their own single-connection pool; the serving pool
    // starts clean afterwards
    let migration_pool = create_migration_pool(&config.database_url)
        .await
        .context("connecting migration pool")?;
    run_migrations(&migration_pool)
        .await
        .context("running migrations")?;
    migration_pool.close().await;

    let pool = create_pool(&config.database_url)
        .await
        .context("connecting database pool")?;

    let cache = match KvCache::connect(&config.redis_url).await {
        Ok(cache) => cache,
        Err(error) if !config.app_env.is_production() => {
            tracing::warn!(%error, "redis unavailable, using in-memory cache");
            KvCache::in_memory()
        }
        Err(error) => return Err(error).context("connecting redis"),
    };

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, pool, cache);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!(address = %bind_address, version = env!("CARGO_PKG_VERSION"), "listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
