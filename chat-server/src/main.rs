use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_server::{
    api,
    auth::{users, TokenIssuer},
    cache::{InMemoryCache, ListingCache, RedisCache},
    completion::GeminiClient,
    config::Config,
    db,
    dispatcher::Dispatcher,
    launcher::TaskLauncher,
    messages::MessageStore,
    AppState,
};

/// How long shutdown waits for in-flight dispatches.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(port = config.port, "chat server starting");

    // Database
    let pool_size = config.effective_pool_size();
    let db = db::connect(&config.database_url, pool_size).await?;
    info!(database_url = %config.database_url, pool_size, "database ready");

    // Spawn expired-OTP cleanup every ten minutes.
    tokio::spawn(users::run_expired_otp_cleanup(
        db.clone(),
        Duration::from_secs(600),
    ));

    // Chatroom listing cache
    let cache: Arc<dyn ListingCache> = match config.redis_url.as_deref() {
        Some(url) => {
            let redis = RedisCache::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("redis connection failed: {e}"))?;
            info!("chatroom cache: redis");
            Arc::new(redis)
        }
        None => {
            info!("chatroom cache: in-process");
            Arc::new(InMemoryCache::new())
        }
    };

    // Dispatch pipeline
    let completion = GeminiClient::new(
        config.gemini_api_url.clone(),
        config.gemini_api_key.clone(),
        config.completion_timeout,
    )?;
    let dispatcher = Dispatcher::new(db.clone(), Arc::new(completion), config.completion_timeout);
    let (launcher, launcher_handle) = TaskLauncher::start(
        dispatcher,
        config.dispatch_workers,
        config.dispatch_queue_capacity,
    );

    let state = Arc::new(AppState {
        messages: MessageStore::new(db.clone()),
        db,
        tokens: TokenIssuer::new(config.jwt_secret.as_bytes(), config.jwt_ttl),
        otp_ttl: config.otp_ttl,
        cache,
        cache_ttl: config.chatroom_cache_ttl,
        launcher,
    });

    let app = api::router(state)
        .layer(build_cors(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the last launcher sender) is gone; let queued
    // and running dispatches finish.
    info!("draining dispatch queue");
    if tokio::time::timeout(DRAIN_TIMEOUT, launcher_handle.drain())
        .await
        .is_err()
    {
        warn!("dispatch drain timed out; unfinished messages stay in their current state");
    }
    Ok(())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %origin, "ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
