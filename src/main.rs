use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use ratecache::{
    AppState,
    clock::SystemClock,
    config::Config,
    router::create_router,
    store::{KvStore, MemoryStore, RedisStore},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let clock = Arc::new(SystemClock);
    let store: Arc<dyn KvStore> = match config.redis_url.as_deref() {
        Some(url) => match RedisStore::open(url) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(error = %e, "invalid REDIS_URL");
                return ExitCode::FAILURE;
            }
        },
        None => {
            tracing::warn!("REDIS_URL not set, using an in-process store; quotas and cache are per process");
            Arc::new(MemoryStore::new(clock.clone()))
        }
    };

    if !config.rate_limit_enabled {
        tracing::warn!("rate limiting disabled by RATE_LIMIT_ENABLED");
    }
    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET not set, every caller is rate limited by address");
    }

    let state = AppState::new(config, store, clock);
    let _tasks = state.spawn_background_tasks();

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    let router = create_router(state.clone());

    #[cfg(debug_assertions)]
    let router = router.layer(CorsLayer::permissive());

    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!(error = %e, "server stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
