use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use tokio::time::{self, Duration as TokioDuration};
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundbuero::matching::MatchWorker;
use fundbuero::state::AppState;
use fundbuero::store::images::LocalImageStore;
use fundbuero::{config, db, middleware, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging: stdout plus daily rotated files under ./logs
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "fundbuero.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Guards must outlive main so the non-blocking writers flush
    let _log_guards = (stdout_guard, file_guard);

    // embedded defaults -> fundbuero.toml -> FUNDBUERO_CONFIG -> env/.env
    let app_cfg = config::load()?;

    config::ensure_sqlite_parent_dir(&app_cfg.database.url)?;
    let pool = db::connect(&app_cfg.database.url, app_cfg.database.max_connections).await?;
    db::init_db(&pool).await?;

    std::fs::create_dir_all(&app_cfg.storage.image_dir)?;
    let images = Arc::new(LocalImageStore::new(&app_cfg.storage.image_dir));
    let (state, match_rx) = AppState::new(pool.clone(), app_cfg.clone(), images);

    let shutdown = CancellationToken::new();

    let worker = MatchWorker::new(pool.clone(), &app_cfg.matching, state.match_queue.clone(), state.metrics.clone());
    let worker_handle = tokio::spawn(worker.run(match_rx, shutdown.clone()));

    // Periodic cleanup for per-endpoint rate limiters to avoid memory growth
    {
        let rl = state.rate_limiter.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(TokioDuration::from_secs(300));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => rl.cleanup_all().await,
                }
            }
        });
    }

    let cfg_arc = state.config.clone();
    let app = routes::router(state)
        .layer(from_fn(middleware::validation::validate_request_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg_arc, middleware::security_headers::security_headers_middleware));

    // Permissive CORS only for local development against a separate client
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Fundbuero listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        tracing::warn!("match worker ended abnormally: {}", e);
    }
    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable ({}); waiting for Ctrl-C only", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
