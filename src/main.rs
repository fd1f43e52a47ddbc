//! callbridge-server — process entry point: logging, configuration, and the
//! `axum` HTTP/WebSocket front door.
//!
//! Usage: callbridge-server
//! Configuration is read entirely from the environment; see `Config::from_env`.

use std::sync::Arc;
use std::time::Duration;

use callbridge_core::collaborators::{build_http_client, DEFAULT_COLLABORATOR_TIMEOUT};
use callbridge_core::rate_limiter::RateLimiter;
use callbridge_core::{router, AppState, Config};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let listen_port = config.listen_port;
    let window = Duration::from_secs(config.rate_limit_window_minutes * 60);
    let rate_limiter = RateLimiter::new(
        config.max_concurrent_calls,
        window,
        config.rate_limit_calls_per_window,
    );
    let http_client = build_http_client(DEFAULT_COLLABORATOR_TIMEOUT);

    let state = Arc::new(AppState {
        config,
        rate_limiter,
        http_client,
    });
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{listen_port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("callbridge listening on {addr}");
    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
    }
}
