use graphwright::api::routes::{AppState, create_router};
use graphwright::{GraphConfig, GraphEngine};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize our logging system
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // graphwright.toml (optional) and GRAPHWRIGHT_* variables override the defaults.
    let config = GraphConfig::load().expect("Failed to load configuration");
    let bind = config.server.bind.clone();
    let engine = Arc::new(GraphEngine::open(config).expect("Failed to open GraphEngine"));

    let app = create_router(AppState {
        engine: Arc::clone(&engine),
    });

    let listener = tokio::net::TcpListener::bind(bind.as_str())
        .await
        .expect("Failed to bind listener");
    tracing::info!("Server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("Server error");

    // The router (and its engine clone) is gone once serve returns.
    match Arc::try_unwrap(engine) {
        Ok(engine) => {
            if let Err(e) = engine.close().await {
                tracing::warn!(error = %e, "engine did not close cleanly");
            }
        }
        Err(_) => tracing::warn!("engine still shared at shutdown, skipping close"),
    }
}
