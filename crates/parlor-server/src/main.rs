use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_api::attachments::AttachmentStore;
use parlor_api::routes;
use parlor_api::state::{AppState, AppStateInner};
use parlor_db::presence::DEFAULT_PRESENCE_WINDOW;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor_server=debug,parlor_api=debug,parlor_db=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("PARLOR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLOR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path: PathBuf = std::env::var("PARLOR_DB_PATH")
        .unwrap_or_else(|_| "parlor.db".into())
        .into();
    let upload_dir: PathBuf = std::env::var("PARLOR_UPLOAD_DIR")
        .unwrap_or_else(|_| "./uploads".into())
        .into();
    let presence_window = std::env::var("PARLOR_PRESENCE_WINDOW_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_PRESENCE_WINDOW);

    // Init database and attachment storage
    let db = parlor_db::Database::open(&db_path)?;
    info!("Message log holds {} messages", db.message_count()?);
    let attachments = AttachmentStore::new(upload_dir).await?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        attachments,
        presence_window,
    });

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parlor listening on {}", addr);
    info!("Presence window: {} seconds", presence_window.as_secs());

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
