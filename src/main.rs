// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use live_telemetry::application::subscription::ConnectionRegistry;
use live_telemetry::application::widget_service::{Sources, WidgetService};
use live_telemetry::infrastructure::config::{load_server_config, load_widgets_config};
use live_telemetry::infrastructure::http_poll::HttpPollSource;
use live_telemetry::infrastructure::ws_source::WebSocketSource;
use live_telemetry::presentation::app_state::AppState;
use live_telemetry::presentation::handlers::{
    get_widget, health_check, list_widgets, retarget_widget, stream_widget,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let server_config = load_server_config().context("failed to load server config")?;
    let widgets_config = load_widgets_config().context("failed to load widget config")?;
    let settings = server_config.server;

    // Sources (infrastructure layer)
    let sources = Sources {
        push: Arc::new(WebSocketSource::new(settings.push_base_url.clone())),
        poll: Arc::new(HttpPollSource::new(settings.poll_base_url.clone())?),
    };

    // Widgets (application layer)
    let registry = ConnectionRegistry::new(settings.reconnect_delay());
    let mut widget_service = WidgetService::new(registry, sources, settings.frame_interval());
    widget_service.start(&widgets_config).await?;

    let state = Arc::new(AppState {
        widget_service: widget_service.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/widgets", get(list_widgets))
        .route("/widgets/:id", get(get_widget))
        .route("/widgets/:id/stream", get(stream_widget))
        .route("/widgets/:id/source", put(retarget_widget))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = settings
        .bind
        .parse()
        .with_context(|| format!("invalid bind address `{}`", settings.bind))?;
    tracing::info!(%addr, "starting live-telemetry service");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(widget_service))
        .await?;

    tracing::info!("live-telemetry service stopped");
    Ok(())
}

/// Waits for ctrl-c, then unmounts every widget so open frame streams end.
async fn shutdown_signal(widget_service: WidgetService) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    widget_service.shutdown().await;
}
