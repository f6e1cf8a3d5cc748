use std::{net::SocketAddr, sync::Arc};

use axum::{routing::get, Router};
use axum::http::HeaderValue;
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info};

use consultancy_payments as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Gateway client and notification channel
    let gateway: Arc<dyn api::gateway::PaymentGateway> = Arc::new(
        api::gateway::RazorpayGateway::new(api::gateway::RazorpayConfig::from(&cfg))?,
    );
    let notifications = api::notifications::NotificationDispatcher::from_config(&cfg)?;
    if cfg.notification_webhook_url.is_some() {
        info!("Notification webhook delivery enabled");
    } else {
        info!("Notification webhook URL not configured; notifications are logged only");
    }

    // Compose shared app state
    let app_state = api::AppState::new(db_arc, cfg.clone(), gateway, notifications);

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into());
    };

    // Build router: v1 API + Swagger UI
    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "consultancy-payments up" }))
        .nest("/api/v1", api::api_v1_routes())
        .merge(api::openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(api::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            api::middleware_helpers::request_id_middleware,
        ))
        .with_state(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("consultancy-payments listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
