use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use availability_cell::SystemClock;
use reminder_cell::{ReminderDispatcherService, ReminderError, WhatsAppClient};
use shared_config::AppConfig;
use shared_database::StoreClient;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // `clinic-core-api trigger-reminders` runs one dispatcher tick and
    // exits; cron environments without an HTTP path use this instead of
    // the internal endpoint.
    if std::env::args().nth(1).as_deref() == Some("trigger-reminders") {
        return run_reminder_tick(config).await;
    }

    info!("Starting clinic core API server");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(config);

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run_reminder_tick(config: AppConfig) -> ExitCode {
    if !config.is_configured() || !config.is_messaging_configured() {
        error!("Reminder tick aborted: store or messaging configuration missing");
        return ExitCode::from(2);
    }

    let store = Arc::new(StoreClient::new(&config));
    let messaging = Arc::new(WhatsAppClient::new(&config));
    let dispatcher =
        ReminderDispatcherService::new(&config, store, messaging, Arc::new(SystemClock));

    match dispatcher.run_tick().await {
        Ok(report) => {
            info!(
                "Reminder tick finished: sent={} legacy={} failed={}",
                report.sent, report.legacy_sent, report.failed
            );
            ExitCode::SUCCESS
        }
        Err(ReminderError::DatabaseError(e)) => {
            error!("Reminder tick storage failure: {}", e);
            ExitCode::from(3)
        }
        Err(e) => {
            error!("Reminder tick failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
