use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use satlink_backend::config::AppConfig;
use satlink_backend::handlers;
use satlink_backend::services::dialogue::{DialogueEngine, DialogueSettings};
use satlink_backend::services::messaging::MessagingService;
use satlink_backend::services::otp::OtpService;
use satlink_backend::services::session_store::SessionStore;
use satlink_backend::services::transaction_log::TransactionLog;
use satlink_backend::services::wallet_api::WalletApiService;
use satlink_backend::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,satlink_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();

    let sessions = SessionStore::new(config.session_idle_timeout_minutes);
    let otp = OtpService::new(
        config.otp_expiry_minutes,
        config.otp_max_attempts,
        config.otp_issue_limit,
        config.otp_issue_window_secs,
    );
    let tx_log = TransactionLog::new();

    let wallet = Arc::new(WalletApiService::new(
        config.wallet_api_key.clone(),
        config.wallet_api_secret.clone(),
        config.wallet_base_url.clone(),
        config.http_timeout_secs,
    ));
    let messaging = Arc::new(MessagingService::new(
        config.messaging_account_sid.clone(),
        config.messaging_auth_token.clone(),
        config.messaging_from_number.clone(),
        config.messaging_base_url.clone(),
        config.http_timeout_secs,
    ));

    let dialogue = DialogueEngine::new(
        sessions.clone(),
        otp.clone(),
        tx_log.clone(),
        wallet,
        messaging.clone(),
        DialogueSettings::from_config(&config),
    );

    let state = AppState {
        config: config.clone(),
        sessions,
        otp,
        tx_log,
        messaging,
        dialogue,
    };

    // Build router
    let app = Router::new()
        .route("/webhook/message", post(handlers::webhook::receive_message))
        .route(
            "/webhook/wallet",
            post(handlers::wallet_webhook::receive_wallet_event),
        )
        .route("/health", get(handlers::health::health))
        .route("/api/stats", get(handlers::admin::stats))
        .route("/admin/cleanup", post(handlers::admin::cleanup))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listen address");

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
