//! Room Controller
//!
//! Entry point for the meeting platform's control plane: authorization
//! callouts and room state synchronization.

use common::secret::ExposeSecret;
use rc_service::auth::JwtAccessTokenVerifier;
use rc_service::capabilities::{
    CapabilityAssembler, ProvisionerSet, RedisConsumerBackend, RetryPolicy,
};
use rc_service::config::Config;
use rc_service::crypto::{IssuerKeyPair, TokenCodec};
use rc_service::kv::RedisKvStore;
use rc_service::observability::metrics::init_metrics_recorder;
use rc_service::repositories::{PgRecordingRepository, PgRoomRepository};
use rc_service::room_state::RoomStateStore;
use rc_service::routes::{self, AppState};
use rc_service::services::{
    AuthCalloutService, NotificationBroadcaster, RecordingAuditWriter,
    RedisNotificationPublisher, StateSyncBridge,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rc_service=debug,room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        account_name = %config.account_name,
        jwt_clock_skew_seconds = config.jwt_clock_skew.as_secs(),
        provision_max_attempts = config.provision_max_attempts,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let issuer = IssuerKeyPair::from_seed(config.issuer_seed.expose_secret()).map_err(|e| {
        error!("Failed to load issuer key: {}", e);
        e
    })?;
    info!(issuer = %issuer.public_id(), "Issuer key loaded");
    let codec = TokenCodec::new(Arc::new(issuer), config.jwt_clock_skew);

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    info!("Connecting to Redis...");
    let kv = RedisKvStore::connect(&config.redis_url).await.map_err(|e| {
        error!("Failed to connect to Redis: {}", e);
        e
    })?;
    let redis = kv.connection();
    info!("Redis connection established");

    let room_state = RoomStateStore::new(Arc::new(kv));

    let provisioners = ProvisionerSet::streams(
        Arc::new(RedisConsumerBackend::new(redis.clone())),
        &config.subjects,
    );
    let assembler = CapabilityAssembler::new(
        provisioners,
        &config.subjects,
        RetryPolicy::new(config.provision_max_attempts),
    );

    let verifier = JwtAccessTokenVerifier::new(
        config.access_token_api_key,
        config.access_token_secret,
        config.jwt_clock_skew,
    );

    let callout = AuthCalloutService::new(
        codec,
        Arc::new(verifier),
        room_state.clone(),
        assembler,
        config.account_name,
    );

    let broadcaster = NotificationBroadcaster::new(
        Arc::new(RedisNotificationPublisher::new(redis)),
        &config.subjects,
    );
    let state_sync = StateSyncBridge::new(
        Arc::new(PgRoomRepository::new(db_pool.clone())),
        Arc::new(PgRecordingRepository::new(db_pool.clone())),
        room_state,
        broadcaster,
        RecordingAuditWriter::new(config.recording_files_path),
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        pool: db_pool,
        callout,
        state_sync,
        shutdown: shutdown.clone(),
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Room Controller listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Room Controller shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT), then cancels in-flight
/// callouts and waits out the drain period.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    shutdown.cancel();

    let drain_secs: u64 = std::env::var("RC_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    }
}
