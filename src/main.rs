use quietstats::config::Config;
use quietstats::ingest::bot::BotFilter;
use quietstats::ingest::buffer::HitBuffer;
use quietstats::ingest::geoip::{GeoDb, MaxMindGeoDb};
use quietstats::ingest::handler::AppState;
use quietstats::ingest::hit::HitBuilder;
use quietstats::ingest::session::SessionCache;
use quietstats::ingest::tracker::Tracker;
use quietstats::server;
use quietstats::storage::{DuckDbStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quietstats=info,tower_http=info".into());
    if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = ?config.database_path,
        "Starting quietstats"
    );

    let store: Arc<dyn Store> = Arc::new(
        DuckDbStore::open(config.database_path.as_deref()).expect("Failed to open database"),
    );
    let buffer = Arc::new(
        HitBuffer::new(config.flush_hit_count, Arc::clone(&store))
            .with_max_rows(config.max_buffered_rows),
    );

    let geo = MaxMindGeoDb::open(config.geoip_db_path.as_deref());
    let geo: Option<Arc<dyn GeoDb>> = if geo.is_loaded() {
        Some(Arc::new(geo))
    } else {
        None
    };

    let secret = config.secret.clone().unwrap_or_else(|| {
        tracing::warn!("No QUIETSTATS_SECRET set, using a random secret. Fingerprints will not match across restarts.");
        uuid::Uuid::new_v4().to_string()
    });

    let tracker = Tracker::new(
        BotFilter::new(config.min_versions()),
        config.filter_bots,
        HitBuilder::new(secret, geo),
        SessionCache::new(
            Some(Arc::clone(&store)),
            config.session_idle_timeout(),
            config.session_max_entries,
        ),
        Arc::clone(&buffer),
    );

    // Set up periodic flush
    let flush_buffer = Arc::clone(&buffer);
    let flush_interval = config.flush_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(flush_interval));
        loop {
            interval.tick().await;
            match flush_buffer.flush() {
                Ok(count) if count > 0 => {
                    tracing::info!(count, "Periodic flush completed");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Periodic flush failed");
                }
            }
        }
    });

    let state = Arc::new(AppState { tracker });
    let app = server::build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    match buffer.flush() {
        Ok(count) => tracing::info!(count, "Flushed buffer on shutdown"),
        Err(e) => tracing::error!(error = %e, "Final flush failed"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
