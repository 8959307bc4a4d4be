use std::sync::Arc;

use schoolbus_trips::config::AppConfig;
use schoolbus_trips::db::{self, PgFleetDirectory, PgNotificationRepository, PgTripRepository};
use schoolbus_trips::http::{create_router, AppState};
use schoolbus_trips::kafka;
use schoolbus_trips::notifications::{NotificationDispatcher, NotificationStore};
use schoolbus_trips::processor::ReportSequencer;
use schoolbus_trips::pubsub::{ChannelHub, PubSubFanout};
use schoolbus_trips::stream::StreamGateway;
use schoolbus_trips::trips::TripLifecycleManager;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting school bus trips service...");

    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    info!("Connected to database");

    if config.run_migrations {
        db::migrate(&pool).await?;
        info!("Migrations applied");
    }

    let fleet = Arc::new(PgFleetDirectory::new(pool.clone()));
    let hub = ChannelHub::new(config.pubsub_channel_capacity);

    let notifications = Arc::new(NotificationStore::new(
        Arc::new(PgNotificationRepository::new(pool.clone())),
        config.notification_cache_ttl(),
        config.notification_cache_capacity,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&notifications),
        PubSubFanout::new(hub.clone()),
    ));
    let trips = Arc::new(TripLifecycleManager::new(
        Arc::new(PgTripRepository::new(pool.clone())),
        fleet.clone(),
        dispatcher,
    ));
    let gateway = Arc::new(StreamGateway::new(hub, fleet, config.stream_keepalive()));

    if config.kafka_enabled {
        let kafka_config = config.clone();
        let sequencer = ReportSequencer::new(Arc::clone(&trips));
        tokio::spawn(async move {
            if let Err(e) = kafka::start_location_consumer(kafka_config, sequencer).await {
                error!("Kafka consumer stopped: {}", e);
            }
        });
    }

    let app = create_router(AppState {
        trips,
        notifications,
        gateway,
    });

    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
