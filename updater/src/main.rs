// Updater binary entry point

use common::config::Settings;
use common::db::{DbPool, EntityRepository};
use common::queue::{NatsClient, NatsConfig, NatsTaskPublisher};
use common::schedule::load_schedules;
use common::sidechannel::FileSupplementalSource;
use common::updater::{SystemClock, UpdaterConfig, UpdaterEngine};
use std::sync::Arc;
use tracing::{error, info};

// Distinct exit codes per failing dependency, for supervisors.
const EXIT_CONFIG: i32 = 1;
const EXIT_DATASTORE: i32 = 2;
const EXIT_QUEUE: i32 = 3;

#[tokio::main]
async fn main() {
    // Load configuration before logging is up; fall back to stderr on error.
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    if let Err(e) = common::telemetry::init_logging(&settings.observability.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(EXIT_CONFIG);
    }

    info!("Starting entity lifecycle updater");

    if let Err(e) = settings.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(EXIT_CONFIG);
    }

    if let Err(e) = common::telemetry::init_metrics(settings.observability.metrics_port) {
        error!(error = %e, "Failed to initialize metrics exporter");
        std::process::exit(EXIT_CONFIG);
    }

    // Parse the schedule document eagerly; malformed intervals are fatal
    // here, not deep in the cycle loop.
    let schedules = match load_schedules(&settings.updater.schedule_file) {
        Ok(schedules) => schedules,
        Err(e) => {
            error!(
                schedule_file = %settings.updater.schedule_file,
                error = %e,
                "Invalid schedule document"
            );
            std::process::exit(EXIT_CONFIG);
        }
    };
    info!(entity_types = schedules.len(), "Schedule document loaded");

    // Datastore connection is long-lived and reused across cycles; failure
    // to establish it is fatal.
    let db_pool = match DbPool::new(&settings.database).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to connect to datastore");
            std::process::exit(EXIT_DATASTORE);
        }
    };
    if let Err(e) = db_pool.health_check().await {
        error!(error = %e, "Datastore health check failed");
        std::process::exit(EXIT_DATASTORE);
    }

    // Queue connection, same fail-fast policy.
    let nats_config = NatsConfig {
        url: settings.nats.url.clone(),
        stream_name: settings.nats.stream_name.clone(),
        subject: "tasks.>".to_string(),
        ..NatsConfig::default()
    };
    let nats_client = match NatsClient::new(nats_config).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to connect to task queue");
            std::process::exit(EXIT_QUEUE);
        }
    };
    if let Err(e) = nats_client.initialize_stream().await {
        error!(error = %e, "Failed to initialize task stream");
        std::process::exit(EXIT_QUEUE);
    }

    let publisher = Arc::new(NatsTaskPublisher::new(nats_client));
    let supplemental = Arc::new(FileSupplementalSource::new(
        &settings.updater.supplemental_events_file,
    ));

    let engine = Arc::new(UpdaterEngine::new(
        UpdaterConfig {
            cycle_period_seconds: settings.updater.cycle_period_seconds,
            dispatch_rate_per_second: settings.updater.dispatch_rate_per_second,
        },
        schedules,
        Arc::new(EntityRepository::new(db_pool.clone())),
        publisher.clone(),
        supplemental,
        Arc::new(SystemClock),
    ));

    // Cooperative shutdown: the engine checks the signal only between
    // cycles, so an in-progress cycle runs to completion.
    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, requesting shutdown after current cycle");
            engine_for_shutdown.stop();
        }
    });

    engine.start().await;

    if let Err(e) = publisher.flush().await {
        error!(error = %e, "Failed to flush task queue during shutdown");
    }
    db_pool.close().await;
    info!("Updater stopped");
}
